//! Stateful daemon (C9, spec §4.8): a Unix-socket JSON-RPC service that
//! pools named sessions across process invocations, persisted under
//! `$HOME/.mcp-layer/sessions/`.

pub mod client;
pub mod daemon;
pub mod error;
pub mod persistence;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod sweeper;

pub use client::DaemonClient;
pub use daemon::{Daemon, DaemonLifecycle};
pub use error::{IpcError, IpcResult};
pub use registry::{ServiceInfo, SessionRegistryEntry, SessionRegistryFile, SessionStatus};

use std::sync::Arc;
use std::time::SystemTime;

use mcp_gateway_core::{ErrorKind, GatewayError, GatewayResult};
use mcp_gateway_runtime::Runtime;

/// Start the daemon: probe the endpoint first (spec §4.8 "Startup" —
/// `SESSION_SERVICE_RUNNING` if something already answers), then bind,
/// persist `service.json`, recover any leftover `sessions.json`, and run
/// the accept loop and sweeper until a SIGINT/SIGTERM.
pub async fn run(runtime: Arc<Runtime>, lifecycle: DaemonLifecycle) -> GatewayResult<()> {
    let dir = persistence::ensure_sessions_dir().await.map_err(ipc_to_gateway)?;
    let socket_path = dir.join(server::SOCKET_FILE_NAME);

    if let Some(existing) = persistence::read_service_info(&dir).await.map_err(ipc_to_gateway)? {
        let client = DaemonClient::new(dir.clone());
        if client.ping().await.is_ok() {
            return Err(GatewayError::new(
                ErrorKind::SessionServiceRunning,
                "mcp-gateway-daemon",
                "run",
                "a daemon is already listening at {endpoint}",
            )
            .with_var("endpoint", existing.endpoint));
        }
    }

    let listener = server::bind(&socket_path).await.map_err(ipc_to_gateway)?;
    let endpoint = socket_path.to_string_lossy().to_string();

    let daemon = Arc::new(Daemon::new(runtime, lifecycle.clone(), endpoint.clone(), dir.clone()));
    daemon.recover().await.map_err(ipc_to_gateway)?;

    let info = ServiceInfo { pid: daemon.pid, endpoint: endpoint.clone(), token: daemon.token.clone(), started_at: SystemTime::now() };
    persistence::write_service_info(&dir, &info).await.map_err(ipc_to_gateway)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper_handle = tokio::spawn(sweeper::run(daemon.clone(), lifecycle.sweep_interval, shutdown_rx.clone()));
    let server_handle = tokio::spawn(server::serve(listener, daemon.clone(), shutdown_rx));

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            tracing::info!("daemon received OS shutdown signal, draining");
        }
        _ = daemon.wait_for_shutdown_request() => {
            tracing::info!("daemon received daemon.shutdown RPC, draining");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = sweeper_handle.await;
    let _ = server_handle.await;

    daemon.shutdown().await.map_err(ipc_to_gateway)?;
    let _ = tokio::fs::remove_file(&socket_path).await;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn ipc_to_gateway(err: IpcError) -> GatewayError {
    GatewayError::new(ErrorKind::SessionInternal, "mcp-gateway-daemon", "run", err.to_string())
}
