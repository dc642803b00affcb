//! Client-side RPC helper (spec §4.8 "Client"): caches the loaded
//! `service.json` per endpoint, retries once on `SESSION_UNAUTHORIZED`, and
//! exposes `ensure_service()` for auto-starting a detached daemon.

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::UnixStream;

use mcp_gateway_core::{ErrorKind, GatewayError, GatewayResult};

use crate::protocol::{read_frame, write_frame, RpcRequest, RpcResponse};
use crate::registry::ServiceInfo;
use crate::{persistence, server};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(3);
const ENSURE_POLL_ATTEMPTS: u32 = 25;
const ENSURE_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct DaemonClient {
    sessions_dir: PathBuf,
    cached_service: Mutex<Option<ServiceInfo>>,
    call_timeout: Duration,
}

impl DaemonClient {
    pub fn new(sessions_dir: PathBuf) -> Self {
        Self { sessions_dir, cached_service: Mutex::new(None), call_timeout: DEFAULT_CALL_TIMEOUT }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub async fn ping(&self) -> GatewayResult<Value> {
        self.call("health.ping", Value::Null).await
    }

    /// Ask a running daemon to drain and exit (spec §4.8 "Shutdown"),
    /// without needing to signal its process directly.
    pub async fn shutdown(&self) -> GatewayResult<Value> {
        self.call("daemon.shutdown", Value::Null).await
    }

    /// Send one RPC, refreshing the cached token and retrying exactly once
    /// on `SESSION_UNAUTHORIZED` (spec §4.8 "Client").
    pub async fn call(&self, method: &str, params: Value) -> GatewayResult<Value> {
        let service = self.load_service(false).await?;
        match self.call_with(&service, method, params.clone()).await {
            Err(err) if err.kind == ErrorKind::SessionUnauthorized => {
                let refreshed = self.load_service(true).await?;
                self.call_with(&refreshed, method, params).await
            }
            other => other,
        }
    }

    async fn call_with(&self, service: &ServiceInfo, method: &str, params: Value) -> GatewayResult<Value> {
        let request = RpcRequest { id: uuid::Uuid::new_v4().to_string(), method: method.to_string(), params, token: service.token.clone() };

        let connect = tokio::time::timeout(self.call_timeout, UnixStream::connect(&service.endpoint))
            .await
            .map_err(|_| GatewayError::upstream_timeout("mcp-gateway-daemon", method))?
            .map_err(|e| io_error(method, e))?;

        let (read_half, mut write_half) = connect.into_split();
        write_frame(&mut write_half, request).await.map_err(|e| ipc_error(method, e))?;

        let mut reader = BufReader::new(read_half);
        let response: RpcResponse = tokio::time::timeout(self.call_timeout, read_frame(&mut reader, 64 * 1024 * 1024))
            .await
            .map_err(|_| GatewayError::upstream_timeout("mcp-gateway-daemon", method))?
            .map_err(|e| ipc_error(method, e))?;

        if response.ok {
            Ok(response.result.unwrap_or(Value::Null))
        } else {
            let error = response.error.unwrap_or(crate::protocol::RpcError { message: "unknown error".into(), code: "SESSION_RPC_ERROR".into(), reference: None });
            let kind = parse_kind(&error.code);
            Err(GatewayError::new(kind, "mcp-gateway-daemon", "call", error.message))
        }
    }

    async fn load_service(&self, force_refresh: bool) -> GatewayResult<ServiceInfo> {
        if !force_refresh {
            if let Some(cached) = self.cached_service.lock().clone() {
                return Ok(cached);
            }
        }

        let info = persistence::read_service_info(&self.sessions_dir)
            .await
            .map_err(|_| GatewayError::new(ErrorKind::SessionServiceUnavailable, "mcp-gateway-daemon", "load_service", "no service.json found"))?
            .ok_or_else(|| GatewayError::new(ErrorKind::SessionServiceUnavailable, "mcp-gateway-daemon", "load_service", "no service.json found"))?;

        *self.cached_service.lock() = Some(info.clone());
        Ok(info)
    }

    /// Ping; on failure, invoke `spawn` to start a detached daemon process
    /// and poll up to 2.5s before giving up (spec §4.8 "ensureService").
    pub async fn ensure_service(&self, spawn: impl FnOnce() -> std::io::Result<()>) -> GatewayResult<()> {
        if self.ping().await.is_ok() {
            return Ok(());
        }

        spawn().map_err(|e| io_error("ensure_service", e))?;

        for _ in 0..ENSURE_POLL_ATTEMPTS {
            tokio::time::sleep(ENSURE_POLL_INTERVAL).await;
            if self.ping().await.is_ok() {
                return Ok(());
            }
        }

        Err(GatewayError::new(ErrorKind::SessionServiceUnavailable, "mcp-gateway-daemon", "ensure_service", "daemon did not become reachable in time"))
    }
}

fn parse_kind(code: &str) -> ErrorKind {
    match code {
        "SESSION_UNAUTHORIZED" => ErrorKind::SessionUnauthorized,
        "SESSION_NOT_FOUND" => ErrorKind::SessionNotFound,
        "SESSION_ORPHANED" => ErrorKind::SessionOrphaned,
        "SESSION_EXPIRED_IDLE" => ErrorKind::SessionExpiredIdle,
        "SESSION_EXPIRED_MAX_AGE" => ErrorKind::SessionExpiredMaxAge,
        "SESSION_RPC_FRAME_TOO_LARGE" => ErrorKind::SessionRpcFrameTooLarge,
        "VALIDATION" => ErrorKind::Validation,
        _ => ErrorKind::SessionRpcError,
    }
}

fn ipc_error(method: &str, err: crate::error::IpcError) -> GatewayError {
    match err {
        crate::error::IpcError::FrameTooLarge { .. } => GatewayError::new(ErrorKind::SessionRpcFrameTooLarge, "mcp-gateway-daemon", method, "response frame too large"),
        other => GatewayError::new(ErrorKind::SessionRpcError, "mcp-gateway-daemon", method, other.to_string()),
    }
}

fn io_error(method: &str, err: std::io::Error) -> GatewayError {
    GatewayError::new(ErrorKind::SessionServiceUnavailable, "mcp-gateway-daemon", method, err.to_string())
}

/// Endpoint/socket path helper shared with the server side of this crate.
pub fn socket_path() -> PathBuf {
    persistence::sessions_dir().join(server::SOCKET_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_service_file_is_service_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let client = DaemonClient::new(dir.path().to_path_buf());
        let err = client.ping().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::SessionServiceUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_service_spawns_once_then_polls_until_reachable() {
        let dir = tempfile::tempdir().unwrap();
        let client = DaemonClient::new(dir.path().to_path_buf());
        let spawned = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let spawned_clone = spawned.clone();

        let err = client
            .ensure_service(move || {
                spawned_clone.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(spawned.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(err.kind, ErrorKind::SessionServiceUnavailable);
    }
}
