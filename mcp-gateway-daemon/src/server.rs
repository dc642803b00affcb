//! Unix domain socket listener and per-connection RPC loop (spec §4.8).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};

use mcp_gateway_core::{ErrorKind, GatewayError};

use crate::daemon::Daemon;
use crate::error::{IpcError, IpcResult};
use crate::protocol::{read_frame, write_frame, RpcError, RpcRequest, RpcResponse};

pub const SOCKET_FILE_NAME: &str = "stateful.sock";

/// Bind the socket at `path` with mode `0o600`, after creating its `0o700`
/// parent directory (spec §4.8). Fails with `SESSION_SERVICE_RUNNING` if
/// another process already answers there.
pub async fn bind(path: &std::path::Path) -> IpcResult<UnixListener> {
    if path.exists() {
        if UnixStream::connect(path).await.is_ok() {
            return Err(IpcError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "a daemon is already listening on this socket",
            )));
        }
        let _ = tokio::fs::remove_file(path).await;
    }

    let listener = UnixListener::bind(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(listener)
}

/// Accept connections until `shutdown` resolves, serving each on its own task.
pub async fn serve(listener: UnixListener, daemon: Arc<Daemon>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let daemon = daemon.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, daemon).await {
                                tracing::debug!(error = %err, "daemon connection closed");
                            }
                        });
                    }
                    Err(err) => tracing::warn!(error = %err, "accept failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, daemon: Arc<Daemon>) -> IpcResult<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let timeout = daemon.lifecycle.socket_timeout;
    let max_frame_bytes = daemon.lifecycle.max_frame_bytes;

    loop {
        let frame = tokio::time::timeout(timeout, read_frame::<_, RpcRequest>(&mut reader, max_frame_bytes)).await;
        let request = match frame {
            Ok(Ok(req)) => req,
            Ok(Err(IpcError::ConnectionClosed)) => return Ok(()),
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(IpcError::IdleTimeout),
        };

        let response = dispatch(&daemon, request).await;
        write_frame(&mut write_half, response).await?;
    }
}

async fn dispatch(daemon: &Daemon, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();

    if request.method != "health.ping" {
        if let Err(err) = daemon.check_token(&request.token) {
            return RpcResponse::err(id, RpcError::from(&err));
        }
    }

    let result = run_method(daemon, &request.method, request.params).await;
    match result {
        Ok(value) => RpcResponse::ok(id, value),
        Err(err) => RpcResponse::err(id, RpcError::from(&err)),
    }
}

async fn run_method(daemon: &Daemon, method: &str, params: Value) -> Result<Value, GatewayError> {
    match method {
        "health.ping" => Ok(daemon.health().await),

        "session.open" => {
            let name = required_str(&params, "name")?;
            let server_spec = params.get("serverSpec").cloned();
            let reused = daemon.open(name, server_spec).await?;
            Ok(serde_json::json!({"reused": reused}))
        }

        "session.execute" => {
            let name = required_str(&params, "name")?;
            let call_method = required_str(&params, "method")?;
            let call_params = params.get("params").cloned().unwrap_or(Value::Null);
            let meta: HashMap<String, Value> = params
                .get("meta")
                .and_then(|m| m.as_object())
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            let result = daemon.execute(name, call_method, call_params, meta).await?;
            serde_json::to_value(result).map_err(Into::into)
        }

        "session.catalog" => {
            let name = required_str(&params, "name")?;
            daemon.catalog(name).await
        }

        "session.list" => {
            let entries = daemon.list();
            serde_json::to_value(entries).map_err(Into::into)
        }

        "session.stop" => {
            let name = required_str(&params, "name")?;
            daemon.stop(name).await?;
            Ok(serde_json::json!({"stopped": true}))
        }

        "session.stopAll" => {
            daemon.stop_all().await;
            Ok(serde_json::json!({"stopped": true}))
        }

        "daemon.shutdown" => {
            daemon.request_shutdown();
            Ok(serde_json::json!({"shuttingDown": true}))
        }

        other => Err(GatewayError::new(ErrorKind::SessionRpcUnknown, "mcp-gateway-daemon", "dispatch", "unknown method {method}").with_var("method", other)),
    }
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, GatewayError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::new(ErrorKind::SessionRpcInvalidJson, "mcp-gateway-daemon", "dispatch", "missing required param {key}").with_var("key", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::DaemonLifecycle;
    use async_trait::async_trait;
    use mcp_gateway_core::{GatewayResult, McpCallResult, ServerInfo, Session, TransportKind};
    use mcp_gateway_plugin::Pipeline;
    use mcp_gateway_runtime::{Runtime, RuntimeConfig};
    use mcp_gateway_session::{ManagerConfig, SessionFactory};
    use serde_json::json;

    struct EchoClient;

    #[async_trait]
    impl mcp_gateway_core::McpClient for EchoClient {
        async fn call_tool(&self, _name: &str, arguments: Value) -> GatewayResult<McpCallResult> {
            Ok(McpCallResult::ok(vec![arguments]))
        }
        async fn get_prompt(&self, _name: &str, _arguments: Value) -> GatewayResult<McpCallResult> {
            Ok(McpCallResult::ok(vec![]))
        }
        async fn read_resource(&self, _uri: &str) -> GatewayResult<McpCallResult> {
            Ok(McpCallResult::ok(vec![]))
        }
        async fn request(&self, method: &str, _params: Value) -> GatewayResult<Value> {
            match method {
                "tools/list" => Ok(json!({"tools": []})),
                "prompts/list" => Ok(json!({"prompts": []})),
                "resources/list" => Ok(json!({"resources": []})),
                "resource-templates/list" => Ok(json!({"resourceTemplates": []})),
                _ => Ok(Value::Null),
            }
        }
        async fn server_info(&self) -> GatewayResult<ServerInfo> {
            Ok(ServerInfo { name: "echo".into(), version: "1.0.0".into(), instructions: None })
        }
        async fn close(&self) -> GatewayResult<()> {
            Ok(())
        }
    }

    struct EchoFactory;

    #[async_trait]
    impl SessionFactory for EchoFactory {
        async fn create(&self, identity: &str) -> GatewayResult<Session> {
            Ok(Session::new(identity, "in-memory", TransportKind::InMemory, ServerInfo { name: "echo".into(), version: "1.0.0".into(), instructions: None }, Arc::new(EchoClient)))
        }
    }

    fn daemon(dir: &std::path::Path) -> Daemon {
        let runtime = Arc::new(Runtime::new(RuntimeConfig::default(), Arc::new(EchoFactory), Arc::new(Pipeline::new()), ManagerConfig::default()).unwrap());
        let lifecycle = DaemonLifecycle {
            max_sessions: 10,
            idle_timeout: std::time::Duration::from_secs(600),
            max_session_age: std::time::Duration::from_secs(3600),
            sweep_interval: std::time::Duration::from_secs(60),
            max_frame_bytes: 1024 * 1024,
            socket_timeout: std::time::Duration::from_secs(300),
            event_log_max_bytes: 1024 * 1024,
            event_log_max_files: 5,
        };
        Daemon::new(runtime, lifecycle, "/tmp/test.sock".to_string(), dir.to_path_buf())
    }

    #[tokio::test]
    async fn health_ping_requires_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let d = daemon(dir.path());
        let req = RpcRequest { id: "1".into(), method: "health.ping".into(), params: Value::Null, token: String::new() };
        let resp = dispatch(&d, req).await;
        assert!(resp.ok);
    }

    #[tokio::test]
    async fn mismatched_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let d = daemon(dir.path());
        let req = RpcRequest { id: "1".into(), method: "session.list".into(), params: Value::Null, token: "wrong".into() };
        let resp = dispatch(&d, req).await;
        assert!(!resp.ok);
        assert_eq!(resp.error.unwrap().code, "SESSION_UNAUTHORIZED");
    }

    #[tokio::test]
    async fn session_open_then_execute_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let d = daemon(dir.path());
        let token = d.token.clone();

        let open_req = RpcRequest { id: "1".into(), method: "session.open".into(), params: json!({"name": "alpha"}), token: token.clone() };
        let open_resp = dispatch(&d, open_req).await;
        assert!(open_resp.ok);
        assert_eq!(open_resp.result.unwrap()["reused"], json!(false));

        let exec_req = RpcRequest {
            id: "2".into(),
            method: "session.execute".into(),
            params: json!({"name": "alpha", "method": "tools/list", "params": {}}),
            token,
        };
        let exec_resp = dispatch(&d, exec_req).await;
        assert!(exec_resp.ok);
    }
}
