//! Background expiration sweep (spec §4.8 "Expiration"): runs on a timer in
//! addition to the lazy per-lookup sweep in [`crate::daemon::Daemon`].

use std::sync::Arc;
use std::time::Duration;

use crate::daemon::Daemon;

pub async fn run(daemon: Arc<Daemon>, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                daemon.sweep_expired();
                if let Err(err) = daemon.persist().await {
                    tracing::warn!(error = %err, "failed to persist session registry after sweep");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::DaemonLifecycle;
    use async_trait::async_trait;
    use mcp_gateway_core::{GatewayResult, McpCallResult, ServerInfo, Session, TransportKind};
    use mcp_gateway_plugin::Pipeline;
    use mcp_gateway_runtime::{Runtime, RuntimeConfig};
    use mcp_gateway_session::{ManagerConfig, SessionFactory};
    use serde_json::{json, Value};

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

    #[tokio::test(start_paused = true)]
    async fn sweep_expires_idle_sessions_on_its_own_timer() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(Runtime::new(RuntimeConfig::default(), Arc::new(EchoFactory), Arc::new(Pipeline::new()), ManagerConfig::default()).unwrap());
        let lifecycle = DaemonLifecycle {
            max_sessions: 10,
            idle_timeout: Duration::from_millis(10),
            max_session_age: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
            max_frame_bytes: 1024 * 1024,
            socket_timeout: Duration::from_secs(300),
            event_log_max_bytes: 1024 * 1024,
            event_log_max_files: 5,
        };
        let daemon = Arc::new(Daemon::new(runtime, lifecycle, "/tmp/test.sock".to_string(), dir.path().to_path_buf()));
        daemon.open("alpha", None).await.unwrap();

        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(run(daemon.clone(), Duration::from_millis(20), rx));

        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;

        let entries = daemon.list();
        assert_eq!(entries[0].status, crate::registry::SessionStatus::ExpiredIdle);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
