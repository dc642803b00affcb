//! Minimal stdio connector (spec §1 names the connector that turns a
//! `ServerSpec` into a live session an external collaborator; this CLI is
//! that collaborator for the `Stdio` variant, grounded in MCP's own
//! line-delimited JSON-RPC 2.0 framing). `Remote` specs are rejected here —
//! a full streamable-HTTP/SSE client is out of scope for this thin entry
//! point and is left to an embedding host.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::Mutex as AsyncMutex;

use mcp_gateway_core::{ErrorKind, GatewayError, GatewayResult, McpCallResult, McpClient, ServerInfo, ServerSpec, Session, TransportKind};
use mcp_gateway_session::SessionFactory;

/// Builds a [`Session`] per configured server name, spawning its `Stdio`
/// command fresh on each cold identity (mirrors the teacher's one-process-
/// per-task worker model in spirit, scaled down to one process per server).
pub struct ProcessSessionFactory {
    servers: HashMap<String, ServerSpec>,
}

impl ProcessSessionFactory {
    pub fn new(servers: HashMap<String, ServerSpec>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl SessionFactory for ProcessSessionFactory {
    async fn create(&self, identity: &str) -> GatewayResult<Session> {
        let spec = self
            .servers
            .get(identity)
            .ok_or_else(|| GatewayError::new(ErrorKind::SessionServerNotFound, "mcp-gateway-cli", "create", "no server configured named {name}").with_var("name", identity))?;

        match spec {
            ServerSpec::Stdio { command, args, env } => {
                let client = ProcessMcpClient::spawn(command, args, env).await?;
                let info = client.server_info().await?;
                Ok(Session::new(identity, command.clone(), TransportKind::Stdio, info, Arc::new(client)))
            }
            ServerSpec::Remote { url, .. } => Err(GatewayError::new(
                ErrorKind::SessionServerRequired,
                "mcp-gateway-cli",
                "create",
                "remote server {url} requires a host-supplied transport; this CLI only spawns stdio servers",
            )
            .with_var("url", url)),
        }
    }
}

/// Speaks line-delimited JSON-RPC 2.0 over a spawned child process's stdio.
struct ProcessMcpClient {
    child: AsyncMutex<Child>,
    stdin: AsyncMutex<ChildStdin>,
    stdout: AsyncMutex<BufReader<tokio::process::ChildStdout>>,
    next_id: AtomicI64,
    info: ServerInfo,
}

impl ProcessMcpClient {
    async fn spawn(command: &str, args: &[String], env: &HashMap<String, String>) -> GatewayResult<Self> {
        let mut child = tokio::process::Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GatewayError::new(ErrorKind::UpstreamError, "mcp-gateway-cli", "spawn", "failed to spawn {command}: {details}").with_var("command", command).with_var("details", e.to_string()))?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = BufReader::new(child.stdout.take().expect("piped stdout"));

        let mut client = Self { child: AsyncMutex::new(child), stdin: AsyncMutex::new(stdin), stdout: AsyncMutex::new(stdout), next_id: AtomicI64::new(1), info: ServerInfo::default() };

        let init_result = client
            .rpc(
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "mcp-gateway-cli", "version": env!("CARGO_PKG_VERSION")},
                }),
            )
            .await?;

        client.info = serde_json::from_value(init_result.get("serverInfo").cloned().unwrap_or(Value::Null)).unwrap_or_default();
        client.notify("notifications/initialized", Value::Null).await?;
        Ok(client)
    }

    async fn rpc(&self, method: &str, params: Value) -> GatewayResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        self.write_line(&request).await?;

        loop {
            let line = self.read_line().await?;
            let frame: Value = serde_json::from_str(&line)?;
            if frame.get("id").and_then(Value::as_i64) != Some(id) {
                continue;
            }
            if let Some(error) = frame.get("error") {
                let code = error.get("code").and_then(Value::as_i64);
                let message = error.get("message").and_then(Value::as_str).unwrap_or("upstream error").to_string();
                return Err(GatewayError::upstream_error("mcp-gateway-cli", method, code, message));
            }
            return Ok(frame.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    async fn notify(&self, method: &str, params: Value) -> GatewayResult<()> {
        let notification = json!({"jsonrpc": "2.0", "method": method, "params": params});
        self.write_line(&notification).await
    }

    async fn write_line(&self, value: &Value) -> GatewayResult<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await.map_err(GatewayError::from)?;
        stdin.flush().await.map_err(GatewayError::from)
    }

    async fn read_line(&self) -> GatewayResult<String> {
        let mut buf = String::new();
        let mut stdout = self.stdout.lock().await;
        let n = stdout.read_line(&mut buf).await.map_err(GatewayError::from)?;
        if n == 0 {
            return Err(GatewayError::new(ErrorKind::UpstreamError, "mcp-gateway-cli", "read", "upstream process closed stdout"));
        }
        Ok(buf)
    }
}

#[async_trait]
impl McpClient for ProcessMcpClient {
    async fn call_tool(&self, name: &str, arguments: Value) -> GatewayResult<McpCallResult> {
        let result = self.rpc("tools/call", json!({"name": name, "arguments": arguments})).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn get_prompt(&self, name: &str, arguments: Value) -> GatewayResult<McpCallResult> {
        let result = self.rpc("prompts/get", json!({"name": name, "arguments": arguments})).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn read_resource(&self, uri: &str) -> GatewayResult<McpCallResult> {
        let result = self.rpc("resources/read", json!({"uri": uri})).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn request(&self, method: &str, params: Value) -> GatewayResult<Value> {
        self.rpc(method, params).await
    }

    async fn server_info(&self) -> GatewayResult<ServerInfo> {
        Ok(self.info.clone())
    }

    async fn close(&self) -> GatewayResult<()> {
        let _ = self.notify("notifications/cancelled", Value::Null).await;
        let mut child = self.child.lock().await;
        let _ = child.start_kill();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_server_name_is_rejected() {
        let factory = ProcessSessionFactory::new(HashMap::new());
        let err = factory.create("missing").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::SessionServerNotFound);
    }

    #[tokio::test]
    async fn remote_spec_is_rejected_as_unsupported_here() {
        let mut servers = HashMap::new();
        servers.insert("remote-one".to_string(), ServerSpec::Remote { url: "https://example.invalid".to_string(), transport_type: None });
        let factory = ProcessSessionFactory::new(servers);
        let err = factory.create("remote-one").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::SessionServerRequired);
    }
}
