//! Session and transport (C1, spec §3, §4.1).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ErrorKind, GatewayError, GatewayResult};

/// Immutable description of how to reach one upstream server (spec §3).
/// Exactly one of the two shapes is populated; the connector that turns this
/// into a [`Session`] is an external collaborator (§1 Non-goals).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerSpec {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Remote {
        url: String,
        #[serde(rename = "type", default)]
        transport_type: Option<RemoteTransportType>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteTransportType {
    Http,
    Sse,
}

impl ServerSpec {
    /// Transport auto-selection rules (spec §4.1): `url` set → streamable-http
    /// unless overridden to `sse`; `command` set → stdio.
    pub fn transport_kind(&self) -> TransportKind {
        match self {
            ServerSpec::Stdio { .. } => TransportKind::Stdio,
            ServerSpec::Remote { transport_type, .. } => match transport_type {
                Some(RemoteTransportType::Sse) => TransportKind::Sse,
                _ => TransportKind::StreamableHttp,
            },
        }
    }

    pub fn source(&self) -> String {
        match self {
            ServerSpec::Stdio { command, .. } => command.clone(),
            ServerSpec::Remote { url, .. } => url.clone(),
        }
    }
}

/// The four transport variants (spec §4.1). They compose identically behind
/// [`McpClient`] — this enum only records which one a session is using, for
/// diagnostics and trust-mode decisions (spec §4.3, §6 `trustSchemas: auto`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Stdio,
    StreamableHttp,
    Sse,
    InMemory,
}

impl TransportKind {
    /// Whether a source using this transport is "local" for the purposes of
    /// the `trustSchemas: auto` rule (spec §6): in-memory/stdio are trusted
    /// by default, remote HTTP/SSE are not.
    pub fn is_local(self) -> bool {
        matches!(self, TransportKind::InMemory | TransportKind::Stdio)
    }
}

/// Server name/version/instructions as reported by the upstream (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// JSON-RPC-shaped result of an upstream call. `is_error` distinguishes a
/// tool-level failure (surfaced, not wrapped — spec §7) from a transport or
/// gateway-level failure which is returned as an `Err(GatewayError)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpCallResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl McpCallResult {
    pub fn ok(content: Vec<Value>) -> Self {
        Self {
            content,
            is_error: false,
            extra: Default::default(),
        }
    }

    pub fn error(content: Vec<Value>) -> Self {
        Self {
            content,
            is_error: true,
            extra: Default::default(),
        }
    }
}

/// The external wire-protocol client contract assumed by spec §1: an
/// implementation of this trait is the thin collaborator that actually
/// speaks MCP over stdio/HTTP/SSE. The gateway only consumes it.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Value) -> GatewayResult<McpCallResult>;
    async fn get_prompt(&self, name: &str, arguments: Value) -> GatewayResult<McpCallResult>;
    async fn read_resource(&self, uri: &str) -> GatewayResult<McpCallResult>;
    async fn request(&self, method: &str, params: Value) -> GatewayResult<Value>;
    async fn server_info(&self) -> GatewayResult<ServerInfo>;
    async fn close(&self) -> GatewayResult<()>;
}

/// One live connection to one upstream MCP server (spec §3).
///
/// Invariant: once closed, a session is terminal — any further call fails
/// with [`ErrorKind::SessionInternal`] rather than silently reconnecting.
#[derive(Clone)]
pub struct Session {
    name: String,
    source: String,
    transport_kind: TransportKind,
    info: ServerInfo,
    client: Arc<dyn McpClient>,
    closed: Arc<AtomicBool>,
}

impl Session {
    pub fn new(name: impl Into<String>, source: impl Into<String>, transport_kind: TransportKind, info: ServerInfo, client: Arc<dyn McpClient>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            transport_kind,
            info,
            client,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport_kind
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> GatewayResult<()> {
        if self.is_closed() {
            return Err(GatewayError::new(
                ErrorKind::SessionInternal,
                "mcp-gateway-core",
                "call",
                "session {name} is closed",
            )
            .with_var("name", self.name.clone()));
        }
        Ok(())
    }

    pub async fn call(&self, method: &str, params: Value) -> GatewayResult<Value> {
        self.check_open()?;
        self.client.request(method, params).await
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> GatewayResult<McpCallResult> {
        self.check_open()?;
        self.client.call_tool(name, arguments).await
    }

    pub async fn get_prompt(&self, name: &str, arguments: Value) -> GatewayResult<McpCallResult> {
        self.check_open()?;
        self.client.get_prompt(name, arguments).await
    }

    pub async fn read_resource(&self, uri: &str) -> GatewayResult<McpCallResult> {
        self.check_open()?;
        self.client.read_resource(uri).await
    }

    /// Terminates the underlying transport exactly once. Subsequent calls
    /// are no-ops.
    pub async fn close(&self) -> GatewayResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.client.close().await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("transport_kind", &self.transport_kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use tokio::sync::Mutex;

    /// An in-memory [`McpClient`] double for tests (spec §4.1 "in-memory"
    /// transport variant).
    pub struct InMemoryClient {
        pub info: ServerInfo,
        pub tools: Vec<(String, Value)>,
        pub calls: Mutex<Vec<(String, Value)>>,
        pub closed: AtomicBool,
        pub fail_with: Option<GatewayError>,
        pub sleep_ms: u64,
    }

    impl InMemoryClient {
        pub fn new(info: ServerInfo) -> Self {
            Self {
                info,
                tools: Vec::new(),
                calls: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                fail_with: None,
                sleep_ms: 0,
            }
        }
    }

    #[async_trait]
    impl McpClient for InMemoryClient {
        async fn call_tool(&self, name: &str, arguments: Value) -> GatewayResult<McpCallResult> {
            if self.sleep_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.sleep_ms)).await;
            }
            self.calls.lock().await.push((name.to_string(), arguments.clone()));
            if name == "echo" {
                let text = arguments.get("text").cloned().unwrap_or(Value::Null);
                return Ok(McpCallResult::ok(vec![serde_json::json!({"type": "text", "text": text})]));
            }
            if name == "fail-gracefully" {
                return Ok(McpCallResult::error(vec![serde_json::json!({"type": "text", "text": "boom"})]));
            }
            Err(GatewayError::new(ErrorKind::UpstreamError, "test", "call_tool", "unknown tool {name}").with_var("name", name))
        }

        async fn get_prompt(&self, _name: &str, _arguments: Value) -> GatewayResult<McpCallResult> {
            Ok(McpCallResult::ok(vec![]))
        }

        async fn read_resource(&self, _uri: &str) -> GatewayResult<McpCallResult> {
            Ok(McpCallResult::ok(vec![]))
        }

        async fn request(&self, method: &str, params: Value) -> GatewayResult<Value> {
            match method {
                "tools/call" => {
                    let name = params.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
                    let result = self.call_tool(&name, arguments).await?;
                    Ok(serde_json::to_value(result)?)
                }
                _ => Ok(Value::Null),
            }
        }

        async fn server_info(&self) -> GatewayResult<ServerInfo> {
            Ok(self.info.clone())
        }

        async fn close(&self) -> GatewayResult<()> {
            self.closed.store(true, Ordering::Release);
            Ok(())
        }
    }

    pub fn in_memory_session(name: &str, client: Arc<InMemoryClient>) -> Session {
        let info = client.info.clone();
        Session::new(name, "in-memory", TransportKind::InMemory, info, client)
    }
}
