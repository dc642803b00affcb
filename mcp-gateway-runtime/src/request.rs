//! Call request/response shapes (C7, spec §3 `PipelineContext`).

use std::collections::HashMap;

use serde_json::Value;

use mcp_gateway_session::SessionRequest;

/// Method discriminant derived from the JSON-RPC `method` string (spec §3).
/// Anything else passes straight through to `Session::call` unvalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMethod {
    ToolsCall,
    PromptsGet,
    ResourcesRead,
    Other,
}

impl CallMethod {
    pub fn from_str(method: &str) -> Self {
        match method {
            "tools/call" => CallMethod::ToolsCall,
            "prompts/get" => CallMethod::PromptsGet,
            "resources/read" => CallMethod::ResourcesRead,
            _ => CallMethod::Other,
        }
    }
}

/// One inbound call (spec §3 `PipelineContext`): which session to resolve,
/// which upstream method to invoke, and the arguments/metadata riding along.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub session: SessionRequest,
    pub method: String,
    pub params: Value,
    pub meta: HashMap<String, Value>,
    /// Which front door accepted this call (`"daemon"`, `"cli"`, ...), carried
    /// into `PluginContext::surface` (spec §3 `PipelineContext`).
    pub surface: String,
}

impl CallRequest {
    pub fn new(session: SessionRequest, method: impl Into<String>, params: Value) -> Self {
        Self { session, method: method.into(), params, meta: HashMap::new(), surface: "unknown".to_string() }
    }

    pub fn with_meta(mut self, meta: HashMap<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_surface(mut self, surface: impl Into<String>) -> Self {
        self.surface = surface.into();
        self
    }

    /// The catalog item name this call targets, when the method carries one
    /// (`tools/call`, `prompts/get`) — used to look up its schema validator.
    pub fn item_name(&self) -> Option<&str> {
        self.params.get("name").and_then(Value::as_str)
    }

    /// The argument payload to validate/dispatch with, defaulting to an
    /// empty object when the caller omitted `arguments`.
    pub fn arguments(&self) -> Value {
        self.params.get("arguments").cloned().unwrap_or_else(|| Value::Object(Default::default()))
    }
}
