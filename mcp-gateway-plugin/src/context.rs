//! Per-call plugin execution context (spec §4.5, §3 `PipelineContext`).

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use mcp_gateway_core::{Catalog, Session};
use mcp_gateway_resilience::CircuitBreaker;

/// One recorded hook invocation, collected when tracing is enabled (spec
/// §4.5 "Plugin trace"). Never affects pipeline outcome.
#[derive(Debug, Clone, Serialize)]
pub struct PluginTraceEntry {
    pub phase: String,
    pub hook: String,
    pub duration_ms: u64,
    pub outcome: String,
}

/// Carried through a pipeline run. `meta` is the only field merged shallowly
/// across hook invocations; everything a hook wants to share more
/// structurally should live under a key in `meta`.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub call_id: Uuid,
    pub surface: String,
    pub session_name: String,
    pub method: String,
    pub session: Option<Session>,
    pub breaker: Option<CircuitBreaker>,
    pub catalog: Option<Catalog>,
    pub meta: HashMap<String, Value>,
    pub trace: Vec<PluginTraceEntry>,
    pub trace_enabled: bool,
}

impl PluginContext {
    pub fn new(session_name: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            surface: "unknown".to_string(),
            session_name: session_name.into(),
            method: method.into(),
            session: None,
            breaker: None,
            catalog: None,
            meta: HashMap::new(),
            trace: Vec::new(),
            trace_enabled: false,
        }
    }

    pub fn with_surface(mut self, surface: impl Into<String>) -> Self {
        self.surface = surface.into();
        self
    }

    pub fn with_trace_enabled(mut self, enabled: bool) -> Self {
        self.trace_enabled = enabled;
        self
    }

    /// Shallow-merge `incoming` into `meta`, per spec §4.5 merge rule: keys a
    /// hook did not touch are preserved, keys it set overwrite the previous
    /// value.
    pub fn merge_meta(&mut self, incoming: HashMap<String, Value>) {
        for (k, v) in incoming {
            self.meta.insert(k, v);
        }
    }
}
