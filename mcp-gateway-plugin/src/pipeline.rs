//! Phase-stack pipeline execution (C5, spec §4.5).

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use mcp_gateway_core::{ErrorKind, GatewayError, GatewayResult};

use crate::context::{PluginContext, PluginTraceEntry};
use crate::error::PluginError;
use crate::hook::{Hook, HookPhase};

/// Invoked with every collected trace entry once a phase finishes, when
/// tracing is enabled (spec §4.5 "trace sink"). A sink failure is logged and
/// otherwise ignored: it must never affect the call outcome.
pub type TraceSink = Arc<dyn Fn(&PluginTraceEntry) + Send + Sync>;

const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_millis(2000);

/// Holds the five ordered hook stacks and runs them around a call (spec
/// §4.5). One `Pipeline` is shared across every session, so hooks must be
/// stateless or internally synchronized.
pub struct Pipeline {
    stacks: std::collections::HashMap<HookPhase, Vec<Arc<dyn Hook>>>,
    hook_timeout: Duration,
    trace_sink: Option<TraceSink>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { stacks: std::collections::HashMap::new(), hook_timeout: DEFAULT_HOOK_TIMEOUT, trace_sink: None }
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn with_trace_sink(mut self, sink: TraceSink) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    /// Register a hook into `phase`. Hooks within a phase run in the order
    /// they were registered (spec §4.5, §5).
    pub fn register(&mut self, phase: HookPhase, hook: Arc<dyn Hook>) {
        self.stacks.entry(phase).or_default().push(hook);
    }

    pub fn is_empty(&self, phase: HookPhase) -> bool {
        self.stacks.get(&phase).map(|s| s.is_empty()).unwrap_or(true)
    }

    /// Run every hook registered for `phase` against `data`, in order.
    /// Non-pass-through hook failures are wrapped into `PLUGIN_BLOCKED`;
    /// pass-through kinds (spec §7 `ErrorKind::is_pass_through`) propagate
    /// unchanged so callers can distinguish policy decisions from plugin
    /// bugs.
    pub async fn run_phase(&self, source_package: &str, phase: HookPhase, ctx: &mut PluginContext, data: &mut Value) -> GatewayResult<()> {
        let Some(stack) = self.stacks.get(&phase) else {
            return Ok(());
        };

        for hook in stack {
            let started = Instant::now();

            let outcome = tokio::time::timeout(self.hook_timeout, hook.execute(ctx, data)).await;

            let (result, label) = match outcome {
                Ok(Ok(())) => (Ok(()), "ok"),
                Ok(Err(err)) => {
                    let gateway_err = self.translate(source_package, phase, hook.name(), err);
                    let label = if gateway_err.kind.is_pass_through() { "pass_through" } else { "blocked" };
                    (Err(gateway_err), label)
                }
                Err(_) => {
                    let gateway_err = GatewayError::plugin_timeout(source_package, hook.name(), phase.as_str());
                    (Err(gateway_err), "timeout")
                }
            };

            if ctx.trace_enabled {
                let entry = PluginTraceEntry {
                    phase: phase.as_str().to_string(),
                    hook: hook.name().to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    outcome: label.to_string(),
                };
                if let Some(sink) = &self.trace_sink {
                    sink(&entry);
                }
                ctx.trace.push(entry);
            }

            result?;
        }

        Ok(())
    }

    fn translate(&self, source_package: &str, phase: HookPhase, hook_name: &str, err: PluginError) -> GatewayError {
        if err.is_pass_through() {
            GatewayError::new(ErrorKind::GuardrailDenied, source_package, "pipeline", err.to_string())
                .with_var("plugin", hook_name)
                .with_var("phase", phase.as_str())
        } else {
            GatewayError::plugin_blocked(source_package, hook_name, phase.as_str(), err)
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
