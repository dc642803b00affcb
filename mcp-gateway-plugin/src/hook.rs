//! Hook trait and priority ordering (C5, spec §4.5).

use async_trait::async_trait;
use serde_json::Value;

use crate::context::PluginContext;
use crate::error::PluginResult;

/// The five stacks a call passes through (spec §4.5): `transport` wraps the
/// raw wire call, `schema` surrounds validation, `before`/`after` bracket
/// dispatch, and `error` runs once on any failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    Transport,
    Schema,
    Before,
    After,
    Error,
}

impl HookPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::Transport => "transport",
            HookPhase::Schema => "schema",
            HookPhase::Before => "before",
            HookPhase::After => "after",
            HookPhase::Error => "error",
        }
    }
}

/// One plugin hook registered into a phase stack (spec §4.5). `execute`
/// receives and may replace the working payload; `meta` fields are merged
/// shallowly across hooks while every other field is replace-on-write (spec
/// §4.5 "mutation merge rule"). Hooks within a phase run in registration
/// order (spec §4.5, §5 — no priority reordering).
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &mut PluginContext, data: &mut Value) -> PluginResult<()>;
}
