//! Plugin system errors (spec §4.5, §7).

use thiserror::Error;

pub type PluginResult<T> = Result<T, PluginError>;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("hook '{hook_name}' timed out after {timeout_ms}ms")]
    HookTimeout { hook_name: String, timeout_ms: u64 },

    #[error("hook '{hook_name}' failed: {reason}")]
    HookFailed { hook_name: String, reason: String },

    /// A hook-raised error explicitly allowed to bypass `PLUGIN_BLOCKED`
    /// wrapping (spec §4.5 "pass-through allowlist").
    #[error("hook '{hook_name}' raised pass-through error: {reason}")]
    PassThrough { hook_name: String, reason: String },
}

impl PluginError {
    pub fn is_pass_through(&self) -> bool {
        matches!(self, PluginError::PassThrough { .. })
    }
}
