//! Domain configuration structs (spec §6 option surface).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mcp_gateway_core::ServerSpec;
use mcp_gateway_resilience::BreakerConfig;
use mcp_gateway_runtime::GuardrailsProfile;
use mcp_gateway_schema::SafetyBounds;
use mcp_gateway_session::AuthMode;

/// `validation` (spec §6): safety bounds plus the trust override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_schema_depth: usize,
    pub max_schema_size: usize,
    pub max_pattern_length: usize,
    pub max_tool_name_length: usize,
    pub max_template_param_length: usize,
    /// `"auto"` (the default) derives trust from transport locality;
    /// `"trusted"`/`"untrusted"` force it for every session.
    pub trust: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        let bounds = SafetyBounds::default();
        Self {
            max_schema_depth: bounds.max_schema_depth,
            max_schema_size: bounds.max_schema_size,
            max_pattern_length: bounds.max_pattern_length,
            max_tool_name_length: bounds.max_tool_name_length,
            max_template_param_length: bounds.max_template_param_length,
            trust: "auto".to_string(),
        }
    }
}

impl ValidationConfig {
    pub fn safety_bounds(&self) -> SafetyBounds {
        SafetyBounds {
            max_schema_depth: self.max_schema_depth,
            max_schema_size: self.max_schema_size,
            max_pattern_length: self.max_pattern_length,
            max_tool_name_length: self.max_tool_name_length,
            max_template_param_length: self.max_template_param_length,
        }
    }
}

/// `resilience` (spec §6), serializable mirror of [`BreakerConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub error_threshold_percentage: f64,
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
    pub volume_threshold: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        let d = BreakerConfig::default();
        Self {
            enabled: d.enabled,
            timeout: d.timeout,
            error_threshold_percentage: d.error_threshold_percentage,
            reset_timeout: d.reset_timeout,
            volume_threshold: d.volume_threshold,
        }
    }
}

impl ResilienceConfig {
    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            enabled: self.enabled,
            timeout: self.timeout,
            error_threshold_percentage: self.error_threshold_percentage,
            reset_timeout: self.reset_timeout,
            volume_threshold: self.volume_threshold,
        }
    }
}

/// `session` (spec §6): pool sizing, idle TTL, and the auth mode used to
/// key pooled sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max: usize,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    pub auth_mode: AuthMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max: 100, ttl: Duration::from_secs(600), auth_mode: AuthMode::Anonymous }
    }
}

/// `guardrails` (spec §6, §4.8 policy lock).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailsConfig {
    pub profile: String,
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self { profile: "default".to_string() }
    }
}

impl GuardrailsConfig {
    pub fn resolve(&self) -> GuardrailsProfile {
        match self.profile.as_str() {
            "strict" => GuardrailsProfile::Strict,
            _ => GuardrailsProfile::Default,
        }
    }
}

/// `policy` (spec §4.7, §6 "Policy lock"): refuses `Runtime` construction
/// when `lock=true` unless `guardrails.profile=strict` with no custom
/// plugins registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub lock: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self { lock: false }
    }
}

/// `errors` (spec §4.7, §7 `exposeDetails`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorsConfig {
    pub expose_details: bool,
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self { expose_details: false }
    }
}

/// `telemetry` (spec §6, SPEC_FULL.md §2 in-process counters).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryOptions {
    pub enabled: bool,
    pub service_name: String,
    pub metric_prefix: String,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        let d = mcp_gateway_runtime::TelemetryConfig::default();
        Self { enabled: d.enabled, service_name: d.service_name, metric_prefix: d.metric_prefix }
    }
}

impl TelemetryOptions {
    pub fn to_runtime_telemetry(&self) -> mcp_gateway_runtime::TelemetryConfig {
        mcp_gateway_runtime::TelemetryConfig {
            enabled: self.enabled,
            service_name: self.service_name.clone(),
            metric_prefix: self.metric_prefix.clone(),
        }
    }
}

/// `daemon` (spec §6, §4.8, C9): local IPC endpoint and lifecycle knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: Option<String>,
    pub max_sessions: usize,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub max_session_age: Duration,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub socket_timeout: Duration,
    pub max_frame_bytes: usize,
    pub event_log_max_bytes: u64,
    pub event_log_max_files: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            max_sessions: 100,
            idle_timeout: Duration::from_secs(1800),
            max_session_age: Duration::from_secs(3600 * 8),
            sweep_interval: Duration::from_secs(60),
            socket_timeout: Duration::from_secs(300),
            max_frame_bytes: 1024 * 1024,
            event_log_max_bytes: 10 * 1024 * 1024,
            event_log_max_files: 5,
        }
    }
}

/// Full gateway configuration (spec §6). `servers` is the only field
/// without a sensible default — a gateway with no upstreams configured is
/// valid but useless, so it's left empty rather than rejected at parse time.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub servers: HashMap<String, ServerSpec>,
    pub validation: ValidationConfig,
    pub resilience: ResilienceConfig,
    pub session: SessionConfig,
    pub guardrails: GuardrailsConfig,
    pub daemon: DaemonConfig,
    pub custom_plugins: Vec<String>,
    pub policy: PolicyConfig,
    pub errors: ErrorsConfig,
    pub telemetry: TelemetryOptions,
    /// `prefix` (spec §4.7, §6): a fixed string, or unset for the `/{version}`
    /// default. The function form is only reachable by constructing
    /// `RuntimeConfig` directly, not through file/env config.
    pub prefix: Option<String>,
}

impl GatewayConfig {
    pub fn has_custom_plugins(&self) -> bool {
        !self.custom_plugins.is_empty()
    }
}
