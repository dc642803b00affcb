//! Typed configuration surface and `MCP_GATEWAY_*` env overrides (spec §6).

pub mod domains;
pub mod error;
pub mod loader;

pub use domains::{
    DaemonConfig, ErrorsConfig, GatewayConfig, GuardrailsConfig, PolicyConfig, ResilienceConfig, SessionConfig, TelemetryOptions, ValidationConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
