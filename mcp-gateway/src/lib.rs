//! Facade crate for the MCP gateway toolkit: wires the single-purpose
//! `mcp-gateway-*` crates into one dependency for an embedding host, the
//! way `ratchet-lib` fronts the `ratchet-*` workspace.
//!
//! Embedders construct a [`Runtime`] with their own [`SessionFactory`]
//! (turning a [`ServerSpec`] into a live connection is an external
//! collaborator, spec §1) and call [`Runtime::execute`] per request, or run
//! [`mcp_gateway_daemon::run`] to expose the same runtime as a stateful
//! local daemon (spec §4.8).

pub use mcp_gateway_core::{
    Catalog, CatalogItem, CatalogItemKind, ErrorKind, GatewayError, GatewayResult, ItemDetail, McpCallResult, McpClient, NormalizedError,
    RemoteTransportType, ServerInfo, ServerSpec, Session, TransportKind,
};
pub use mcp_gateway_core::{extract_catalog, map_error_kind, map_jsonrpc_code, PolicyMapping};

pub use mcp_gateway_schema::{resolve_trust_mode, SafetyBounds, TrustMode, ValidationIssue, ValidationOutcome, ValidatorKind, ValidatorRegistry};

pub use mcp_gateway_resilience::{BreakerConfig, BreakerPhase, CircuitBreaker};

pub use mcp_gateway_plugin::{Hook, HookPhase, Pipeline, PluginContext, PluginError, PluginResult, TraceSink};

pub use mcp_gateway_session::{AuthMode, ManagerConfig, ManagerStats, SessionFactory, SessionManager, SessionRequest};

pub use mcp_gateway_runtime::{CallMethod, CallRequest, GuardrailsProfile, PrefixFn, PrefixOption, Runtime, RuntimeConfig, TelemetryConfig, TelemetrySnapshot};

pub use mcp_gateway_config::{
    ConfigError, ConfigLoader, ConfigResult, DaemonConfig, ErrorsConfig, GatewayConfig, GuardrailsConfig, PolicyConfig, ResilienceConfig, SessionConfig,
    TelemetryOptions, ValidationConfig,
};

/// The stateful local daemon (C9, spec §4.8): re-exported as a module
/// rather than flattened, since its surface (client, wire protocol,
/// persistence) is large enough to want its own namespace.
pub mod daemon {
    pub use mcp_gateway_daemon::{client::DaemonClient, daemon::DaemonLifecycle, error::{IpcError, IpcResult}, registry::{ServiceInfo, SessionRegistryEntry, SessionStatus}, run};
}
