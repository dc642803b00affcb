//! Runtime composition (C7/C8, spec §4.7-§4.8): wires the session pool,
//! catalog/validator cache, circuit breakers, and plugin pipeline into one
//! `execute()` call surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use mcp_gateway_core::{Catalog, CatalogItemKind, GatewayError, GatewayResult, McpCallResult, ServerInfo, Session};
use mcp_gateway_plugin::{HookPhase, Pipeline, PluginContext};
use mcp_gateway_resilience::{BreakerConfig, BreakerPhase, CircuitBreaker};
use mcp_gateway_schema::{resolve_trust_mode, SafetyBounds, ValidatorKind, ValidatorRegistry};
use mcp_gateway_session::{SessionFactory, SessionManager, SessionRequest};

use crate::request::{CallMethod, CallRequest};

/// `guardrails.profile` (spec §6): `strict` is required, alongside an empty
/// custom-plugin set, to unlock `policy.lock=true` at construction (spec
/// §4.7 "policy lock").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardrailsProfile {
    Default,
    Strict,
}

/// A function computing a session's URL/method prefix from its derived
/// `version`, upstream `info`, and session name (spec §4.7 `prefix`).
pub type PrefixFn = Arc<dyn Fn(&str, &ServerInfo, &str) -> String + Send + Sync>;

/// `prefix` option (spec §4.7, §6 Runtime options): a function, a fixed
/// string, or (by default) `/{version}`.
#[derive(Clone)]
pub enum PrefixOption {
    Fn(PrefixFn),
    Fixed(String),
    Default,
}

impl std::fmt::Debug for PrefixOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrefixOption::Fn(_) => write!(f, "PrefixOption::Fn(..)"),
            PrefixOption::Fixed(s) => write!(f, "PrefixOption::Fixed({s:?})"),
            PrefixOption::Default => write!(f, "PrefixOption::Default"),
        }
    }
}

impl Default for PrefixOption {
    fn default() -> Self {
        PrefixOption::Default
    }
}

/// `telemetry {enabled, serviceName, metricPrefix}` (spec §6). When
/// disabled, counters still accumulate in-process (cheap) but no surface is
/// expected to read them.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub service_name: String,
    pub metric_prefix: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { enabled: false, service_name: "mcp-gateway".to_string(), metric_prefix: "adapter".to_string() }
    }
}

/// In-process counters wired to `telemetry` (SPEC_FULL.md §2): call count,
/// error count, and breaker transition count, snapshotted via
/// [`Runtime::telemetry_snapshot`].
#[derive(Debug, Default, Clone)]
struct TelemetryCounters {
    calls: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
    breaker_transitions: Arc<AtomicU64>,
}

/// A point-in-time read of [`TelemetryCounters`] (spec §6 `telemetry`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TelemetrySnapshot {
    pub calls: u64,
    pub errors: u64,
    pub breaker_transitions: u64,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub guardrails_profile: GuardrailsProfile,
    pub has_custom_plugins: bool,
    pub breaker_config: BreakerConfig,
    pub safety_bounds: SafetyBounds,
    pub prefix: PrefixOption,
    pub telemetry: TelemetryConfig,
    /// `policy.lock` (spec §4.7): refuses construction unless
    /// `guardrails_profile == Strict` and `!has_custom_plugins`.
    pub policy_lock: bool,
    /// `errors.exposeDetails` (spec §7): whether `normalize()` renders the
    /// upstream message in outbound responses. Defaults to `false`.
    pub expose_error_details: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            guardrails_profile: GuardrailsProfile::Default,
            has_custom_plugins: false,
            breaker_config: BreakerConfig::default(),
            safety_bounds: SafetyBounds::default(),
            prefix: PrefixOption::Default,
            telemetry: TelemetryConfig::default(),
            policy_lock: false,
            expose_error_details: false,
        }
    }
}

/// Derive `version` from upstream `info.version` (spec §4.7): strip a
/// leading `v`, take a leading integer (`v{N}`), else a leading `YYYY-` date
/// prefix (`v{YYYY}`), else `v0`.
fn derive_version(info: &ServerInfo) -> String {
    let raw = info.version.trim();
    let stripped = raw.strip_prefix('v').unwrap_or(raw);

    let leading_digits: String = stripped.chars().take_while(|c| c.is_ascii_digit()).collect();
    if !leading_digits.is_empty() {
        return format!("v{leading_digits}");
    }

    if stripped.len() >= 5 && stripped.as_bytes()[4] == b'-' && stripped[..4].chars().all(|c| c.is_ascii_digit()) {
        return format!("v{}", &stripped[..4]);
    }

    "v0".to_string()
}

fn resolve_prefix(option: &PrefixOption, version: &str, info: &ServerInfo, session_name: &str) -> String {
    match option {
        PrefixOption::Fn(f) => f(version, info, session_name),
        PrefixOption::Fixed(s) => s.clone(),
        PrefixOption::Default => format!("/{version}"),
    }
}

struct SessionRuntimeState {
    catalog: Catalog,
    validators: Arc<ValidatorRegistry>,
    breaker: CircuitBreaker,
    info: ServerInfo,
    version: String,
    prefix: String,
    expose_error_details: bool,
    telemetry: TelemetryCounters,
}

/// Composes C2 (catalog extraction), C3 (validation), C4 (breaker), C5
/// (plugins), and C6 (session pool) behind a single `execute()` entry point
/// (spec §4.7-§4.8).
pub struct Runtime {
    sessions: Arc<SessionManager>,
    pipeline: Arc<Pipeline>,
    config: RuntimeConfig,
    per_session: Mutex<HashMap<String, Arc<SessionRuntimeState>>>,
    telemetry: TelemetryCounters,
}

impl Runtime {
    /// Construct a `Runtime`. Fails with `POLICY_LOCKED` when
    /// `config.policy_lock` is set but `guardrails_profile` isn't `Strict`
    /// or custom plugins are registered (spec §4.7 "Policy lock").
    pub fn new(
        config: RuntimeConfig,
        factory: Arc<dyn SessionFactory>,
        pipeline: Arc<Pipeline>,
        manager_config: mcp_gateway_session::ManagerConfig,
    ) -> GatewayResult<Self> {
        if config.policy_lock {
            let unlocked = config.guardrails_profile == GuardrailsProfile::Strict && !config.has_custom_plugins;
            if !unlocked {
                return Err(GatewayError::policy_locked(
                    "mcp-gateway-runtime",
                    "policy.lock requires guardrails.profile=strict and no custom plugins",
                ));
            }
        }

        Ok(Self {
            sessions: Arc::new(SessionManager::new(manager_config, factory)),
            pipeline,
            config,
            per_session: Mutex::new(HashMap::new()),
            telemetry: TelemetryCounters::default(),
        })
    }

    /// Read the in-process telemetry counters (SPEC_FULL.md §2): call
    /// count, error count, and breaker transition count accumulated since
    /// construction.
    pub fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            calls: self.telemetry.calls.load(Ordering::Relaxed),
            errors: self.telemetry.errors.load(Ordering::Relaxed),
            breaker_transitions: self.telemetry.breaker_transitions.load(Ordering::Relaxed),
        }
    }

    /// Resolve the session for `request`, building its catalog and
    /// validators on first use (spec §4.7 "resolve").
    pub async fn resolve(&self, session_request: &SessionRequest) -> GatewayResult<(Arc<Session>, Arc<SessionRuntimeStateHandle>)> {
        let session = self.sessions.get(session_request).await?;
        let state = self.state_for(&session).await?;
        Ok((session, state))
    }

    async fn state_for(&self, session: &Session) -> GatewayResult<Arc<SessionRuntimeStateHandle>> {
        if let Some(state) = self.per_session.lock().get(session.name()).cloned() {
            return Ok(SessionRuntimeStateHandle::wrap(state));
        }

        let catalog = mcp_gateway_core::extract_catalog(session).await?;
        let trust = resolve_trust_mode(session.transport_kind());
        let mut registry = ValidatorRegistry::new(self.config.safety_bounds.clone());
        for item in catalog.tools().chain(catalog.prompts()) {
            if let mcp_gateway_core::ItemDetail::Input { input } = &item.detail {
                let kind = if item.kind == CatalogItemKind::Tool { ValidatorKind::Tool } else { ValidatorKind::Prompt };
                let schema = if matches!(input, Value::Null) { None } else { Some(input) };
                registry.register(kind, &item.name, schema, trust);
            }
        }

        let info = session.info().clone();
        let version = derive_version(&info);
        let prefix = resolve_prefix(&self.config.prefix, &version, &info, session.name());

        let breaker_transitions = self.telemetry.breaker_transitions.clone();
        let breaker = CircuitBreaker::new(session.name().to_string(), self.config.breaker_config.clone())
            .with_listener(Arc::new(move |_session, _from, _to| {
                breaker_transitions.fetch_add(1, Ordering::Relaxed);
            }));
        let state = Arc::new(SessionRuntimeState {
            catalog,
            validators: Arc::new(registry),
            breaker,
            info,
            version,
            prefix,
            expose_error_details: self.config.expose_error_details,
            telemetry: self.telemetry.clone(),
        });

        self.per_session.lock().insert(session.name().to_string(), state.clone());
        Ok(SessionRuntimeStateHandle::wrap(state))
    }

    /// Run one call end to end (spec §4.8 "execute"): resolve session,
    /// validate input, run the plugin pipeline, dispatch through the
    /// breaker, and run the `after`/`error` phases.
    pub async fn execute(&self, request: CallRequest) -> GatewayResult<McpCallResult> {
        self.telemetry.calls.fetch_add(1, Ordering::Relaxed);

        let (session, state) = self.resolve(&request.session).await?;
        let method = CallMethod::from_str(&request.method);

        let mut ctx = PluginContext::new(session.name(), request.method.clone());
        ctx.surface = request.surface.clone();
        ctx.session = Some((*session).clone());
        ctx.breaker = Some(state.breaker.clone());
        ctx.catalog = Some(state.catalog.clone());
        ctx.merge_meta(request.meta.clone());

        let result = self.execute_inner(&request, &session, &state, method, &mut ctx).await;
        if result.is_err() {
            self.telemetry.errors.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn execute_inner(
        &self,
        request: &CallRequest,
        session: &Session,
        state: &SessionRuntimeStateHandle,
        method: CallMethod,
        ctx: &mut PluginContext,
    ) -> GatewayResult<McpCallResult> {
        let mut payload = request.params.clone();
        self.pipeline.run_phase("mcp-gateway-runtime", HookPhase::Transport, ctx, &mut payload).await?;

        if let (CallMethod::ToolsCall | CallMethod::PromptsGet, Some(name)) = (method, request.item_name()) {
            self.pipeline.run_phase("mcp-gateway-runtime", HookPhase::Schema, ctx, &mut payload).await?;
            let kind = if method == CallMethod::ToolsCall { ValidatorKind::Tool } else { ValidatorKind::Prompt };
            let outcome = state.validators.validate(kind, name, &request.arguments());
            if !outcome.valid {
                let message = outcome.errors.first().map(|e| e.message.clone()).unwrap_or_else(|| "validation failed".to_string());
                return Err(GatewayError::validation_with_issues("mcp-gateway-runtime", "execute", message, outcome.errors));
            }
        }

        self.pipeline.run_phase("mcp-gateway-runtime", HookPhase::Before, ctx, &mut payload).await?;

        let dispatch = self.dispatch(session, method, request);
        let result = state.breaker.call("mcp-gateway-runtime", dispatch).await;

        match result {
            Ok(value) => {
                let mut out = serde_json::to_value(&value).unwrap_or(Value::Null);
                self.pipeline.run_phase("mcp-gateway-runtime", HookPhase::After, ctx, &mut out).await?;
                Ok(serde_json::from_value(out).unwrap_or(value))
            }
            Err(err) => {
                let mut err_payload = serde_json::json!({"message": err.rendered_message()});
                let _ = self.pipeline.run_phase("mcp-gateway-runtime", HookPhase::Error, ctx, &mut err_payload).await;
                Err(err)
            }
        }
    }

    async fn dispatch(&self, session: &Session, method: CallMethod, request: &CallRequest) -> GatewayResult<McpCallResult> {
        match method {
            CallMethod::ToolsCall => {
                let name = request.item_name().unwrap_or_default();
                session.call_tool(name, request.arguments()).await
            }
            CallMethod::PromptsGet => {
                let name = request.item_name().unwrap_or_default();
                session.get_prompt(name, request.arguments()).await
            }
            CallMethod::ResourcesRead => {
                let uri = request.params.get("uri").and_then(Value::as_str).unwrap_or_default();
                session.read_resource(uri).await
            }
            CallMethod::Other => {
                let value = session.call(&request.method, request.params.clone()).await?;
                Ok(serde_json::from_value(value).unwrap_or_else(|_| McpCallResult::ok(vec![])))
            }
        }
    }

    pub async fn close(&self) {
        self.sessions.close().await;
        self.per_session.lock().clear();
    }
}

/// Thin clone-cheap wrapper so call sites don't need to know about the
/// internal `Arc<SessionRuntimeState>` type.
pub struct SessionRuntimeStateHandle(Arc<SessionRuntimeState>);

impl SessionRuntimeStateHandle {
    fn wrap(inner: Arc<SessionRuntimeState>) -> Arc<Self> {
        Arc::new(Self(inner))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.0.catalog
    }

    pub fn info(&self) -> &ServerInfo {
        &self.0.info
    }

    /// Derived `version` (spec §4.7), cached for the life of the session.
    pub fn version(&self) -> &str {
        &self.0.version
    }

    /// Resolved `prefix` (spec §4.7), cached for the life of the session.
    pub fn prefix(&self) -> &str {
        &self.0.prefix
    }

    pub fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            calls: self.0.telemetry.calls.load(Ordering::Relaxed),
            errors: self.0.telemetry.errors.load(Ordering::Relaxed),
            breaker_transitions: self.0.telemetry.breaker_transitions.load(Ordering::Relaxed),
        }
    }

    /// Shape `err` for an outbound response, honoring `errors.exposeDetails`
    /// (spec §4.7 "normalize").
    pub fn normalize(&self, err: &GatewayError, instance: impl Into<String>, request_id: impl Into<String>) -> mcp_gateway_core::NormalizedError {
        err.normalize(self.0.expose_error_details, instance, request_id)
    }
}

impl std::ops::Deref for SessionRuntimeStateHandle {
    type Target = SessionRuntimeState;
    fn deref(&self) -> &SessionRuntimeState {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcp_gateway_core::{ErrorKind, ServerInfo, TransportKind};
    use mcp_gateway_session::ManagerConfig;
    use serde_json::json;

    struct EchoClient;

    #[async_trait]
    impl mcp_gateway_core::McpClient for EchoClient {
        async fn call_tool(&self, name: &str, arguments: Value) -> GatewayResult<McpCallResult> {
            if name == "echo" {
                Ok(McpCallResult::ok(vec![arguments.get("text").cloned().unwrap_or(Value::Null)]))
            } else {
                Err(GatewayError::new(ErrorKind::UpstreamError, "test", "call_tool", "unknown tool {name}").with_var("name", name))
            }
        }

        async fn get_prompt(&self, _name: &str, _arguments: Value) -> GatewayResult<McpCallResult> {
            Ok(McpCallResult::ok(vec![]))
        }

        async fn read_resource(&self, _uri: &str) -> GatewayResult<McpCallResult> {
            Ok(McpCallResult::ok(vec![]))
        }

        async fn request(&self, method: &str, params: Value) -> GatewayResult<Value> {
            match method {
                "tools/list" => Ok(json!({
                    "tools": [{
                        "name": "echo",
                        "inputSchema": {"type": "object", "required": ["text"], "properties": {"text": {"type": "string"}}},
                    }]
                })),
                "prompts/list" => Ok(json!({"prompts": []})),
                "resources/list" => Ok(json!({"resources": []})),
                "resource-templates/list" => Ok(json!({"resourceTemplates": []})),
                "tools/call" => {
                    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
                    serde_json::to_value(self.call_tool(name, arguments).await?).map_err(Into::into)
                }
                _ => Ok(Value::Null),
            }
        }

        async fn server_info(&self) -> GatewayResult<ServerInfo> {
            Ok(ServerInfo { name: "echo-server".into(), version: "1.0.0".into(), instructions: None })
        }

        async fn close(&self) -> GatewayResult<()> {
            Ok(())
        }
    }

    struct EchoFactory;

    #[async_trait]
    impl SessionFactory for EchoFactory {
        async fn create(&self, identity: &str) -> GatewayResult<Session> {
            Ok(Session::new(
                identity,
                "in-memory",
                TransportKind::InMemory,
                ServerInfo { name: "echo-server".into(), version: "1.0.0".into(), instructions: None },
                Arc::new(EchoClient),
            ))
        }
    }

    fn runtime(config: RuntimeConfig) -> GatewayResult<Runtime> {
        Runtime::new(config, Arc::new(EchoFactory), Arc::new(Pipeline::new()), ManagerConfig::default())
    }

    #[tokio::test]
    async fn echo_round_trip_succeeds() {
        let rt = runtime(RuntimeConfig::default()).unwrap();
        let request = CallRequest::new(
            SessionRequest::default(),
            "tools/call",
            json!({"name": "echo", "arguments": {"text": "hi"}}),
        );
        let result = rt.execute(request).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content[0], json!("hi"));
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected_before_dispatch() {
        let rt = runtime(RuntimeConfig::default()).unwrap();
        let request = CallRequest::new(SessionRequest::default(), "tools/call", json!({"name": "echo", "arguments": {}}));
        let err = rt.execute(request).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(!err.issues.is_empty());
        assert_eq!(err.issues[0].keyword.as_deref(), Some("required"));
    }

    #[tokio::test]
    async fn unknown_tool_name_fails_validation() {
        let rt = runtime(RuntimeConfig::default()).unwrap();
        let request = CallRequest::new(SessionRequest::default(), "tools/call", json!({"name": "ghost", "arguments": {}}));
        let err = rt.execute(request).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.rendered_message().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn policy_lock_refuses_construction_under_default_profile() {
        let mut config = RuntimeConfig::default();
        config.policy_lock = true;
        let err = runtime(config).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PolicyLocked);
    }

    #[tokio::test]
    async fn policy_lock_allows_construction_under_strict_profile_without_custom_plugins() {
        let mut config = RuntimeConfig::default();
        config.policy_lock = true;
        config.guardrails_profile = GuardrailsProfile::Strict;
        assert!(runtime(config).is_ok());
    }

    #[tokio::test]
    async fn policy_lock_refuses_construction_with_custom_plugins_even_under_strict_profile() {
        let mut config = RuntimeConfig::default();
        config.policy_lock = true;
        config.guardrails_profile = GuardrailsProfile::Strict;
        config.has_custom_plugins = true;
        let err = runtime(config).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PolicyLocked);
    }

    #[tokio::test]
    async fn telemetry_snapshot_counts_calls_and_errors() {
        let rt = runtime(RuntimeConfig::default()).unwrap();
        rt.execute(CallRequest::new(
            SessionRequest::default(),
            "tools/call",
            json!({"name": "echo", "arguments": {"text": "hi"}}),
        ))
        .await
        .unwrap();
        rt.execute(CallRequest::new(SessionRequest::default(), "tools/call", json!({"name": "ghost", "arguments": {}})))
            .await
            .unwrap_err();

        let snapshot = rt.telemetry_snapshot();
        assert_eq!(snapshot.calls, 2);
        assert_eq!(snapshot.errors, 1);
    }

    #[tokio::test]
    async fn resolve_exposes_version_prefix_and_normalize() {
        let rt = runtime(RuntimeConfig::default()).unwrap();
        let (_session, state) = rt.resolve(&SessionRequest::default()).await.unwrap();
        assert_eq!(state.version(), "v1");
        assert_eq!(state.prefix(), "/v1");

        let err = GatewayError::validation("mcp-gateway-runtime", "execute", "arguments.text is required");
        let normalized = state.normalize(&err, "call-1", "req-1");
        assert_eq!(normalized.instance, "call-1");
        assert_eq!(normalized.request_id, "req-1");
        assert!(normalized.message.is_none());
    }
}
