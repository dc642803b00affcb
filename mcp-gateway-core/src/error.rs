//! Single tagged error type shared across the gateway (spec §7).

use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fmt;

/// Result type used throughout the gateway.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Normative error kinds from spec §7. New kinds should be added here, never
/// represented as bare strings, so that policy mapping (§4.9) stays total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    SchemaUnsafe,
    CircuitOpen,
    UpstreamTimeout,
    UpstreamError,
    GuardrailDenied,
    EgressPolicyDenied,
    ApprovalRequired,
    RateLimited,
    PluginBlocked,
    PluginTimeout,
    PolicyLocked,
    AuthRequired,
    AuthInvalid,
    SessionNotFound,
    SessionOrphaned,
    SessionExpiredIdle,
    SessionExpiredMaxAge,
    SessionServerNotFound,
    SessionServerRequired,
    SessionServiceRunning,
    SessionServiceUnavailable,
    SessionUnauthorized,
    SessionRpcFrameTooLarge,
    SessionRpcTimeout,
    SessionRpcError,
    SessionInternal,
    SessionRpcUnknown,
    SessionRpcInvalidJson,
    Cancelled,
}

impl ErrorKind {
    /// The pass-through allowlist (§4.5, §7): these bubble out of the plugin
    /// pipeline unchanged instead of being wrapped as `PLUGIN_BLOCKED`.
    pub fn is_pass_through(self) -> bool {
        matches!(
            self,
            ErrorKind::GuardrailDenied
                | ErrorKind::EgressPolicyDenied
                | ErrorKind::ApprovalRequired
                | ErrorKind::RateLimited
                | ErrorKind::PluginTimeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::SchemaUnsafe => "SCHEMA_UNSAFE",
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            ErrorKind::UpstreamError => "UPSTREAM_ERROR",
            ErrorKind::GuardrailDenied => "GUARDRAIL_DENIED",
            ErrorKind::EgressPolicyDenied => "EGRESS_POLICY_DENIED",
            ErrorKind::ApprovalRequired => "APPROVAL_REQUIRED",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::PluginBlocked => "PLUGIN_BLOCKED",
            ErrorKind::PluginTimeout => "PLUGIN_TIMEOUT",
            ErrorKind::PolicyLocked => "POLICY_LOCKED",
            ErrorKind::AuthRequired => "AUTH_REQUIRED",
            ErrorKind::AuthInvalid => "AUTH_INVALID",
            ErrorKind::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorKind::SessionOrphaned => "SESSION_ORPHANED",
            ErrorKind::SessionExpiredIdle => "SESSION_EXPIRED_IDLE",
            ErrorKind::SessionExpiredMaxAge => "SESSION_EXPIRED_MAX_AGE",
            ErrorKind::SessionServerNotFound => "SESSION_SERVER_NOT_FOUND",
            ErrorKind::SessionServerRequired => "SESSION_SERVER_REQUIRED",
            ErrorKind::SessionServiceRunning => "SESSION_SERVICE_RUNNING",
            ErrorKind::SessionServiceUnavailable => "SESSION_SERVICE_UNAVAILABLE",
            ErrorKind::SessionUnauthorized => "SESSION_UNAUTHORIZED",
            ErrorKind::SessionRpcFrameTooLarge => "SESSION_RPC_FRAME_TOO_LARGE",
            ErrorKind::SessionRpcTimeout => "SESSION_RPC_TIMEOUT",
            ErrorKind::SessionRpcError => "SESSION_RPC_ERROR",
            ErrorKind::SessionInternal => "SESSION_INTERNAL",
            ErrorKind::SessionRpcUnknown => "SESSION_RPC_UNKNOWN",
            ErrorKind::SessionRpcInvalidJson => "SESSION_RPC_INVALID_JSON",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One failed schema constraint, mirroring `jsonschema`'s own error shape
/// (spec §4.3 `ValidationIssue {path, keyword, message, params}`). Lives here
/// rather than in the schema crate so a `GatewayError` of kind `VALIDATION`
/// can carry the full list without a dependency cycle.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub keyword: Option<String>,
    pub message: String,
    pub params: Option<serde_json::Value>,
}

/// The single tagged error type carried through the whole gateway (§7):
/// `{kind, sourcePackage, sourceMethod, messageTemplate, vars, docsRef, cause?}`.
#[derive(Debug)]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub source_package: String,
    pub source_method: String,
    pub message_template: String,
    pub vars: HashMap<String, String>,
    pub docs_ref: String,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    /// Structured detail for `ErrorKind::Validation`: every failed
    /// constraint, not just the first. Empty for every other kind.
    pub issues: Vec<ValidationIssue>,
}

impl GatewayError {
    /// Build an error, deriving `docsRef` as the six-hex-char prefix of
    /// `sha1("<pkg>-<method>-<messageTemplate>")` (§7).
    pub fn new(
        kind: ErrorKind,
        source_package: impl Into<String>,
        source_method: impl Into<String>,
        message_template: impl Into<String>,
    ) -> Self {
        let source_package = source_package.into();
        let source_method = source_method.into();
        let message_template = message_template.into();
        let docs_ref = compute_docs_ref(&source_package, &source_method, &message_template);
        Self {
            kind,
            source_package,
            source_method,
            message_template,
            vars: HashMap::new(),
            docs_ref,
            cause: None,
            issues: Vec::new(),
        }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_issues(mut self, issues: Vec<ValidationIssue>) -> Self {
        self.issues = issues;
        self
    }

    /// Render `messageTemplate` with `{var}` placeholders substituted from `vars`.
    pub fn rendered_message(&self) -> String {
        let mut out = self.message_template.clone();
        for (k, v) in &self.vars {
            out = out.replace(&format!("{{{k}}}"), v);
        }
        out
    }

    /// Build a documentation URL by joining a base with the docs ref.
    pub fn docs_url(&self, base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), self.docs_ref)
    }

    // Convenience constructors for the common call sites.

    pub fn circuit_open(source_package: impl Into<String>, session_name: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            source_package,
            "execute",
            "circuit open for session {sessionName}",
        )
        .with_var("sessionName", session_name)
    }

    pub fn validation(
        source_package: impl Into<String>,
        source_method: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::Validation, source_package, source_method, message)
    }

    /// Like [`Self::validation`], but carrying the full set of failed
    /// constraints (spec §4.3/§7) instead of collapsing to one message.
    pub fn validation_with_issues(
        source_package: impl Into<String>,
        source_method: impl Into<String>,
        message: impl Into<String>,
        issues: Vec<ValidationIssue>,
    ) -> Self {
        Self::new(ErrorKind::Validation, source_package, source_method, message).with_issues(issues)
    }

    pub fn plugin_blocked(
        source_package: impl Into<String>,
        plugin: impl Into<String>,
        phase: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::new(
            ErrorKind::PluginBlocked,
            source_package,
            "pipeline",
            "plugin {plugin} blocked during {phase}",
        )
        .with_var("plugin", plugin)
        .with_var("phase", phase)
        .with_cause(cause)
    }

    pub fn plugin_timeout(source_package: impl Into<String>, plugin: impl Into<String>, phase: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::PluginTimeout,
            source_package,
            "pipeline",
            "plugin {plugin} timed out during {phase}",
        )
        .with_var("plugin", plugin)
        .with_var("phase", phase)
    }

    pub fn policy_locked(source_package: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::PolicyLocked, source_package, "construct", "policy lock violated: {reason}")
            .with_var("reason", reason)
    }

    pub fn auth_required(source_package: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthRequired, source_package, "get", "authentication required")
    }

    pub fn auth_invalid(source_package: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthInvalid, source_package, "get", "malformed authorization header: {reason}")
            .with_var("reason", reason)
    }

    pub fn session_not_found(source_package: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ErrorKind::SessionNotFound, source_package, "lookup", "session not found: {name}").with_var("name", name)
    }

    pub fn upstream_timeout(source_package: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamTimeout, source_package, "call", "upstream call to {method} timed out").with_var(
            "method",
            method,
        )
    }

    pub fn upstream_error(source_package: impl Into<String>, method: impl Into<String>, code: Option<i64>, message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::UpstreamError, source_package, "call", "upstream error calling {method}: {message}")
            .with_var("method", method)
            .with_var("message", message);
        if let Some(code) = code {
            err = err.with_var("code", code.to_string());
        }
        err
    }

    pub fn cancelled(source_package: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, source_package, "execute", "call cancelled: {reason}").with_var("reason", reason)
    }
}

/// An outbound-safe rendering of a [`GatewayError`] (spec §4.7 "normalize",
/// §7 `errors.exposeDetails`): always carries `kind`, `instance`, and
/// `requestId`; `message` is only populated when details are exposed.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NormalizedError {
    pub kind: ErrorKind,
    pub instance: String,
    pub request_id: String,
    pub docs_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GatewayError {
    /// Shape this error for an outbound response (spec §4.7 "normalize").
    /// With `expose_details = false` (the default), the rendered message is
    /// suppressed; `kind`, `instance`, `requestId`, and `docsRef` survive
    /// either way.
    pub fn normalize(&self, expose_details: bool, instance: impl Into<String>, request_id: impl Into<String>) -> NormalizedError {
        NormalizedError {
            kind: self.kind,
            instance: instance.into(),
            request_id: request_id.into(),
            docs_ref: self.docs_ref.clone(),
            message: expose_details.then(|| self.rendered_message()),
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}::{}: {} (docs:{})",
            self.kind,
            self.source_package,
            self.source_method,
            self.rendered_message(),
            self.docs_ref
        )
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::new(ErrorKind::SessionRpcInvalidJson, "mcp-gateway-core", "deserialize", "invalid json: {details}")
            .with_var("details", err.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::new(ErrorKind::SessionInternal, "mcp-gateway-core", "io", "io error: {details}")
            .with_var("details", err.to_string())
            .with_cause(err)
    }
}

fn compute_docs_ref(pkg: &str, method: &str, template: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{pkg}-{method}-{template}").as_bytes());
    let digest = hasher.finalize();
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    hex[..6].to_string()
}
