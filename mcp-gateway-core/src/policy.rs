//! Policy / error map (C10, spec §4.9): deterministic mapping of runtime
//! error kinds and MCP JSON-RPC numeric codes onto HTTP status and GraphQL
//! extension codes.

use crate::error::ErrorKind;

/// A surface-facing mapping result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyMapping {
    pub http_status: u16,
    pub graphql_code: &'static str,
}

impl PolicyMapping {
    const fn new(http_status: u16, graphql_code: &'static str) -> Self {
        Self { http_status, graphql_code }
    }
}

/// Map a policy/runtime [`ErrorKind`] to its HTTP status and GraphQL
/// extension code, per the static table in spec §4.9.
pub fn map_error_kind(kind: ErrorKind) -> PolicyMapping {
    use ErrorKind::*;
    match kind {
        GuardrailDenied => PolicyMapping::new(403, "FORBIDDEN"),
        EgressPolicyDenied => PolicyMapping::new(403, "FORBIDDEN"),
        ApprovalRequired => PolicyMapping::new(403, "FORBIDDEN"),
        RateLimited => PolicyMapping::new(429, "TOO_MANY_REQUESTS"),
        PluginBlocked => PolicyMapping::new(403, "FORBIDDEN"),
        PluginTimeout => PolicyMapping::new(504, "TIMEOUT"),
        Validation => PolicyMapping::new(400, "BAD_USER_INPUT"),
        SchemaUnsafe => PolicyMapping::new(200, "OK"),
        CircuitOpen => PolicyMapping::new(503, "SERVICE_UNAVAILABLE"),
        UpstreamTimeout => PolicyMapping::new(504, "TIMEOUT"),
        UpstreamError => PolicyMapping::new(502, "BAD_GATEWAY"),
        PolicyLocked => PolicyMapping::new(500, "INTERNAL_SERVER_ERROR"),
        AuthRequired => PolicyMapping::new(401, "UNAUTHENTICATED"),
        AuthInvalid => PolicyMapping::new(401, "UNAUTHENTICATED"),
        SessionNotFound => PolicyMapping::new(404, "NOT_FOUND"),
        SessionOrphaned => PolicyMapping::new(409, "CONFLICT"),
        SessionExpiredIdle => PolicyMapping::new(410, "GONE"),
        SessionExpiredMaxAge => PolicyMapping::new(410, "GONE"),
        SessionServerNotFound => PolicyMapping::new(404, "NOT_FOUND"),
        SessionServerRequired => PolicyMapping::new(400, "BAD_USER_INPUT"),
        SessionServiceRunning => PolicyMapping::new(409, "CONFLICT"),
        SessionServiceUnavailable => PolicyMapping::new(503, "SERVICE_UNAVAILABLE"),
        SessionUnauthorized => PolicyMapping::new(401, "UNAUTHENTICATED"),
        SessionRpcFrameTooLarge => PolicyMapping::new(413, "PAYLOAD_TOO_LARGE"),
        SessionRpcTimeout => PolicyMapping::new(504, "TIMEOUT"),
        SessionRpcError => PolicyMapping::new(500, "INTERNAL_SERVER_ERROR"),
        SessionInternal => PolicyMapping::new(500, "INTERNAL_SERVER_ERROR"),
        SessionRpcUnknown => PolicyMapping::new(400, "BAD_USER_INPUT"),
        SessionRpcInvalidJson => PolicyMapping::new(400, "BAD_USER_INPUT"),
        Cancelled => PolicyMapping::new(499, "CANCELLED"),
    }
}

/// Map a numeric MCP JSON-RPC error code (spec §4.9) to HTTP status and
/// GraphQL extension code.
pub fn map_jsonrpc_code(code: i64) -> PolicyMapping {
    match code {
        -32700 | -32600 => PolicyMapping::new(400, "BAD_REQUEST"),
        -32601 => PolicyMapping::new(404, "NOT_FOUND"),
        -32602 => PolicyMapping::new(400, "BAD_USER_INPUT"),
        -32603 | -32000 => PolicyMapping::new(500, "INTERNAL_SERVER_ERROR"),
        -32001 => PolicyMapping::new(504, "TIMEOUT"),
        -32002 => PolicyMapping::new(404, "NOT_FOUND"),
        _ => PolicyMapping::new(500, "INTERNAL_SERVER_ERROR"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_spec_examples() {
        assert_eq!(map_error_kind(ErrorKind::GuardrailDenied), PolicyMapping::new(403, "FORBIDDEN"));
        assert_eq!(map_error_kind(ErrorKind::RateLimited), PolicyMapping::new(429, "TOO_MANY_REQUESTS"));
        assert_eq!(map_error_kind(ErrorKind::PluginTimeout), PolicyMapping::new(504, "TIMEOUT"));
    }

    #[test]
    fn jsonrpc_table_matches_spec_examples() {
        assert_eq!(map_jsonrpc_code(-32700), PolicyMapping::new(400, "BAD_REQUEST"));
        assert_eq!(map_jsonrpc_code(-32601), PolicyMapping::new(404, "NOT_FOUND"));
        assert_eq!(map_jsonrpc_code(-32602), PolicyMapping::new(400, "BAD_USER_INPUT"));
        assert_eq!(map_jsonrpc_code(-32603), PolicyMapping::new(500, "INTERNAL_SERVER_ERROR"));
        assert_eq!(map_jsonrpc_code(-32000), PolicyMapping::new(500, "INTERNAL_SERVER_ERROR"));
        assert_eq!(map_jsonrpc_code(-32001), PolicyMapping::new(504, "TIMEOUT"));
        assert_eq!(map_jsonrpc_code(-32002), PolicyMapping::new(404, "NOT_FOUND"));
    }

    #[test]
    fn unknown_jsonrpc_code_falls_back_to_internal() {
        assert_eq!(map_jsonrpc_code(-1), PolicyMapping::new(500, "INTERNAL_SERVER_ERROR"));
    }
}
