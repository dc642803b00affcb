//! Identity derivation from inbound authorization (C6, spec §4.6).

use mcp_gateway_core::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};

/// `auth.mode` (spec §6): `bearer` keys sessions off the caller's bearer
/// token, `anonymous` pools every caller under one shared identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Bearer,
    Anonymous,
}

const ANONYMOUS_IDENTITY: &str = "anonymous";

/// Derive the pool key for an inbound request (spec §4.6 "Identity
/// derivation"). `authorization` is the raw header value, if any.
pub fn derive_identity(mode: AuthMode, authorization: Option<&str>) -> GatewayResult<String> {
    match mode {
        AuthMode::Anonymous => Ok(ANONYMOUS_IDENTITY.to_string()),
        AuthMode::Bearer => {
            let header = authorization.ok_or_else(|| GatewayError::auth_required("mcp-gateway-session"))?;
            let token = header
                .strip_prefix("Bearer ")
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| GatewayError::auth_invalid("mcp-gateway-session", "expected 'Bearer <token>'"))?;
            Ok(token.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_mode_ignores_header() {
        assert_eq!(derive_identity(AuthMode::Anonymous, None).unwrap(), ANONYMOUS_IDENTITY);
        assert_eq!(derive_identity(AuthMode::Anonymous, Some("garbage")).unwrap(), ANONYMOUS_IDENTITY);
    }

    #[test]
    fn bearer_mode_requires_header() {
        let err = derive_identity(AuthMode::Bearer, None).unwrap_err();
        assert_eq!(err.kind, mcp_gateway_core::ErrorKind::AuthRequired);
    }

    #[test]
    fn bearer_mode_rejects_malformed_header() {
        let err = derive_identity(AuthMode::Bearer, Some("Basic xyz")).unwrap_err();
        assert_eq!(err.kind, mcp_gateway_core::ErrorKind::AuthInvalid);

        let err = derive_identity(AuthMode::Bearer, Some("Bearer ")).unwrap_err();
        assert_eq!(err.kind, mcp_gateway_core::ErrorKind::AuthInvalid);
    }

    #[test]
    fn bearer_mode_extracts_token() {
        assert_eq!(derive_identity(AuthMode::Bearer, Some("Bearer abc123")).unwrap(), "abc123");
    }
}
