//! Validator registry (C3, spec §4.3): compiles tool/prompt input schemas up
//! front and validates call arguments against them without ever throwing.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

pub use mcp_gateway_core::ValidationIssue;

use crate::bounds::{check_safety, SafetyBounds, SkipReason, TrustMode};

/// Which catalog surface a schema belongs to (spec §4.2 `CatalogItemKind`
/// restricted to the two kinds that carry input schemas).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidatorKind {
    Tool,
    Prompt,
}

impl ValidatorKind {
    fn as_str(self) -> &'static str {
        match self {
            ValidatorKind::Tool => "tool",
            ValidatorKind::Prompt => "prompt",
        }
    }
}

/// Result of `ValidatorRegistry::validate` (spec §4.3). Always returned, even
/// for names that were never registered or whose schema was skipped.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationOutcome {
    fn ok() -> Self {
        Self { valid: true, errors: Vec::new() }
    }

    fn single_error(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![ValidationIssue { path: String::new(), keyword: None, message: message.into(), params: None }],
        }
    }
}

enum Entry {
    Compiled(Arc<jsonschema::Validator>),
    Skipped(SkipReason),
}

/// Map a `jsonschema` error kind to the JSON Schema keyword that failed
/// (spec §4.3/§7 `ValidationIssue.keyword`, e.g. `'required'`).
fn keyword_for_kind(kind: &jsonschema::ValidationErrorKind) -> &'static str {
    use jsonschema::ValidationErrorKind as K;
    match kind {
        K::Required { .. } => "required",
        K::Type { .. } => "type",
        K::Enum { .. } => "enum",
        K::Constant { .. } => "const",
        K::MinLength { .. } => "minLength",
        K::MaxLength { .. } => "maxLength",
        K::Minimum { .. } => "minimum",
        K::Maximum { .. } => "maximum",
        K::ExclusiveMinimum { .. } => "exclusiveMinimum",
        K::ExclusiveMaximum { .. } => "exclusiveMaximum",
        K::MultipleOf { .. } => "multipleOf",
        K::Pattern { .. } => "pattern",
        K::Format { .. } => "format",
        K::MinItems { .. } => "minItems",
        K::MaxItems { .. } => "maxItems",
        K::UniqueItems => "uniqueItems",
        K::MinProperties { .. } => "minProperties",
        K::MaxProperties { .. } => "maxProperties",
        K::AdditionalProperties { .. } => "additionalProperties",
        K::AdditionalItems { .. } => "additionalItems",
        K::PropertyNames { .. } => "propertyNames",
        K::Contains => "contains",
        K::AnyOf => "anyOf",
        K::OneOfMultipleValid | K::OneOfNotValid => "oneOf",
        K::Not { .. } => "not",
        K::FalseSchema => "false",
        _ => "unknown",
    }
}

/// Holds compiled validators for every tool/prompt a session's catalog
/// exposes (spec §4.3). Registration never fails: an unsafe or invalid
/// schema is recorded as skipped and calls against it bypass validation,
/// per "Unsafe schema handling" in spec §4.3.
pub struct ValidatorRegistry {
    bounds: SafetyBounds,
    entries: HashMap<(ValidatorKind, String), Entry>,
}

impl ValidatorRegistry {
    pub fn new(bounds: SafetyBounds) -> Self {
        Self { bounds, entries: HashMap::new() }
    }

    /// Register a schema for `(kind, name)`. `trust` controls whether safety
    /// bounds are enforced at all: trusted sources (in-memory/local stdio
    /// servers, per spec §4.3) skip the bounds check and compile directly.
    pub fn register(&mut self, kind: ValidatorKind, name: &str, schema: Option<&Value>, trust: TrustMode) {
        let key = (kind, name.to_string());

        let schema = match schema {
            Some(s) => s,
            None => {
                self.entries.insert(key, Entry::Skipped(SkipReason::SchemaAbsent));
                return;
            }
        };

        if trust == TrustMode::Untrusted {
            if let Some(reason) = check_safety(name, schema, &self.bounds) {
                tracing::warn!(kind = kind.as_str(), name, reason = %reason, "schema registration skipped");
                self.entries.insert(key, Entry::Skipped(reason));
                return;
            }
        }

        match jsonschema::validator_for(schema) {
            Ok(compiled) => {
                self.entries.insert(key, Entry::Compiled(Arc::new(compiled)));
            }
            Err(e) => {
                let reason = SkipReason::CompileError { message: e.to_string() };
                tracing::warn!(kind = kind.as_str(), name, reason = %reason, "schema registration skipped");
                self.entries.insert(key, Entry::Skipped(reason));
            }
        }
    }

    /// Validate `input` against the registered schema for `(kind, name)`.
    /// Never panics or propagates an error: unknown names and skipped
    /// schemas both resolve to a concrete `ValidationOutcome` (spec §4.3,
    /// §8 "Validator totality").
    pub fn validate(&self, kind: ValidatorKind, name: &str, input: &Value) -> ValidationOutcome {
        match self.entries.get(&(kind, name.to_string())) {
            None => ValidationOutcome::single_error(format!("Unknown {}: {}", kind.as_str(), name)),
            Some(Entry::Skipped(_)) => ValidationOutcome::ok(),
            Some(Entry::Compiled(validator)) => {
                let issues: Vec<ValidationIssue> = validator
                    .iter_errors(input)
                    .map(|e| ValidationIssue {
                        path: e.instance_path.to_string(),
                        keyword: Some(keyword_for_kind(&e.kind).to_string()),
                        message: e.to_string(),
                        params: Some(serde_json::json!({"detail": format!("{:?}", e.kind)})),
                    })
                    .collect();
                if issues.is_empty() {
                    ValidationOutcome::ok()
                } else {
                    ValidationOutcome { valid: false, errors: issues }
                }
            }
        }
    }

    /// Whether `(kind, name)` was registered at all (compiled or skipped).
    pub fn contains(&self, kind: ValidatorKind, name: &str) -> bool {
        self.entries.contains_key(&(kind, name.to_string()))
    }

    /// The reason a schema was skipped, if any, for diagnostics surfaces.
    pub fn skip_reason(&self, kind: ValidatorKind, name: &str) -> Option<String> {
        match self.entries.get(&(kind, name.to_string())) {
            Some(Entry::Skipped(reason)) => Some(reason.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_name_is_invalid_not_an_error() {
        let registry = ValidatorRegistry::new(SafetyBounds::default());
        let outcome = registry.validate(ValidatorKind::Tool, "ghost", &json!({}));
        assert!(!outcome.valid);
        assert_eq!(outcome.errors[0].message, "Unknown tool: ghost");
    }

    #[test]
    fn valid_input_passes() {
        let mut registry = ValidatorRegistry::new(SafetyBounds::default());
        let schema = json!({"type": "object", "required": ["text"], "properties": {"text": {"type": "string"}}});
        registry.register(ValidatorKind::Tool, "echo", Some(&schema), TrustMode::Untrusted);
        let outcome = registry.validate(ValidatorKind::Tool, "echo", &json!({"text": "hi"}));
        assert!(outcome.valid);
    }

    #[test]
    fn invalid_input_reports_issues() {
        let mut registry = ValidatorRegistry::new(SafetyBounds::default());
        let schema = json!({"type": "object", "required": ["text"], "properties": {"text": {"type": "string"}}});
        registry.register(ValidatorKind::Tool, "echo", Some(&schema), TrustMode::Untrusted);
        let outcome = registry.validate(ValidatorKind::Tool, "echo", &json!({}));
        assert!(!outcome.valid);
        assert!(!outcome.errors.is_empty());
        assert_eq!(outcome.errors[0].path, "");
        assert_eq!(outcome.errors[0].keyword.as_deref(), Some("required"));
        assert!(outcome.errors[0].params.is_some());
    }

    #[test]
    fn unsafe_schema_is_skipped_not_rejected_at_registration() {
        let mut registry = ValidatorRegistry::new(SafetyBounds { max_schema_depth: 1, ..Default::default() });
        let schema = json!({"type": "object", "properties": {"a": {"type": "object", "properties": {"b": {"type": "string"}}}}});
        registry.register(ValidatorKind::Tool, "deep", Some(&schema), TrustMode::Untrusted);
        assert!(registry.contains(ValidatorKind::Tool, "deep"));
        assert!(registry.skip_reason(ValidatorKind::Tool, "deep").is_some());
        // calls still proceed, just unvalidated
        let outcome = registry.validate(ValidatorKind::Tool, "deep", &json!({"anything": true}));
        assert!(outcome.valid);
    }

    #[test]
    fn trusted_sources_bypass_bounds_check() {
        let mut registry = ValidatorRegistry::new(SafetyBounds { max_schema_depth: 1, ..Default::default() });
        let schema = json!({"type": "object", "properties": {"a": {"type": "object", "properties": {"b": {"type": "string"}}}}});
        registry.register(ValidatorKind::Tool, "deep", Some(&schema), TrustMode::Trusted);
        assert!(registry.skip_reason(ValidatorKind::Tool, "deep").is_none());
    }

    #[test]
    fn absent_schema_is_registered_as_skipped() {
        let mut registry = ValidatorRegistry::new(SafetyBounds::default());
        registry.register(ValidatorKind::Prompt, "noop", None, TrustMode::Untrusted);
        assert!(registry.contains(ValidatorKind::Prompt, "noop"));
        let outcome = registry.validate(ValidatorKind::Prompt, "noop", &json!({"whatever": 1}));
        assert!(outcome.valid);
    }
}
