//! Safety bounds applied to untrusted upstream schemas (spec §4.3, §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{maxSchemaDepth, maxSchemaSize, maxPatternLength, maxToolNameLength,
/// maxTemplateParamLength}` (spec §6 `validation` options).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyBounds {
    pub max_schema_depth: usize,
    pub max_schema_size: usize,
    pub max_pattern_length: usize,
    pub max_tool_name_length: usize,
    pub max_template_param_length: usize,
}

impl Default for SafetyBounds {
    fn default() -> Self {
        Self {
            max_schema_depth: 10,
            max_schema_size: 102_400,
            max_pattern_length: 1000,
            max_tool_name_length: 64,
            max_template_param_length: 200,
        }
    }
}

/// Whether a schema should be trusted as-is, per spec §4.3/§6: `auto`
/// evaluates to trusted for in-memory/stdio sources and untrusted otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustMode {
    Trusted,
    Untrusted,
}

/// Reason a schema was registered as `null` (unvalidated) instead of being
/// compiled, surfaced by the registry's "skipped with reason" diagnostics bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    SchemaTooDeep { actual: usize, max: usize },
    SchemaTooLarge { actual: usize, max: usize },
    PatternTooLong { actual: usize, max: usize },
    ToolNameTooLong { actual: usize, max: usize },
    CatastrophicPattern { pattern: String },
    CompileError { message: String },
    SchemaAbsent,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::SchemaTooDeep { actual, max } => write!(f, "schema depth {actual} exceeds max {max}"),
            SkipReason::SchemaTooLarge { actual, max } => write!(f, "schema size {actual} bytes exceeds max {max}"),
            SkipReason::PatternTooLong { actual, max } => write!(f, "pattern length {actual} exceeds max {max}"),
            SkipReason::ToolNameTooLong { actual, max } => write!(f, "tool name length {actual} exceeds max {max}"),
            SkipReason::CatastrophicPattern { pattern } => write!(f, "pattern `{pattern}` admits catastrophic backtracking"),
            SkipReason::CompileError { message } => write!(f, "schema failed to compile: {message}"),
            SkipReason::SchemaAbsent => write!(f, "schema intentionally absent"),
        }
    }
}

/// Evaluate the safety bounds against a schema and a name, returning the
/// first violation found (spec §4.3). Does not look inside `$ref`s — a
/// conservative syntactic check is sufficient per spec §9 Open Questions.
pub fn check_safety(name: &str, schema: &Value, bounds: &SafetyBounds) -> Option<SkipReason> {
    if name.len() > bounds.max_tool_name_length {
        return Some(SkipReason::ToolNameTooLong {
            actual: name.len(),
            max: bounds.max_tool_name_length,
        });
    }

    let serialized = serde_json::to_string(schema).unwrap_or_default();
    if serialized.len() > bounds.max_schema_size {
        return Some(SkipReason::SchemaTooLarge {
            actual: serialized.len(),
            max: bounds.max_schema_size,
        });
    }

    let depth = json_depth(schema);
    if depth > bounds.max_schema_depth {
        return Some(SkipReason::SchemaTooDeep { actual: depth, max: bounds.max_schema_depth });
    }

    if let Some(reason) = check_patterns(schema, bounds) {
        return Some(reason);
    }

    None
}

fn json_depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        Value::Array(arr) => 1 + arr.iter().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

fn check_patterns(value: &Value, bounds: &SafetyBounds) -> Option<SkipReason> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(pattern)) = map.get("pattern") {
                if pattern.len() > bounds.max_pattern_length {
                    return Some(SkipReason::PatternTooLong { actual: pattern.len(), max: bounds.max_pattern_length });
                }
                if admits_catastrophic_backtracking(pattern) {
                    return Some(SkipReason::CatastrophicPattern { pattern: pattern.clone() });
                }
            }
            for v in map.values() {
                if let Some(r) = check_patterns(v, bounds) {
                    return Some(r);
                }
            }
            None
        }
        Value::Array(arr) => arr.iter().find_map(|v| check_patterns(v, bounds)),
        _ => None,
    }
}

/// Conservative syntactic ReDoS check (spec §4.3, §9 Open Questions):
/// catches the common `(x+)+` / `(x*)*` nested-unbounded-quantifier shapes.
/// Not a full analyzer.
pub fn admits_catastrophic_backtracking(pattern: &str) -> bool {
    static NESTED_QUANTIFIER: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r"\([^()]*[+*]\)[+*]").expect("static regex"));
    NESTED_QUANTIFIER.is_match(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_nested_plus_quantifier() {
        assert!(admits_catastrophic_backtracking(r"(a+)+$"));
        assert!(admits_catastrophic_backtracking(r"(a*)*$"));
        assert!(!admits_catastrophic_backtracking(r"^[a-z]+$"));
    }

    #[test]
    fn depth_limit_triggers() {
        let bounds = SafetyBounds { max_schema_depth: 2, ..Default::default() };
        let schema = json!({"a": {"b": {"c": "too deep"}}});
        assert!(matches!(check_safety("tool", &schema, &bounds), Some(SkipReason::SchemaTooDeep { .. })));
    }

    #[test]
    fn pattern_length_limit_triggers() {
        let bounds = SafetyBounds { max_pattern_length: 4, ..Default::default() };
        let schema = json!({"type": "string", "pattern": "abcdef"});
        assert!(matches!(check_safety("tool", &schema, &bounds), Some(SkipReason::PatternTooLong { .. })));
    }

    #[test]
    fn tool_name_length_limit_triggers() {
        let bounds = SafetyBounds { max_tool_name_length: 3, ..Default::default() };
        let schema = json!({"type": "object"});
        assert!(matches!(check_safety("toolong", &schema, &bounds), Some(SkipReason::ToolNameTooLong { .. })));
    }

    #[test]
    fn safe_schema_passes() {
        let bounds = SafetyBounds::default();
        let schema = json!({"type": "object", "properties": {"text": {"type": "string"}}});
        assert!(check_safety("echo", &schema, &bounds).is_none());
    }
}
