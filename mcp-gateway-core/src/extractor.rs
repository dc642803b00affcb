//! Catalog Extractor (C2, spec §4.2): enumerates tools/prompts/resources/
//! resource-templates from a [`Session`] into a normalized [`Catalog`], and
//! derives deterministic GraphQL/REST field names from it.

use serde_json::Value;
use std::collections::HashSet;

use crate::catalog::{Catalog, CatalogItem, CatalogItemKind, ItemDetail};
use crate::error::{ErrorKind, GatewayError, GatewayResult};
use crate::session::Session;

const RESERVED_FIELD_NAMES: &[&str] = &["callTool", "getPrompt", "catalog", "readResource", "readTemplate"];

/// Extract a [`Catalog`] from a session by issuing the four `*/list` calls.
/// Per spec §3/§4.2 this always produces a brand new `Catalog` — re-extraction
/// never mutates a prior one.
pub async fn extract_catalog(session: &Session) -> GatewayResult<Catalog> {
    let info = session.info().clone();

    let tools = list_items(session, "tools/list", "tools", CatalogItemKind::Tool).await?;
    let prompts = list_items(session, "prompts/list", "prompts", CatalogItemKind::Prompt).await?;
    let resources = list_items(session, "resources/list", "resources", CatalogItemKind::Resource).await?;
    let templates = list_items(session, "resource-templates/list", "resourceTemplates", CatalogItemKind::ResourceTemplate).await?;

    let mut items = Vec::with_capacity(tools.len() + prompts.len() + resources.len() + templates.len());
    items.extend(tools);
    items.extend(prompts);
    items.extend(resources);
    items.extend(templates);

    Ok(Catalog::new(info, items))
}

async fn list_items(session: &Session, method: &str, result_key: &str, kind: CatalogItemKind) -> GatewayResult<Vec<CatalogItem>> {
    let raw = session.call(method, Value::Null).await?;
    let entries = raw
        .get(result_key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    entries
        .into_iter()
        .enumerate()
        .map(|(idx, entry)| parse_entry(kind, idx, entry))
        .collect()
}

fn parse_entry(kind: CatalogItemKind, idx: usize, entry: Value) -> GatewayResult<CatalogItem> {
    let name = entry
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::new(ErrorKind::SessionRpcInvalidJson, "mcp-gateway-core", "extract_catalog", "catalog entry missing name"))?
        .to_string();
    let title = entry.get("title").and_then(Value::as_str).map(str::to_string);
    let description = entry.get("description").and_then(Value::as_str).map(str::to_string);

    let detail = match kind {
        CatalogItemKind::Tool | CatalogItemKind::Prompt => {
            let input = entry.get("inputSchema").or_else(|| entry.get("input")).cloned().unwrap_or(Value::Null);
            ItemDetail::Input { input }
        }
        CatalogItemKind::Resource => {
            let uri = entry
                .get("uri")
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::new(ErrorKind::SessionRpcInvalidJson, "mcp-gateway-core", "extract_catalog", "resource missing uri"))?
                .to_string();
            let mime_type = entry.get("mimeType").and_then(Value::as_str).map(str::to_string);
            ItemDetail::Resource { uri, mime_type }
        }
        CatalogItemKind::ResourceTemplate => {
            let uri_template = entry
                .get("uriTemplate")
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::new(ErrorKind::SessionRpcInvalidJson, "mcp-gateway-core", "extract_catalog", "template missing uriTemplate"))?
                .to_string();
            reject_rfc6570_operators(&uri_template)?;
            ItemDetail::Template { uri_template }
        }
    };

    Ok(CatalogItem {
        kind,
        name,
        title,
        description,
        detail,
        enumeration_index: idx,
    })
}

/// Only simple `{name}` placeholders are accepted; RFC 6570 §2.2 operator
/// forms (`{+var}`, `{#var}`, `{.var}`, `{/var}`, `{;var}`, `{?var}`, `{&var}`)
/// are rejected (spec §3).
fn reject_rfc6570_operators(template: &str) -> GatewayResult<()> {
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' {
            if let Some(&next) = chars.peek() {
                if matches!(next, '+' | '#' | '.' | '/' | ';' | '?' | '&') {
                    return Err(GatewayError::new(
                        ErrorKind::Validation,
                        "mcp-gateway-core",
                        "extract_catalog",
                        "uri template {template} uses an unsupported RFC 6570 operator form",
                    )
                    .with_var("template", template));
                }
            }
        }
    }
    Ok(())
}

/// Deterministically derived field map: `CatalogItem` → generated GraphQL/REST
/// field name (spec §4.2). Two runs over the same catalog must agree
/// (testable property #1).
pub fn derive_field_names(catalog: &Catalog) -> Vec<(String, String)> {
    let mut used: HashSet<String> = RESERVED_FIELD_NAMES.iter().map(|s| s.to_string()).collect();
    let mut out = Vec::with_capacity(catalog.items.len());

    for item in &catalog.items {
        let base = sanitize_field_name(&item.name, item.kind);
        let mut candidate = base.clone();
        let mut suffix = 2;
        while used.contains(&candidate) {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        used.insert(candidate.clone());
        out.push((item.name.clone(), candidate));
    }

    out
}

fn sanitize_field_name(name: &str, kind: CatalogItemKind) -> String {
    let mut sanitized = String::with_capacity(name.len());
    let mut last_was_sub = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            sanitized.push(c);
            last_was_sub = false;
        } else if !last_was_sub {
            sanitized.push('_');
            last_was_sub = true;
        }
    }
    let trimmed = sanitized.trim_matches('_').to_string();
    let trimmed = if trimmed.is_empty() { "_".to_string() } else { trimmed };

    let starts_ok = trimmed
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);

    if starts_ok {
        trimmed
    } else {
        format!("{}_{}", kind.as_str().replace('-', "_"), trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ServerInfo;

    fn item(kind: CatalogItemKind, name: &str) -> CatalogItem {
        CatalogItem {
            kind,
            name: name.to_string(),
            title: None,
            description: None,
            detail: ItemDetail::Input { input: Value::Null },
            enumeration_index: 0,
        }
    }

    #[test]
    fn sanitizes_invalid_characters() {
        assert_eq!(sanitize_field_name("my tool!!", CatalogItemKind::Tool), "my_tool");
        assert_eq!(sanitize_field_name("123start", CatalogItemKind::Tool), "tool_123start");
        assert_eq!(sanitize_field_name("--leading", CatalogItemKind::Tool), "leading");
    }

    #[test]
    fn reserved_name_collisions_get_suffixed() {
        let catalog = Catalog::new(
            ServerInfo::default(),
            vec![item(CatalogItemKind::Tool, "callTool"), item(CatalogItemKind::Tool, "catalog")],
        );
        let fields = derive_field_names(&catalog);
        let generated: HashSet<_> = fields.iter().map(|(_, f)| f.clone()).collect();
        assert!(!generated.contains("callTool"));
        assert!(!generated.contains("catalog"));
    }

    #[test]
    fn deterministic_across_runs() {
        let catalog = Catalog::new(
            ServerInfo::default(),
            vec![
                item(CatalogItemKind::Tool, "echo"),
                item(CatalogItemKind::Tool, "echo!"),
                item(CatalogItemKind::Prompt, "echo"),
            ],
        );
        let first = derive_field_names(&catalog);
        let second = derive_field_names(&catalog);
        assert_eq!(first, second);
    }

    #[test]
    fn duplicate_sanitized_names_get_incrementing_suffix() {
        let catalog = Catalog::new(
            ServerInfo::default(),
            vec![item(CatalogItemKind::Tool, "a!b"), item(CatalogItemKind::Tool, "a@b"), item(CatalogItemKind::Tool, "a#b")],
        );
        let fields: Vec<_> = derive_field_names(&catalog).into_iter().map(|(_, f)| f).collect();
        assert_eq!(fields, vec!["a_b", "a_b_2", "a_b_3"]);
    }

    #[test]
    fn rejects_rfc6570_operator_forms() {
        assert!(reject_rfc6570_operators("/files/{name}").is_ok());
        assert!(reject_rfc6570_operators("/files/{+path}").is_err());
        assert!(reject_rfc6570_operators("/files/{?query}").is_err());
    }
}
