//! Catalog data model (spec §3): `{server: {info}, items: []CatalogItem}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::ServerInfo;

/// Tagged kind discriminant for a [`CatalogItem`] (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CatalogItemKind {
    Tool,
    Prompt,
    Resource,
    ResourceTemplate,
}

impl CatalogItemKind {
    /// Fixed type ordering used for the deterministic catalog sort (spec §4.2).
    pub fn sort_rank(self) -> u8 {
        match self {
            CatalogItemKind::Tool => 0,
            CatalogItemKind::Prompt => 1,
            CatalogItemKind::Resource => 2,
            CatalogItemKind::ResourceTemplate => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CatalogItemKind::Tool => "tool",
            CatalogItemKind::Prompt => "prompt",
            CatalogItemKind::Resource => "resource",
            CatalogItemKind::ResourceTemplate => "resource-template",
        }
    }
}

/// Type-specific payload carried by a [`CatalogItem`] (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemDetail {
    /// Tools and prompts carry an `input.json` JSON Schema.
    Input { input: Value },
    /// Resources carry a concrete `uri` + `mimeType`.
    Resource { uri: String, #[serde(rename = "mimeType")] mime_type: Option<String> },
    /// Resource templates carry a `{name}`-placeholder URI template.
    Template { #[serde(rename = "uriTemplate")] uri_template: String },
}

/// One entry in a [`Catalog`] (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    #[serde(rename = "type")]
    pub kind: CatalogItemKind,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub detail: ItemDetail,
    /// Original enumeration order from the upstream `*/list` call, used as
    /// the final tiebreaker in the deterministic sort (spec §4.2).
    #[serde(skip)]
    pub enumeration_index: usize,
}

/// `{server: {info}, items: []CatalogItem}` (spec §3). Produced once per
/// [`Session`](crate::session::Session) and immutable thereafter — a new
/// extraction always yields a new `Catalog`, never a mutation of a prior one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub server: ServerInfo,
    pub items: Vec<CatalogItem>,
}

impl Catalog {
    pub fn new(server: ServerInfo, mut items: Vec<CatalogItem>) -> Self {
        sort_items(&mut items);
        Self { server, items }
    }

    pub fn tools(&self) -> impl Iterator<Item = &CatalogItem> {
        self.items.iter().filter(|i| i.kind == CatalogItemKind::Tool)
    }

    pub fn prompts(&self) -> impl Iterator<Item = &CatalogItem> {
        self.items.iter().filter(|i| i.kind == CatalogItemKind::Prompt)
    }

    pub fn find(&self, kind: CatalogItemKind, name: &str) -> Option<&CatalogItem> {
        self.items.iter().find(|i| i.kind == kind && i.name == name)
    }
}

/// Stable ordering (spec §4.2): (1) by type in tool → prompt → resource →
/// resource-template, (2) case-sensitive ascending by name, (3) original
/// enumeration order as a tiebreaker.
fn sort_items(items: &mut [CatalogItem]) {
    items.sort_by(|a, b| {
        a.kind
            .sort_rank()
            .cmp(&b.kind.sort_rank())
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.enumeration_index.cmp(&b.enumeration_index))
    });
}
