//! Core data model, error taxonomy, and policy mapping for the MCP gateway
//! runtime. Every other `mcp-gateway-*` crate depends on this one and on
//! nothing above it, mirroring the layering in spec §2.

pub mod catalog;
pub mod error;
pub mod extractor;
pub mod policy;
pub mod session;

pub use catalog::{Catalog, CatalogItem, CatalogItemKind, ItemDetail};
pub use error::{ErrorKind, GatewayError, GatewayResult, NormalizedError, ValidationIssue};
pub use extractor::{derive_field_names, extract_catalog};
pub use policy::{map_error_kind, map_jsonrpc_code, PolicyMapping};
pub use session::{McpCallResult, McpClient, RemoteTransportType, ServerInfo, ServerSpec, Session, TransportKind};
