//! CAIG Common Library
//!
//! Shared code for the CAIG query engine including:
//! - Entity catalogs and name matching
//! - Schema and ontology context
//! - Embedding client abstraction
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod catalog;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod metrics;
pub mod schema;

// Re-export commonly used types
pub use catalog::{CatalogHandle, EntityCatalog, EntityKind};
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use schema::{SchemaContext, SchemaContextBuilder};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
