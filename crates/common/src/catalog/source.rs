//! Catalog sources

use super::{CatalogBuilder, EntityCatalog, EntityKind};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Produces complete catalog snapshots
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Build a fresh snapshot
    async fn load(&self) -> Result<EntityCatalog>;

    /// Human-readable origin for logs
    fn describe(&self) -> String;
}

/// Reads catalogs from a JSON file:
///
/// ```json
/// {
///   "governing_law_state": ["Delaware", "New York"],
///   "contractor_party": [{"name": "Acme Corp", "contract_count": 12}]
/// }
/// ```
pub struct JsonCatalogSource {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        contract_count: Option<u64>,
    },
}

impl JsonCatalogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse catalog JSON text
    pub fn parse(text: &str) -> Result<EntityCatalog> {
        let raw: BTreeMap<String, Vec<RawEntry>> = serde_json::from_str(text)?;

        let mut builder = CatalogBuilder::new();
        for (field, entries) in raw {
            let kind = EntityKind::from_field(&field).ok_or_else(|| AppError::Catalog {
                message: format!("Unknown catalog '{}'", field),
            })?;

            for entry in entries {
                builder = match entry {
                    RawEntry::Name(name) => builder.insert(kind, &name),
                    RawEntry::Detailed { name, contract_count } => {
                        builder.insert_with_count(kind, &name, contract_count)
                    }
                };
            }
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl CatalogSource for JsonCatalogSource {
    async fn load(&self) -> Result<EntityCatalog> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| AppError::Catalog {
                message: format!("Failed to read {}: {}", self.path.display(), e),
            })?;

        Self::parse(&text)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_entries() {
        let catalog = JsonCatalogSource::parse(
            r#"{
                "governing_law_state": ["Delaware", "Alabama"],
                "contractor_party": [{"name": "Acme Corp", "contract_count": 4}, "Zenith LLC"]
            }"#,
        )
        .unwrap();

        assert_eq!(catalog.len(), 4);
        assert_eq!(
            catalog
                .get(EntityKind::ContractorParty, "acme")
                .and_then(|e| e.contract_count),
            Some(4)
        );
        assert!(catalog.is_known("zenith"));
    }

    #[test]
    fn test_unknown_catalog_is_rejected() {
        let err = JsonCatalogSource::parse(r#"{"planets": ["Mars"]}"#).unwrap_err();
        assert!(matches!(err, AppError::Catalog { .. }));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let source = JsonCatalogSource::new("/nonexistent/entities.json");
        assert!(source.load().await.is_err());
    }
}
