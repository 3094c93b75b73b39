//! Descriptor sources for the schema context

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Raw descriptor texts
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptors {
    /// JSON schema descriptor
    pub schema: String,
    /// Turtle ontology descriptor
    pub ontology: String,
}

/// Supplies descriptor texts
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn load(&self) -> Result<Descriptors>;

    /// Human-readable origin for logs
    fn describe(&self) -> String;
}

/// Reads both descriptors from disk
pub struct FileContextSource {
    schema_path: PathBuf,
    ontology_path: PathBuf,
}

impl FileContextSource {
    pub fn new(schema_path: impl Into<PathBuf>, ontology_path: impl Into<PathBuf>) -> Self {
        Self {
            schema_path: schema_path.into(),
            ontology_path: ontology_path.into(),
        }
    }

    async fn read(path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::Schema {
                message: format!("Failed to read {}: {}", path.display(), e),
            })
    }
}

#[async_trait]
impl ContextSource for FileContextSource {
    async fn load(&self) -> Result<Descriptors> {
        let (schema, ontology) = tokio::try_join!(
            Self::read(&self.schema_path),
            Self::read(&self.ontology_path)
        )?;
        Ok(Descriptors { schema, ontology })
    }

    fn describe(&self) -> String {
        format!(
            "{} + {}",
            self.schema_path.display(),
            self.ontology_path.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_both_files() {
        let dir = std::env::temp_dir().join(format!("caig-schema-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let schema = dir.join("schema.json");
        let ontology = dir.join("ontology.ttl");
        tokio::fs::write(&schema, "{\"collections\": {}}").await.unwrap();
        tokio::fs::write(&ontology, "caig:Contract a owl:Class .").await.unwrap();

        let source = FileContextSource::new(&schema, &ontology);
        let descriptors = source.load().await.unwrap();
        assert_eq!(descriptors.schema, "{\"collections\": {}}");
        assert!(descriptors.ontology.starts_with("caig:Contract"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_ontology() {
        let source = FileContextSource::new("/nonexistent/schema.json", "/nonexistent/o.ttl");
        assert!(matches!(source.load().await, Err(AppError::Schema { .. })));
    }
}
