//! Configuration management for CAIG services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Namespace the `caig:` prefix must be bound to in graph queries
pub const DEFAULT_CAIG_NAMESPACE: &str = "http://cosmosdb.com/caig#";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Plan admission and backend call settings
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Document store collection names
    #[serde(default)]
    pub collections: CollectionsConfig,

    /// Entity matching settings
    #[serde(default)]
    pub matching: MatchingConfig,

    /// LLM query planner
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Document store backend
    #[serde(default)]
    pub documents: DocumentStoreConfig,

    /// Graph store backend
    #[serde(default)]
    pub graph: GraphStoreConfig,

    /// Embedding service used for vector fallback
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Entity catalog source
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Schema and ontology descriptors
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Minimum plan confidence; values below 0.5 are raised to 0.5
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Backend call timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Result limit applied to generated graph and vector queries
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,

    /// Cost reported for graph queries that carry no estimate
    #[serde(default)]
    pub default_graph_cost: f64,

    /// Expected IRI of the `caig:` prefix
    #[serde(default = "default_caig_namespace")]
    pub caig_namespace: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectionsConfig {
    /// Contract documents
    #[serde(default = "default_contracts_collection")]
    pub contracts: String,

    /// Per-entity documents with pre-aggregated figures
    #[serde(default = "default_entities_collection")]
    pub entities: String,

    /// Chunks carrying embeddings
    #[serde(default = "default_chunks_collection")]
    pub chunks: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatchingConfig {
    /// How catalog-less negated phrases are bound: require_hint, resolve_unique, apply_to_all
    #[serde(default = "default_negation_policy")]
    pub negation_policy: String,

    /// Minimum fuzzy score for a party match to be accepted
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,

    /// Longest entity name, in tokens, considered during detection
    #[serde(default = "default_max_ngram")]
    pub max_ngram: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlannerConfig {
    /// Planner endpoint; planning is rule-based only when unset
    pub endpoint: Option<String>,

    /// API key sent as a bearer token
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_planner_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DocumentStoreConfig {
    /// Account endpoint, e.g. https://account.documents.azure.com
    pub endpoint: Option<String>,

    /// Database name
    #[serde(default = "default_database")]
    pub database: String,

    /// Pre-computed authorization token
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GraphStoreConfig {
    /// SPARQL query endpoint
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// API base URL (OpenAI compatible); vector fallback is disabled when unset
    pub api_base: Option<String>,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// JSON file with entity names per catalog
    #[serde(default = "default_catalog_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchemaConfig {
    /// JSON schema descriptor
    #[serde(default = "default_schema_path")]
    pub schema_path: String,

    /// Turtle ontology descriptor
    #[serde(default = "default_ontology_path")]
    pub ontology_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logging: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_min_confidence() -> f64 { 0.5 }
fn default_timeout_ms() -> u64 { 10_000 }
fn default_result_limit() -> usize { 50 }
fn default_caig_namespace() -> String { DEFAULT_CAIG_NAMESPACE.to_string() }
fn default_contracts_collection() -> String { "contracts".to_string() }
fn default_entities_collection() -> String { "entities".to_string() }
fn default_chunks_collection() -> String { "contract_chunks".to_string() }
fn default_negation_policy() -> String { "resolve_unique".to_string() }
fn default_fuzzy_threshold() -> f64 { 0.85 }
fn default_max_ngram() -> usize { 5 }
fn default_planner_timeout() -> u64 { 30 }
fn default_database() -> String { "caig".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_timeout() -> u64 { 30 }
fn default_catalog_path() -> String { "data/entities.json".to_string() }
fn default_schema_path() -> String { "data/schema.json".to_string() }
fn default_ontology_path() -> String { "data/ontology.ttl".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_service_name() -> String { "caig-query".to_string() }

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            timeout_ms: default_timeout_ms(),
            result_limit: default_result_limit(),
            default_graph_cost: 0.0,
            caig_namespace: default_caig_namespace(),
        }
    }
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            contracts: default_contracts_collection(),
            entities: default_entities_collection(),
            chunks: default_chunks_collection(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            negation_policy: default_negation_policy(),
            fuzzy_threshold: default_fuzzy_threshold(),
            max_ngram: default_max_ngram(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout_secs: default_planner_timeout(),
        }
    }
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            database: default_database(),
            auth_token: None,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            api_key: None,
            model: default_embedding_model(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self { path: default_catalog_path() }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            schema_path: default_schema_path(),
            ontology_path: default_ontology_path(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: false,
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionConfig::default(),
            collections: CollectionsConfig::default(),
            matching: MatchingConfig::default(),
            planner: PlannerConfig::default(),
            documents: DocumentStoreConfig::default(),
            graph: GraphStoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            catalog: CatalogConfig::default(),
            schema: SchemaConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__EXECUTION__TIMEOUT_MS=2500
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Backend call timeout as Duration
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution.timeout_ms)
    }

    /// Effective admission threshold; never below 0.5
    pub fn min_confidence(&self) -> f64 {
        self.execution.min_confidence.max(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.collections.contracts, "contracts");
        assert_eq!(config.execution.caig_namespace, DEFAULT_CAIG_NAMESPACE);
        assert_eq!(config.matching.negation_policy, "resolve_unique");
        assert!(config.planner.endpoint.is_none());
    }

    #[test]
    fn test_min_confidence_floor() {
        let mut config = AppConfig::default();
        config.execution.min_confidence = 0.2;
        assert_eq!(config.min_confidence(), 0.5);

        config.execution.min_confidence = 0.7;
        assert_eq!(config.min_confidence(), 0.7);
    }

    #[test]
    fn test_empty_sources_deserialize_to_defaults() {
        let config: AppConfig = Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.execution.timeout_ms, 10_000);
        assert_eq!(config.documents.database, "caig");
        assert_eq!(config.execution_timeout(), Duration::from_millis(10_000));
    }
}
