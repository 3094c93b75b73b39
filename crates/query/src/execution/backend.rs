//! Backend abstractions
//!
//! Two kinds of backend serve plans:
//! - Document store (SQL over JSON documents, Cosmos-style REST)
//! - Graph store (SPARQL 1.1 protocol)

use crate::plan::QueryParameter;
use async_trait::async_trait;
use caig_common::config::{DocumentStoreConfig, GraphStoreConfig};
use caig_common::errors::{AppError, Result};
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

/// Header carrying the request charge of a document query
pub const REQUEST_CHARGE_HEADER: &str = "x-ms-request-charge";

/// Parameterized document query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentQuery {
    #[serde(rename = "query")]
    pub text: String,
    pub parameters: Vec<QueryParameter>,
}

/// Documents returned by one query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentPage {
    pub documents: Vec<Value>,
    /// Backend-reported cost in request units
    pub request_charge: f64,
}

/// One SPARQL result row: variable → binding object (`{type, value, ...}`)
pub type BindingRow = Map<String, Value>;

/// SQL document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query(&self, collection: &str, query: &DocumentQuery) -> Result<DocumentPage>;
}

/// SPARQL graph store
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn query(&self, sparql: &str) -> Result<Vec<BindingRow>>;
}

#[derive(Deserialize)]
struct DocumentResponse {
    #[serde(rename = "Documents", default)]
    documents: Vec<Value>,
}

/// Document store over the REST query endpoint
pub struct HttpDocumentStore {
    client: reqwest::Client,
    endpoint: String,
    database: String,
    auth_token: Option<String>,
}

impl HttpDocumentStore {
    pub fn new(config: &DocumentStoreConfig, endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            auth_token: config.auth_token.clone(),
        })
    }

    /// `None` when no endpoint is configured
    pub fn from_config(config: &DocumentStoreConfig, timeout: Duration) -> Result<Option<Self>> {
        config
            .endpoint
            .as_deref()
            .map(|endpoint| Self::new(config, endpoint, timeout))
            .transpose()
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn query(&self, collection: &str, query: &DocumentQuery) -> Result<DocumentPage> {
        let url = format!(
            "{}/dbs/{}/colls/{}/docs",
            self.endpoint, self.database, collection
        );

        let mut request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/query+json")
            .header("x-ms-documentdb-isquery", "True")
            .header("x-ms-documentdb-query-enablecrosspartition", "True")
            .json(query);
        if let Some(token) = &self.auth_token {
            request = request.header(AUTHORIZATION, token);
        }

        let response = request.send().await.map_err(|e| AppError::Backend {
            backend: "documents".to_string(),
            message: format!("Request failed: {}", e),
        })?;

        let status = response.status();
        let request_charge = response
            .headers()
            .get(REQUEST_CHARGE_HEADER)
            .and_then(|v: &HeaderValue| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Backend {
                backend: "documents".to_string(),
                message: format!("HTTP {}: {}", status, body),
            });
        }

        let body: DocumentResponse = response.json().await.map_err(|e| AppError::Backend {
            backend: "documents".to_string(),
            message: format!("Failed to parse response: {}", e),
        })?;

        debug!(
            collection = %collection,
            documents = body.documents.len(),
            request_charge,
            "Document query complete"
        );

        Ok(DocumentPage {
            documents: body.documents,
            request_charge,
        })
    }
}

#[derive(Deserialize)]
struct SparqlResults {
    #[serde(default)]
    results: Option<SparqlBindings>,
    #[serde(default)]
    boolean: Option<bool>,
}

#[derive(Deserialize)]
struct SparqlBindings {
    #[serde(default)]
    bindings: Vec<BindingRow>,
}

/// Graph store speaking the SPARQL 1.1 protocol
pub struct HttpGraphStore {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGraphStore {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    /// `None` when no endpoint is configured
    pub fn from_config(config: &GraphStoreConfig, timeout: Duration) -> Result<Option<Self>> {
        config
            .endpoint
            .as_deref()
            .map(|endpoint| Self::new(endpoint, timeout))
            .transpose()
    }
}

#[async_trait]
impl GraphStore for HttpGraphStore {
    async fn query(&self, sparql: &str) -> Result<Vec<BindingRow>> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/sparql-query")
            .header(ACCEPT, "application/sparql-results+json")
            .body(sparql.to_string())
            .send()
            .await
            .map_err(|e| AppError::Backend {
                backend: "graph".to_string(),
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Backend {
                backend: "graph".to_string(),
                message: format!("HTTP {}: {}", status, body),
            });
        }

        let results: SparqlResults = response.json().await.map_err(|e| AppError::Backend {
            backend: "graph".to_string(),
            message: format!("Failed to parse response: {}", e),
        })?;

        Ok(into_rows(results))
    }
}

fn into_rows(results: SparqlResults) -> Vec<BindingRow> {
    if let Some(answer) = results.boolean {
        let mut row = Map::new();
        row.insert(
            "boolean".to_string(),
            serde_json::json!({"type": "literal", "value": answer}),
        );
        return vec![row];
    }
    results.results.map(|r| r.bindings).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_query_wire_shape() {
        let query = DocumentQuery {
            text: "SELECT * FROM c WHERE c.x = @x".to_string(),
            parameters: vec![QueryParameter::new("@x", "delaware")],
        };
        assert_eq!(
            serde_json::to_value(&query).unwrap(),
            json!({
                "query": "SELECT * FROM c WHERE c.x = @x",
                "parameters": [{"name": "@x", "value": "delaware"}]
            })
        );
    }

    #[test]
    fn test_sparql_results_parsing() {
        let select: SparqlResults = serde_json::from_value(json!({
            "head": {"vars": ["contract"]},
            "results": {"bindings": [
                {"contract": {"type": "uri", "value": "http://cosmosdb.com/caig#c1"}}
            ]}
        }))
        .unwrap();
        let rows = into_rows(select);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["contract"]["value"], "http://cosmosdb.com/caig#c1");

        let ask: SparqlResults = serde_json::from_value(json!({"head": {}, "boolean": true})).unwrap();
        assert_eq!(into_rows(ask)[0]["boolean"]["value"], json!(true));
    }

    #[test]
    fn test_unconfigured_backends() {
        let timeout = Duration::from_secs(1);
        assert!(HttpDocumentStore::from_config(&DocumentStoreConfig::default(), timeout)
            .unwrap()
            .is_none());
        assert!(HttpGraphStore::from_config(&GraphStoreConfig::default(), timeout)
            .unwrap()
            .is_none());

        let config = GraphStoreConfig {
            endpoint: Some("http://localhost:7200/repositories/caig".to_string()),
        };
        assert!(HttpGraphStore::from_config(&config, timeout).unwrap().is_some());
    }
}
