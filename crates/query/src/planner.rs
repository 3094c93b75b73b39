//! LLM query planner boundary
//!
//! The planner receives the text plus schema and ontology context and
//! answers with a structured plan. Prompt construction lives with the
//! planner service; this side only ships context and checks the answer.

use crate::plan::{QueryPlan, RawQueryPlan};
use async_trait::async_trait;
use caig_common::config::PlannerConfig;
use caig_common::errors::{AppError, Result};
use caig_common::SchemaContext;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Input to the planner
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanRequest {
    pub text: String,
    /// Rendered document schema
    pub schema_context: String,
    /// Ontology text
    pub ontology_context: String,
}

impl PlanRequest {
    pub fn new(text: impl Into<String>, context: &SchemaContext) -> Self {
        Self {
            text: text.into(),
            schema_context: context.schema_summary.clone(),
            ontology_context: context.ontology.clone(),
        }
    }

    /// Request without schema context
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            schema_context: String::new(),
            ontology_context: String::new(),
        }
    }
}

/// Generates a plan for one request
#[async_trait]
pub trait QueryPlanner: Send + Sync {
    async fn plan(&self, request: &PlanRequest) -> Result<QueryPlan>;
}

/// Planner service reached over HTTP
pub struct HttpQueryPlanner {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpQueryPlanner {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// `None` when no endpoint is configured
    pub fn from_config(config: &PlannerConfig) -> Result<Option<Self>> {
        config
            .endpoint
            .as_deref()
            .map(|endpoint| {
                Self::new(
                    endpoint,
                    config.api_key.clone(),
                    Duration::from_secs(config.timeout_secs),
                )
            })
            .transpose()
    }
}

#[async_trait]
impl QueryPlanner for HttpQueryPlanner {
    #[instrument(skip(self, request), fields(endpoint = %self.endpoint))]
    async fn plan(&self, request: &PlanRequest) -> Result<QueryPlan> {
        let mut call = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            call = call.header(AUTHORIZATION, format!("Bearer {}", key));
        }

        let response = call.send().await.map_err(|e| AppError::Planner {
            message: format!("Request failed: {}", e),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Planner {
                message: format!("HTTP {}: {}", status, body),
            });
        }

        let body = response.text().await.map_err(|e| AppError::Planner {
            message: format!("Failed to read response: {}", e),
        })?;
        debug!(bytes = body.len(), "Planner responded");
        parse_plan(&body)
    }
}

/// Parse a planner answer; unknown strategies or query types are rejected
pub fn parse_plan(body: &str) -> Result<QueryPlan> {
    let mut raw: RawQueryPlan = serde_json::from_str(body).map_err(|e| AppError::Planner {
        message: format!("Malformed plan: {}", e),
    })?;
    raw.raw_response = Some(body.to_string());
    QueryPlan::try_from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{QueryType, Strategy};
    use serde_json::json;

    #[test]
    fn test_parse_plan_keeps_raw_response() {
        let body = json!({
            "strategy": "CONTRACT_DIRECT",
            "fallback_strategy": "VECTOR_SEARCH",
            "query_type": "SQL",
            "query_text": "SELECT * FROM c WHERE c.governing_law_state != @s",
            "execution_plan": {"collections": ["contracts"]},
            "confidence": 0.8,
            "reasoning": "negated state"
        })
        .to_string();

        let plan = parse_plan(&body).unwrap();
        assert_eq!(plan.strategy, Strategy::ContractDirect);
        assert_eq!(plan.query_type, QueryType::Sql);
        assert_eq!(plan.fallback_strategy, Some(Strategy::VectorSearch));
        assert_eq!(plan.raw_response.as_deref(), Some(body.as_str()));
    }

    #[test]
    fn test_parse_plan_rejections() {
        let unknown = json!({
            "strategy": "SHORTEST_PATH",
            "query_type": "SQL",
            "query_text": "SELECT * FROM c",
            "confidence": 0.9
        })
        .to_string();
        let err = parse_plan(&unknown).unwrap_err();
        assert!(err.is_validation_failure());

        let err = parse_plan("not json").unwrap_err();
        assert!(matches!(err, AppError::Planner { .. }));
        assert!(!err.is_validation_failure());
    }

    #[test]
    fn test_request_wire_shape() {
        let request = PlanRequest::text_only("contracts with Acme");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "text": "contracts with Acme",
                "schema_context": "",
                "ontology_context": ""
            })
        );
    }

    #[test]
    fn test_unconfigured_planner() {
        assert!(HttpQueryPlanner::from_config(&PlannerConfig::default())
            .unwrap()
            .is_none());

        let config = PlannerConfig {
            endpoint: Some("http://localhost:8080/plan".to_string()),
            api_key: Some("key".to_string()),
            timeout_secs: 5,
        };
        assert!(HttpQueryPlanner::from_config(&config).unwrap().is_some());
    }
}
