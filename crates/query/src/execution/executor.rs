//! Query executor

use super::backend::{BindingRow, DocumentQuery, DocumentStore, GraphStore};
use super::{ExecutionResult, FailureKind};
use crate::plan::{QueryPlan, QueryType, RawQueryPlan, Strategy};
use crate::validation::{SparqlValidator, SqlValidator};
use caig_common::config::{AppConfig, CollectionsConfig};
use caig_common::errors::{AppError, Result};
use caig_common::metrics;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Validates and executes plans against the configured backends
pub struct QueryExecutor {
    documents: Option<Arc<dyn DocumentStore>>,
    graph: Option<Arc<dyn GraphStore>>,
    sql: SqlValidator,
    sparql: SparqlValidator,
    min_confidence: f64,
    timeout: Duration,
    collections: CollectionsConfig,
    default_graph_cost: f64,
}

impl QueryExecutor {
    /// Executor without backends; attach them with the `with_*` methods
    pub fn new(config: &AppConfig) -> Self {
        let collections = config.collections.clone();
        let sql = SqlValidator::new([
            collections.contracts.clone(),
            collections.entities.clone(),
            collections.chunks.clone(),
        ]);

        Self {
            documents: None,
            graph: None,
            sql,
            sparql: SparqlValidator::new(config.execution.caig_namespace.clone()),
            min_confidence: config.min_confidence(),
            timeout: config.execution_timeout(),
            collections,
            default_graph_cost: config.execution.default_graph_cost,
        }
    }

    pub fn with_document_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(store);
        self
    }

    pub fn with_graph_store(mut self, store: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(store);
        self
    }

    pub fn has_document_store(&self) -> bool {
        self.documents.is_some()
    }

    pub fn has_graph_store(&self) -> bool {
        self.graph.is_some()
    }

    /// Admission checks: confidence floor and the validator for the plan's language.
    ///
    /// Returns the rejection reason, if any.
    pub fn check_plan(&self, plan: &QueryPlan) -> Option<String> {
        if !(0.0..=1.0).contains(&plan.confidence) {
            metrics::record_rejection(plan.strategy.as_str(), "invalid_confidence");
            let error = AppError::Validation {
                message: format!("Plan confidence {} is outside [0, 1]", plan.confidence),
            };
            return Some(error.to_string());
        }
        if plan.confidence < self.min_confidence {
            metrics::record_rejection(plan.strategy.as_str(), "low_confidence");
            let error = AppError::LowConfidence {
                confidence: plan.confidence,
                minimum: self.min_confidence,
            };
            return Some(error.to_string());
        }

        let outcome = match plan.query_type {
            QueryType::Sql => self.sql.validate(&plan.query_text),
            QueryType::Sparql => self.sparql.validate(&plan.query_text),
        };
        for warning in &outcome.warnings {
            warn!(strategy = %plan.strategy, warning = %warning, "Query validation warning");
        }
        if !outcome.is_valid {
            metrics::record_rejection(plan.strategy.as_str(), "validation");
            return Some(outcome.message);
        }
        None
    }

    /// Execute a typed plan.
    ///
    /// Validation failures, backend errors and timeouts are reported in the
    /// result with `fallback_used = true`. Only a missing backend is an error.
    #[instrument(skip(self, plan), fields(strategy = %plan.strategy, query_type = %plan.query_type))]
    pub async fn execute_plan(
        &self,
        plan: &QueryPlan,
        strategy_hint: Option<Strategy>,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        if let Some(message) = self.check_plan(plan) {
            warn!(reason = %message, "Plan rejected");
            return Ok(ExecutionResult::rejected(message));
        }

        let timeout = timeout.unwrap_or(self.timeout);
        match plan.query_type {
            QueryType::Sql => {
                let store = self.documents.as_ref().ok_or_else(|| AppError::Configuration {
                    message: "No document store configured for SQL plans".to_string(),
                })?;
                let collection = self.target_collection(plan, strategy_hint);
                Ok(self.run_document_query(store.as_ref(), plan, &collection, timeout).await)
            }
            QueryType::Sparql => {
                let store = self.graph.as_ref().ok_or_else(|| AppError::Configuration {
                    message: "No graph store configured for SPARQL plans".to_string(),
                })?;
                Ok(self.run_graph_query(store.as_ref(), plan, timeout).await)
            }
        }
    }

    /// Execute a plan straight from the planner.
    ///
    /// Unknown strategies or query types are validation failures.
    pub async fn execute_raw_plan(
        &self,
        raw: RawQueryPlan,
        strategy_hint: Option<Strategy>,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        match QueryPlan::try_from(raw) {
            Ok(plan) => self.execute_plan(&plan, strategy_hint, timeout).await,
            Err(e) if e.is_validation_failure() => {
                metrics::record_rejection("unknown", "invalid_plan");
                warn!(error = %e, "Raw plan rejected");
                Ok(ExecutionResult::rejected(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// First plan collection, else the default collection for the strategy
    fn target_collection(&self, plan: &QueryPlan, strategy_hint: Option<Strategy>) -> String {
        if let Some(collection) = plan.target_collection() {
            return collection.to_string();
        }
        let collections = &self.collections;
        match strategy_hint.unwrap_or(plan.strategy) {
            Strategy::EntityFirst | Strategy::EntityAggregation => collections.entities.clone(),
            Strategy::ContractDirect | Strategy::GraphTraversal => collections.contracts.clone(),
            Strategy::VectorSearch => collections.chunks.clone(),
        }
    }

    async fn run_document_query(
        &self,
        store: &dyn DocumentStore,
        plan: &QueryPlan,
        collection: &str,
        timeout: Duration,
    ) -> ExecutionResult {
        let query = DocumentQuery {
            text: plan.query_text.clone(),
            parameters: plan.parameters(),
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, store.query(collection, &query)).await;
        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        let result = match outcome {
            Ok(Ok(page)) => {
                info!(
                    collection = %collection,
                    documents = page.documents.len(),
                    ru_cost = page.request_charge,
                    elapsed_ms,
                    "Document query succeeded"
                );
                ExecutionResult::succeeded(page.documents, page.request_charge, elapsed_ms, &plan.query_text)
            }
            Ok(Err(e)) => {
                warn!(collection = %collection, error = %e, "Document query failed");
                ExecutionResult::failed(FailureKind::Backend, e.to_string(), elapsed_ms, &plan.query_text)
            }
            Err(_) => {
                warn!(collection = %collection, timeout_ms = timeout.as_millis() as u64, "Document query timed out");
                let error = AppError::BackendTimeout {
                    backend: "documents".to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                };
                ExecutionResult::failed(FailureKind::Timeout, error.to_string(), elapsed_ms, &plan.query_text)
            }
        };

        metrics::record_execution(
            plan.strategy.as_str(),
            "documents",
            elapsed.as_secs_f64(),
            result.ru_cost,
            result.success,
        );
        result
    }

    async fn run_graph_query(
        &self,
        store: &dyn GraphStore,
        plan: &QueryPlan,
        timeout: Duration,
    ) -> ExecutionResult {
        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, store.query(&plan.query_text)).await;
        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        let result = match outcome {
            Ok(Ok(rows)) => {
                let cost = plan.estimated_cost().unwrap_or(self.default_graph_cost);
                let documents: Vec<Value> = rows.into_iter().map(flatten_binding).collect();
                info!(rows = documents.len(), cost, elapsed_ms, "Graph query succeeded");
                ExecutionResult::succeeded(documents, cost, elapsed_ms, &plan.query_text)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Graph query failed");
                ExecutionResult::failed(FailureKind::Backend, e.to_string(), elapsed_ms, &plan.query_text)
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Graph query timed out");
                let error = AppError::BackendTimeout {
                    backend: "graph".to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                };
                ExecutionResult::failed(FailureKind::Timeout, error.to_string(), elapsed_ms, &plan.query_text)
            }
        };

        metrics::record_execution(
            plan.strategy.as_str(),
            "graph",
            elapsed.as_secs_f64(),
            result.ru_cost,
            result.success,
        );
        result
    }
}

/// `{var: {type, value, datatype?, xml:lang?}}` → `{var: value}`
fn flatten_binding(row: BindingRow) -> Value {
    let flat: Map<String, Value> = row
        .into_iter()
        .map(|(var, binding)| {
            let value = match binding {
                Value::Object(mut fields) => fields.remove("value").unwrap_or(Value::Null),
                other => other,
            };
            (var, value)
        })
        .collect();
    Value::Object(flat)
}
