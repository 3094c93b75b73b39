//! Plan execution
//!
//! Validates plans, routes them to the right backend and reports every
//! expected failure as an [`ExecutionResult`] rather than an error.

mod backend;
mod executor;

pub use backend::{
    BindingRow, DocumentPage, DocumentQuery, DocumentStore, GraphStore, HttpDocumentStore,
    HttpGraphStore, REQUEST_CHARGE_HEADER,
};
pub use executor::QueryExecutor;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why an execution did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Plan rejected before any backend was touched
    Validation,
    /// Backend returned an error
    Backend,
    /// Backend did not answer in time
    Timeout,
}

/// Outcome of executing one plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub documents: Vec<Value>,
    /// Backend-reported or estimated cost
    pub ru_cost: f64,
    pub execution_time_ms: u64,
    pub error_message: Option<String>,
    pub executed_query: Option<String>,
    /// The caller should move on to the next strategy
    pub fallback_used: bool,
    pub failure: Option<FailureKind>,
}

impl ExecutionResult {
    pub fn succeeded(documents: Vec<Value>, ru_cost: f64, execution_time_ms: u64, query: &str) -> Self {
        Self {
            success: true,
            documents,
            ru_cost,
            execution_time_ms,
            error_message: None,
            executed_query: Some(query.to_string()),
            fallback_used: false,
            failure: None,
        }
    }

    /// Plan refused by admission checks
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            documents: Vec::new(),
            ru_cost: 0.0,
            execution_time_ms: 0,
            error_message: Some(message.into()),
            executed_query: None,
            fallback_used: true,
            failure: Some(FailureKind::Validation),
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>, execution_time_ms: u64, query: &str) -> Self {
        Self {
            success: false,
            documents: Vec::new(),
            ru_cost: 0.0,
            execution_time_ms,
            error_message: Some(message.into()),
            executed_query: Some(query.to_string()),
            fallback_used: true,
            failure: Some(kind),
        }
    }

    pub fn doc_count(&self) -> usize {
        self.documents.len()
    }
}
