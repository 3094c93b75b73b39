//! Query safety validation
//!
//! Pure, stateless syntax and injection checks for generated query text.
//! - SQL: dangerous-pattern guard, shape checks, literal scanning
//! - SPARQL: read-only guard, namespace check, structure checks

mod sparql;
mod sql;

pub use sparql::{is_valid_variable_name, sanitize_literal, SparqlValidator};
pub use sql::SqlValidator;

use crate::plan::QueryType;
use serde::Serialize;

/// Result of validating one query text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,

    /// Failure reason, or "OK"
    pub message: String,

    /// Non-fatal findings
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            message: "OK".to_string(),
            warnings: Vec::new(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            message: message.into(),
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// Validator for one query language
pub trait QueryValidator: Send + Sync {
    fn validate(&self, text: &str) -> ValidationOutcome;

    fn query_type(&self) -> QueryType;
}
