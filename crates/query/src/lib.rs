//! CAIG Query Strategy Engine
//!
//! Turns a natural-language question about the contract corpus into an
//! executable, validated query plan and runs it with fallback:
//! - Entity detection and rule-based strategy selection
//! - SQL and SPARQL safety validation
//! - Plan execution against document and graph backends
//! - Step-by-step execution tracing

pub mod execution;
pub mod orchestrator;
pub mod plan;
pub mod planner;
pub mod strategy;
pub mod tracker;
pub mod validation;

pub use execution::{ExecutionResult, FailureKind, QueryExecutor};
pub use orchestrator::{RetrievalOrchestrator, RetrievalOutcome};
pub use plan::{QueryPlan, QueryType, RawQueryPlan, Strategy};
pub use planner::{HttpQueryPlanner, PlanRequest, QueryPlanner};
pub use strategy::{EntityDetector, NegationPolicy, QueryOptimizer, RuleBasedDetector};
pub use tracker::ExecutionTracker;
pub use validation::{QueryValidator, SparqlValidator, SqlValidator, ValidationOutcome};
