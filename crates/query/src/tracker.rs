//! Execution tracking
//!
//! Records every step of one retrieval: the rule-based plan, the generated
//! plan, validation errors and each backend attempt with its cost. The
//! trace renders as plain text for consoles and logs.

use crate::execution::ExecutionResult;
use crate::plan::{QueryPlan, Strategy};
use caig_common::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt::Write;
use uuid::Uuid;

/// Lifecycle of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Success,
    Failure,
}

impl StepStatus {
    fn tag(&self) -> &'static str {
        match self {
            StepStatus::Pending => "[..]",
            StepStatus::Success => "[OK]",
            StepStatus::Failure => "[FAIL]",
        }
    }
}

/// One execution attempt
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStep {
    pub name: String,
    pub strategy: Strategy,
    pub collection: Option<String>,
    pub status: StepStatus,
    pub ru_cost: f64,
    pub docs_found: usize,
    pub metadata: Map<String, Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Opaque reference to a started step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepHandle {
    tracker: Uuid,
    index: usize,
}

/// What a step produced
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub success: bool,
    pub ru_cost: f64,
    pub docs_found: usize,
    pub metadata: Map<String, Value>,
}

impl StepOutcome {
    pub fn from_result(result: &ExecutionResult) -> Self {
        let mut metadata = Map::new();
        metadata.insert("execution_time_ms".to_string(), result.execution_time_ms.into());
        if let Some(error) = &result.error_message {
            metadata.insert("error".to_string(), Value::String(error.clone()));
        }
        if let Some(kind) = result.failure {
            metadata.insert("failure".to_string(), serde_json::to_value(kind).unwrap_or(Value::Null));
        }

        Self {
            success: result.success,
            ru_cost: result.ru_cost,
            docs_found: result.doc_count(),
            metadata,
        }
    }

    /// Step that failed before producing a result
    pub fn failed(message: impl Into<String>) -> Self {
        let mut metadata = Map::new();
        metadata.insert("error".to_string(), Value::String(message.into()));
        Self {
            success: false,
            metadata,
            ..Self::default()
        }
    }
}

/// Summary of a plan as shown in the trace
#[derive(Debug, Clone, Serialize)]
struct PlanSummary {
    strategy: Strategy,
    confidence: f64,
    reasoning: String,
    query_text: String,
}

impl From<&QueryPlan> for PlanSummary {
    fn from(plan: &QueryPlan) -> Self {
        Self {
            strategy: plan.strategy,
            confidence: plan.confidence,
            reasoning: plan.reasoning.clone(),
            query_text: plan.query_text.clone(),
        }
    }
}

/// Trace of one retrieval
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionTracker {
    id: Uuid,
    query: String,
    rule_plan: PlanSummary,
    generated_plan: Option<PlanSummary>,
    validation_error: Option<String>,
    steps: Vec<ExecutionStep>,
    open_step: Option<usize>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl ExecutionTracker {
    pub fn new(query: impl Into<String>, rule_plan: &QueryPlan) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            rule_plan: PlanSummary::from(rule_plan),
            generated_plan: None,
            validation_error: None,
            steps: Vec::new(),
            open_step: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn attach_generated_plan(&mut self, plan: &QueryPlan) -> Result<()> {
        self.ensure_open()?;
        self.generated_plan = Some(PlanSummary::from(plan));
        Ok(())
    }

    pub fn record_validation_error(&mut self, message: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        self.validation_error = Some(message.into());
        Ok(())
    }

    /// Whether the generated plan chose a different strategy than the rules
    pub fn strategy_mismatch(&self) -> bool {
        self.generated_plan
            .as_ref()
            .is_some_and(|generated| generated.strategy != self.rule_plan.strategy)
    }

    /// Open a step; only one step may be open at a time
    pub fn start_step(
        &mut self,
        name: impl Into<String>,
        strategy: Strategy,
        collection: Option<String>,
    ) -> Result<StepHandle> {
        self.ensure_open()?;
        if let Some(index) = self.open_step {
            return Err(AppError::InvalidState {
                message: format!("Step '{}' is still open", self.steps[index].name),
            });
        }

        self.steps.push(ExecutionStep {
            name: name.into(),
            strategy,
            collection,
            status: StepStatus::Pending,
            ru_cost: 0.0,
            docs_found: 0,
            metadata: Map::new(),
            started_at: Utc::now(),
            completed_at: None,
        });
        let index = self.steps.len() - 1;
        self.open_step = Some(index);

        Ok(StepHandle {
            tracker: self.id,
            index,
        })
    }

    pub fn complete_step(&mut self, handle: StepHandle, outcome: StepOutcome) -> Result<()> {
        if handle.tracker != self.id {
            return Err(AppError::InvalidState {
                message: "Step handle belongs to another tracker".to_string(),
            });
        }
        if self.open_step != Some(handle.index) {
            return Err(AppError::InvalidState {
                message: format!("Step {} is not open", handle.index + 1),
            });
        }

        let step = &mut self.steps[handle.index];
        step.status = if outcome.success {
            StepStatus::Success
        } else {
            StepStatus::Failure
        };
        step.ru_cost = outcome.ru_cost;
        step.docs_found = outcome.docs_found;
        step.metadata = outcome.metadata;
        step.completed_at = Some(Utc::now());
        self.open_step = None;
        Ok(())
    }

    /// Close the trace. Fails while a step is still open.
    pub fn finish(&mut self) -> Result<()> {
        self.ensure_open()?;
        if let Some(index) = self.open_step {
            return Err(AppError::InvalidState {
                message: format!("Cannot finish with step '{}' open", self.steps[index].name),
            });
        }
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    pub fn total_cost(&self) -> f64 {
        self.steps.iter().map(|s| s.ru_cost).sum()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_finished() {
            return Err(AppError::InvalidState {
                message: format!("Tracker {} is already finished", self.id),
            });
        }
        Ok(())
    }

    /// Plain-text rendering of the whole trace
    pub fn visualize_ascii(&self) -> String {
        let rule = "=".repeat(72);
        let thin = "-".repeat(72);
        let mut out = String::new();

        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Execution trace {}", self.id);
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Query: {}", self.query);
        let _ = writeln!(out, "{}", thin);

        let _ = writeln!(out, "Rule-based plan");
        write_plan(&mut out, &self.rule_plan, false);

        if let Some(generated) = &self.generated_plan {
            let _ = writeln!(out, "{}", thin);
            let _ = writeln!(out, "Generated plan");
            write_plan(&mut out, generated, true);
        }

        if self.strategy_mismatch() {
            if let Some(generated) = &self.generated_plan {
                let _ = writeln!(
                    out,
                    "[!] Strategy mismatch: rules chose {}, planner chose {}",
                    self.rule_plan.strategy, generated.strategy
                );
            }
        }
        if let Some(error) = &self.validation_error {
            let _ = writeln!(out, "[!] Validation error: {}", error);
        }

        let _ = writeln!(out, "{}", thin);
        if self.steps.is_empty() {
            let _ = writeln!(out, "No execution steps");
        }
        for (i, step) in self.steps.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>2}. {:<6} {} [{}] collection={} cost={:.2} docs={}",
                i + 1,
                step.status.tag(),
                step.name,
                step.strategy,
                step.collection.as_deref().unwrap_or("-"),
                step.ru_cost,
                step.docs_found
            );
            if let Some(error) = step.metadata.get("error").and_then(|e| e.as_str()) {
                let _ = writeln!(out, "       error: {}", error);
            }
        }

        let _ = writeln!(out, "{}", thin);
        let _ = writeln!(out, "Total cost: {:.2}", self.total_cost());
        let _ = write!(out, "{}", rule);
        out
    }
}

fn write_plan(out: &mut String, plan: &PlanSummary, with_query: bool) {
    let _ = writeln!(out, "  Strategy:   {}", plan.strategy);
    let _ = writeln!(out, "  Confidence: {:.2}", plan.confidence);
    let _ = writeln!(out, "  Reasoning:  {}", plan.reasoning);
    if with_query {
        let _ = writeln!(out, "  Query:");
        let _ = writeln!(out, "{}", plan.query_text);
    }
}
