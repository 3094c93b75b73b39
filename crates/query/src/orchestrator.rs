//! Retrieval orchestration
//!
//! One pass per text: detect entities, build the rule-based plan, ask the
//! planner (if any), then try generated plan → rule-based plan → vector
//! plan until one executes without needing a fallback.

use crate::execution::{FailureKind, QueryExecutor};
use crate::plan::{QueryPlan, Strategy};
use crate::planner::{PlanRequest, QueryPlanner};
use crate::strategy::{EntityDetector, QueryOptimizer};
use crate::tracker::{ExecutionTracker, StepOutcome};
use caig_common::errors::{AppError, Result};
use caig_common::{metrics, CatalogHandle, Embedder, SchemaContextBuilder};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

const EMBEDDING_PARAMETER: &str = "@embedding";

/// What one retrieval produced
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub documents: Vec<Value>,
    /// Strategy of the successful attempt; `None` when every attempt failed
    pub strategy: Option<Strategy>,
    pub total_cost: f64,
    /// Attempts recorded in the trace
    pub attempts: usize,
    pub tracker: ExecutionTracker,
}

impl RetrievalOutcome {
    pub fn succeeded(&self) -> bool {
        self.strategy.is_some()
    }
}

/// Drives detection, planning and execution for one text at a time
pub struct RetrievalOrchestrator {
    catalog: CatalogHandle,
    detector: Arc<dyn EntityDetector>,
    optimizer: QueryOptimizer,
    executor: QueryExecutor,
    planner: Option<Arc<dyn QueryPlanner>>,
    schema: Option<Arc<SchemaContextBuilder>>,
    embedder: Option<Arc<dyn Embedder>>,
    /// Abort on a plan whose backend is not wired instead of falling back
    strict_wiring: bool,
}

impl RetrievalOrchestrator {
    pub fn new(
        catalog: CatalogHandle,
        detector: Arc<dyn EntityDetector>,
        optimizer: QueryOptimizer,
        executor: QueryExecutor,
    ) -> Self {
        Self {
            catalog,
            detector,
            optimizer,
            executor,
            planner: None,
            schema: None,
            embedder: None,
            strict_wiring: false,
        }
    }

    pub fn with_planner(mut self, planner: Arc<dyn QueryPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_schema(mut self, schema: Arc<SchemaContextBuilder>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_strict_wiring(mut self, strict: bool) -> Self {
        self.strict_wiring = strict;
        self
    }

    /// Rule-based plan only, without touching any backend
    pub fn rule_plan(&self, text: &str) -> QueryPlan {
        let catalog = self.catalog.snapshot();
        let detection = self.detector.detect(text, &catalog);
        self.optimizer.plan(text, &detection, &catalog)
    }

    #[instrument(skip(self), fields(text_len = text.len()))]
    pub async fn retrieve(&self, text: &str) -> Result<RetrievalOutcome> {
        let rule_plan = self.rule_plan(text);
        let mut tracker = ExecutionTracker::new(text, &rule_plan);

        let mut candidates = Vec::with_capacity(3);
        if let Some(generated) = self.generate_plan(text, &mut tracker).await? {
            candidates.push(("generated", generated));
        }
        let rule_is_vector = rule_plan.strategy == Strategy::VectorSearch;
        candidates.push(("rule_based", rule_plan));
        if !rule_is_vector {
            candidates.push(("vector_fallback", self.optimizer.vector_plan("Semantic fallback")));
        }

        let mut documents = Vec::new();
        let mut strategy = None;
        let mut previous: Option<Strategy> = None;

        for (label, plan) in candidates {
            if needs_embedding(&plan) && self.embedder.is_none() {
                warn!(step = label, "No embedder configured, skipping vector plan");
                continue;
            }
            if let Some(from) = previous {
                metrics::record_fallback(from.as_str(), plan.strategy.as_str());
            }
            previous = Some(plan.strategy);

            let handle = tracker.start_step(
                label,
                plan.strategy,
                plan.target_collection().map(str::to_string),
            )?;

            let plan = match self.bind_embedding(plan, text).await {
                Ok(plan) => plan,
                Err(e) => {
                    warn!(step = label, error = %e, "Failed to embed text");
                    tracker.complete_step(handle, StepOutcome::failed(e.to_string()))?;
                    continue;
                }
            };

            let result = match self.executor.execute_plan(&plan, None, None).await {
                Ok(result) => result,
                Err(e @ AppError::Configuration { .. }) => {
                    error!(step = label, strategy = %plan.strategy, error = %e, "Backend not configured for plan");
                    tracker.complete_step(handle, StepOutcome::failed(e.to_string()))?;
                    if self.strict_wiring {
                        return Err(e);
                    }
                    continue;
                }
                Err(e) => {
                    warn!(step = label, strategy = %plan.strategy, error = %e, "Plan could not be executed");
                    tracker.complete_step(handle, StepOutcome::failed(e.to_string()))?;
                    continue;
                }
            };
            tracker.complete_step(handle, StepOutcome::from_result(&result))?;

            if label == "generated" && result.failure == Some(FailureKind::Validation) {
                if let Some(message) = &result.error_message {
                    tracker.record_validation_error(message.clone())?;
                }
            }

            if !result.fallback_used {
                info!(
                    step = label,
                    strategy = %plan.strategy,
                    documents = result.doc_count(),
                    ru_cost = result.ru_cost,
                    "Retrieval succeeded"
                );
                documents = result.documents;
                strategy = Some(plan.strategy);
                break;
            }
        }

        if strategy.is_none() {
            warn!("Every strategy failed, returning an empty result");
        }

        tracker.finish()?;
        Ok(RetrievalOutcome {
            documents,
            strategy,
            total_cost: tracker.total_cost(),
            attempts: tracker.steps().len(),
            tracker,
        })
    }

    /// Ask the planner; its failures never fail the retrieval
    async fn generate_plan(
        &self,
        text: &str,
        tracker: &mut ExecutionTracker,
    ) -> Result<Option<QueryPlan>> {
        let Some(planner) = &self.planner else {
            return Ok(None);
        };

        let request = match &self.schema {
            Some(schema) => match schema.context().await {
                Ok(context) => PlanRequest::new(text, &context),
                Err(e) => {
                    warn!(error = %e, "Schema context unavailable, planning without it");
                    PlanRequest::text_only(text)
                }
            },
            None => PlanRequest::text_only(text),
        };

        match planner.plan(&request).await {
            Ok(plan) => {
                tracker.attach_generated_plan(&plan)?;
                if tracker.strategy_mismatch() {
                    info!(generated = %plan.strategy, "Planner and rules disagree on strategy");
                }
                Ok(Some(plan))
            }
            Err(e) if e.is_validation_failure() => {
                warn!(error = %e, "Planner returned an invalid plan");
                tracker.record_validation_error(e.to_string())?;
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "Planner failed, continuing with rule-based plan");
                Ok(None)
            }
        }
    }

    async fn bind_embedding(&self, plan: QueryPlan, text: &str) -> Result<QueryPlan> {
        match &self.embedder {
            Some(embedder) if needs_embedding(&plan) => {
                let vector = embedder.embed(text).await?;
                Ok(plan.with_parameter(EMBEDDING_PARAMETER, json!(vector)))
            }
            _ => Ok(plan),
        }
    }
}

fn needs_embedding(plan: &QueryPlan) -> bool {
    plan.query_text.contains(EMBEDDING_PARAMETER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{DocumentPage, DocumentQuery, DocumentStore};
    use crate::plan::{QueryType, RawQueryPlan};
    use crate::strategy::RuleBasedDetector;
    use crate::tracker::StepStatus;
    use async_trait::async_trait;
    use caig_common::embeddings::HashEmbedder;
    use caig_common::errors::AppError;
    use caig_common::{AppConfig, EntityCatalog, EntityKind};
    use std::sync::Mutex;

    /// Fails for the listed collections, returns one document elsewhere
    #[derive(Default)]
    struct StubDocuments {
        failing: Vec<String>,
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    #[async_trait]
    impl DocumentStore for StubDocuments {
        async fn query(&self, collection: &str, query: &DocumentQuery) -> Result<DocumentPage> {
            let names = query.parameters.iter().map(|p| p.name.clone()).collect();
            self.calls.lock().unwrap().push((collection.to_string(), names));
            if self.failing.iter().any(|c| c == collection) {
                return Err(AppError::Backend {
                    backend: "documents".to_string(),
                    message: "throttled".to_string(),
                });
            }
            Ok(DocumentPage {
                documents: vec![json!({"collection": collection})],
                request_charge: 2.5,
            })
        }
    }

    struct StubPlanner {
        answer: fn() -> Result<QueryPlan>,
    }

    #[async_trait]
    impl QueryPlanner for StubPlanner {
        async fn plan(&self, _request: &PlanRequest) -> Result<QueryPlan> {
            (self.answer)()
        }
    }

    fn catalog() -> CatalogHandle {
        CatalogHandle::new(
            EntityCatalog::builder()
                .insert(EntityKind::GoverningLawState, "Alabama")
                .insert(EntityKind::GoverningLawState, "Delaware")
                .insert(EntityKind::ContractorParty, "Initech")
                .build(),
        )
    }

    fn orchestrator(documents: Arc<StubDocuments>) -> RetrievalOrchestrator {
        let config = AppConfig::default();
        RetrievalOrchestrator::new(
            catalog(),
            Arc::new(RuleBasedDetector::default()),
            QueryOptimizer::from_config(&config),
            QueryExecutor::new(&config).with_document_store(documents),
        )
    }

    fn collections(documents: &StubDocuments) -> Vec<String> {
        documents
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_rule_plan_succeeds_first() {
        let documents = Arc::new(StubDocuments::default());
        let outcome = orchestrator(documents.clone())
            .retrieve("Show all contracts not governed by Alabama")
            .await
            .unwrap();

        assert_eq!(outcome.strategy, Some(Strategy::ContractDirect));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.documents.len(), 1);
        assert_eq!(outcome.total_cost, 2.5);
        assert!(outcome.tracker.is_finished());
        assert_eq!(collections(&documents), vec!["contracts"]);
    }

    #[tokio::test]
    async fn test_falls_back_to_vector_search() {
        let documents = Arc::new(StubDocuments {
            failing: vec!["contracts".to_string()],
            ..StubDocuments::default()
        });
        let outcome = orchestrator(documents.clone())
            .with_embedder(Arc::new(HashEmbedder::new(8)))
            .retrieve("contracts not governed by Alabama")
            .await
            .unwrap();

        assert_eq!(outcome.strategy, Some(Strategy::VectorSearch));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.tracker.steps()[0].status, StepStatus::Failure);
        assert_eq!(outcome.tracker.steps()[1].status, StepStatus::Success);

        let calls = documents.calls.lock().unwrap();
        assert_eq!(calls[1].0, "contract_chunks");
        assert!(calls[1].1.contains(&"@embedding".to_string()));
        assert!(calls[1].1.contains(&"@k".to_string()));
    }

    #[tokio::test]
    async fn test_vector_skipped_without_embedder() {
        let documents = Arc::new(StubDocuments {
            failing: vec!["contracts".to_string()],
            ..StubDocuments::default()
        });
        let outcome = orchestrator(documents.clone())
            .retrieve("contracts not governed by Alabama")
            .await
            .unwrap();

        assert!(!outcome.succeeded());
        assert!(outcome.documents.is_empty());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(collections(&documents), vec!["contracts"]);
    }

    #[tokio::test]
    async fn test_invalid_generated_plan_falls_back_to_rules() {
        let documents = Arc::new(StubDocuments::default());
        let planner = StubPlanner {
            answer: || {
                QueryPlan::try_from(RawQueryPlan {
                    strategy: "ENTITY_FIRST".to_string(),
                    query_type: "SQL".to_string(),
                    query_text: "SELECT * FROM c; DELETE FROM c".to_string(),
                    confidence: 0.9,
                    ..RawQueryPlan::default()
                })
            },
        };

        let outcome = orchestrator(documents.clone())
            .with_planner(Arc::new(planner))
            .retrieve("Show all contracts not governed by Alabama")
            .await
            .unwrap();

        assert_eq!(outcome.strategy, Some(Strategy::ContractDirect));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(collections(&documents), vec!["contracts"]);

        let trace = outcome.tracker.visualize_ascii();
        assert!(trace.contains("[!] Strategy mismatch"));
        assert!(trace.contains("[!] Validation error: Dangerous SQL pattern detected"));
        assert!(trace.contains("SELECT * FROM c; DELETE FROM c"));
    }

    #[tokio::test]
    async fn test_planner_errors_are_skipped() {
        let documents = Arc::new(StubDocuments::default());
        let failing = StubPlanner {
            answer: || {
                Err(AppError::Planner {
                    message: "HTTP 503".to_string(),
                })
            },
        };

        let outcome = orchestrator(documents.clone())
            .with_planner(Arc::new(failing))
            .retrieve("Show contracts governed by Delaware")
            .await
            .unwrap();

        assert_eq!(outcome.strategy, Some(Strategy::EntityFirst));
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.tracker.visualize_ascii().contains("[!]"));
        assert_eq!(collections(&documents), vec!["entities"]);
    }

    #[tokio::test]
    async fn test_graph_plan_without_graph_store_counts_as_failed_attempt() {
        let documents = Arc::new(StubDocuments::default());
        let planner = StubPlanner {
            answer: || {
                Ok(QueryPlan {
                    strategy: Strategy::GraphTraversal,
                    fallback_strategy: None,
                    query_type: QueryType::Sparql,
                    query_text: "PREFIX caig: <http://cosmosdb.com/caig#>\n\
                                 SELECT ?c WHERE { ?c a caig:Contract }"
                        .to_string(),
                    execution_plan: Default::default(),
                    confidence: 0.8,
                    reasoning: "graph".to_string(),
                    raw_response: None,
                })
            },
        };

        let outcome = orchestrator(documents)
            .with_planner(Arc::new(planner))
            .retrieve("Show all contracts not governed by Alabama")
            .await
            .unwrap();

        assert_eq!(outcome.strategy, Some(Strategy::ContractDirect));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.tracker.steps()[0].strategy, Strategy::GraphTraversal);
        assert_eq!(outcome.tracker.steps()[0].status, StepStatus::Failure);
    }

    #[tokio::test]
    async fn test_strict_wiring_surfaces_missing_backend() {
        let documents = Arc::new(StubDocuments::default());
        let planner = StubPlanner {
            answer: || {
                Ok(QueryPlan {
                    strategy: Strategy::GraphTraversal,
                    fallback_strategy: None,
                    query_type: QueryType::Sparql,
                    query_text: "PREFIX caig: <http://cosmosdb.com/caig#>\n\
                                 SELECT ?c WHERE { ?c a caig:Contract }"
                        .to_string(),
                    execution_plan: Default::default(),
                    confidence: 0.8,
                    reasoning: "graph".to_string(),
                    raw_response: None,
                })
            },
        };

        let err = orchestrator(documents.clone())
            .with_planner(Arc::new(planner))
            .with_strict_wiring(true)
            .retrieve("Show all contracts not governed by Alabama")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Configuration { .. }));
        assert!(err.to_string().contains("No graph store configured"));
        assert!(collections(&documents).is_empty());
    }

    #[test]
    fn test_no_signal_and_no_embedder_yields_empty_result() {
        let documents = Arc::new(StubDocuments::default());
        let orchestrator = orchestrator(documents.clone());

        let outcome = tokio_test::block_on(orchestrator.retrieve("what happened last week?")).unwrap();
        assert_eq!(outcome.strategy, None);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.total_cost, 0.0);
        assert!(documents.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rule_plan_dry_run() {
        let plan = orchestrator(Arc::new(StubDocuments::default()))
            .rule_plan("How many contracts are governed by Delaware?");
        assert_eq!(plan.strategy, Strategy::EntityAggregation);
    }
}
