//! CAIG Query Console
//!
//! Plans, executes and traces a single question:
//! - Loads entity catalogs and schema context
//! - Runs the full retrieval when backends are configured
//! - Otherwise prints the rule-based plan (dry run)
//!
//! Usage: `caig-console <question...>`

use anyhow::{bail, Context};
use caig_common::catalog::{CatalogHandle, EntityCatalog, JsonCatalogSource};
use caig_common::embeddings::create_embedder;
use caig_common::metrics::register_metrics;
use caig_common::schema::{FileContextSource, SchemaContextBuilder};
use caig_common::{AppConfig, VERSION};
use caig_query::execution::{HttpDocumentStore, HttpGraphStore};
use caig_query::{
    ExecutionTracker, HttpQueryPlanner, QueryExecutor, QueryOptimizer, RetrievalOrchestrator,
    RuleBasedDetector,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config);
    register_metrics();

    let question = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if question.trim().is_empty() {
        bail!("usage: caig-console <question>");
    }

    info!("Starting CAIG query console v{}", VERSION);

    let catalog_source = JsonCatalogSource::new(&config.catalog.path);
    let catalog = match CatalogHandle::initialize(&catalog_source).await {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!(error = %e, path = %config.catalog.path, "Entity catalog unavailable, detection disabled");
            CatalogHandle::new(EntityCatalog::empty())
        }
    };

    let schema = Arc::new(SchemaContextBuilder::new(Arc::new(FileContextSource::new(
        &config.schema.schema_path,
        &config.schema.ontology_path,
    ))));

    let detector = Arc::new(RuleBasedDetector::from_config(&config.matching)?);
    let optimizer = QueryOptimizer::from_config(&config);

    let mut executor = QueryExecutor::new(&config);
    let timeout = config.execution_timeout();
    if let Some(store) = HttpDocumentStore::from_config(&config.documents, timeout)? {
        executor = executor.with_document_store(Arc::new(store));
    }
    if let Some(store) = HttpGraphStore::from_config(&config.graph, timeout)? {
        executor = executor.with_graph_store(Arc::new(store));
    }
    let has_backend = executor.has_document_store() || executor.has_graph_store();

    let mut orchestrator = RetrievalOrchestrator::new(catalog, detector, optimizer, executor)
        .with_schema(schema);
    if let Some(planner) = HttpQueryPlanner::from_config(&config.planner)? {
        orchestrator = orchestrator.with_planner(Arc::new(planner));
    }
    if let Some(embedder) = create_embedder(&config.embedding)? {
        info!(model = embedder.model_name(), "Vector fallback enabled");
        orchestrator = orchestrator.with_embedder(embedder);
    }

    if !has_backend {
        warn!("No backend configured, printing the rule-based plan only");
        let plan = orchestrator.rule_plan(&question);
        println!("{}", serde_json::to_string_pretty(&plan)?);

        let mut tracker = ExecutionTracker::new(&question, &plan);
        tracker.finish()?;
        println!("{}", tracker.visualize_ascii());
        return Ok(());
    }

    let outcome = orchestrator.retrieve(&question).await?;
    println!("{}", outcome.tracker.visualize_ascii());
    match outcome.strategy {
        Some(strategy) => println!(
            "{} documents via {} (cost {:.2}, {} attempts)",
            outcome.documents.len(),
            strategy,
            outcome.total_cost,
            outcome.attempts
        ),
        None => println!("No results ({} attempts)", outcome.attempts),
    }
    for document in &outcome.documents {
        println!("{}", serde_json::to_string(document)?);
    }

    Ok(())
}

/// Logs go to stderr; stdout carries the trace
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}
