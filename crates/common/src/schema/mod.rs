//! Schema and ontology context
//!
//! Provides:
//! - Loading of the document schema descriptor and the ontology descriptor
//! - One combined, immutable context snapshot handed to the query planner
//! - Cached access with atomic refresh

mod source;

pub use source::{ContextSource, Descriptors, FileContextSource};

use crate::errors::{AppError, Result};
use crate::metrics;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

static PREFIX_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)@?prefix\s+caig:\s*<([^>]*)>").expect("valid prefix regex")
});

static TERM_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^\s*caig:([A-Za-z_][A-Za-z0-9_-]*)\s+(?:a|rdf:type)\s+owl:(Class|ObjectProperty|DatatypeProperty)\b",
    )
    .expect("valid term regex")
});

/// One collection from the schema descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSchema {
    pub name: String,
    pub description: Option<String>,
    /// (field, type) pairs, sorted by field name
    pub fields: Vec<(String, String)>,
}

/// `caig:` terms declared by the ontology
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OntologyTerms {
    pub namespace: Option<String>,
    pub classes: Vec<String>,
    pub object_properties: Vec<String>,
    pub datatype_properties: Vec<String>,
}

impl OntologyTerms {
    /// Whether `name` is a declared property
    pub fn has_property(&self, name: &str) -> bool {
        self.object_properties.iter().any(|p| p == name)
            || self.datatype_properties.iter().any(|p| p == name)
    }
}

/// Combined schema + ontology snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SchemaContext {
    /// Parsed schema descriptor
    pub schema: serde_json::Value,

    /// Collections summarized from the descriptor
    pub collections: Vec<CollectionSchema>,

    /// Raw ontology text
    pub ontology: String,

    /// Terms extracted from the ontology
    pub ontology_terms: OntologyTerms,

    /// Schema part of the planner context
    pub schema_summary: String,

    /// Full text context (schema summary followed by ontology summary)
    pub combined: String,

    /// SHA-256 of both descriptors
    pub fingerprint: String,

    pub loaded_at: DateTime<Utc>,
}

impl SchemaContext {
    /// Build a snapshot from raw descriptors
    pub fn from_descriptors(descriptors: &Descriptors) -> Result<Self> {
        let schema: serde_json::Value =
            serde_json::from_str(&descriptors.schema).map_err(|e| AppError::Schema {
                message: format!("Schema descriptor is not valid JSON: {}", e),
            })?;

        let collections = parse_collections(&schema)?;

        if descriptors.ontology.trim().is_empty() {
            return Err(AppError::Schema {
                message: "Ontology descriptor is empty".to_string(),
            });
        }
        let ontology_terms = parse_ontology_terms(&descriptors.ontology);

        let schema_summary = render_schema(&collections);
        let combined = format!("{}\n{}", schema_summary, render_ontology(&ontology_terms));

        Ok(Self {
            schema,
            collections,
            ontology: descriptors.ontology.clone(),
            ontology_terms,
            schema_summary,
            combined,
            fingerprint: fingerprint(descriptors),
            loaded_at: Utc::now(),
        })
    }

    /// Look up a collection by name
    pub fn collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.iter().find(|c| c.name == name)
    }
}

fn parse_collections(schema: &serde_json::Value) -> Result<Vec<CollectionSchema>> {
    let collections = schema
        .get("collections")
        .and_then(|c| c.as_object())
        .ok_or_else(|| AppError::Schema {
            message: "Schema descriptor must contain a 'collections' object".to_string(),
        })?;

    let mut parsed = Vec::with_capacity(collections.len());
    for (name, body) in collections {
        let fields = body
            .get("fields")
            .and_then(|f| f.as_object())
            .map(|fields| {
                fields
                    .iter()
                    .map(|(field, ty)| {
                        let ty = ty.as_str().unwrap_or("any").to_string();
                        (field.clone(), ty)
                    })
                    .collect()
            })
            .unwrap_or_default();

        parsed.push(CollectionSchema {
            name: name.clone(),
            description: body
                .get("description")
                .and_then(|d| d.as_str())
                .map(str::to_string),
            fields,
        });
    }
    Ok(parsed)
}

fn parse_ontology_terms(ontology: &str) -> OntologyTerms {
    let mut terms = OntologyTerms {
        namespace: PREFIX_DECL
            .captures(ontology)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string()),
        ..OntologyTerms::default()
    };

    for caps in TERM_DECL.captures_iter(ontology) {
        let name = caps[1].to_string();
        let bucket = match &caps[2] {
            "Class" => &mut terms.classes,
            "ObjectProperty" => &mut terms.object_properties,
            _ => &mut terms.datatype_properties,
        };
        if !bucket.contains(&name) {
            bucket.push(name);
        }
    }
    terms
}

fn render_schema(collections: &[CollectionSchema]) -> String {
    let mut out = String::from("## Document schema\n");
    for collection in collections {
        let _ = write!(out, "- {}", collection.name);
        if let Some(description) = &collection.description {
            let _ = write!(out, " ({})", description);
        }
        let fields: Vec<String> = collection
            .fields
            .iter()
            .map(|(field, ty)| format!("{}: {}", field, ty))
            .collect();
        let _ = writeln!(out, ": {}", fields.join(", "));
    }
    out
}

fn render_ontology(terms: &OntologyTerms) -> String {
    let prefixed = |names: &[String]| {
        names
            .iter()
            .map(|n| format!("caig:{}", n))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut out = String::from("## Ontology\n");
    if let Some(ns) = &terms.namespace {
        let _ = writeln!(out, "Namespace: caig: <{}>", ns);
    }
    let _ = writeln!(out, "Classes: {}", prefixed(&terms.classes));
    let _ = writeln!(out, "Object properties: {}", prefixed(&terms.object_properties));
    let _ = writeln!(out, "Datatype properties: {}", prefixed(&terms.datatype_properties));
    out
}

fn fingerprint(descriptors: &Descriptors) -> String {
    let mut hasher = Sha256::new();
    hasher.update(descriptors.schema.as_bytes());
    hasher.update([0u8]);
    hasher.update(descriptors.ontology.as_bytes());
    hex::encode(hasher.finalize())
}

/// Result of a refresh
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub context: Arc<SchemaContext>,
    /// Whether the descriptors differ from the previous snapshot
    pub changed: bool,
}

/// Loads and caches the combined schema context
pub struct SchemaContextBuilder {
    source: Arc<dyn ContextSource>,
    current: RwLock<Option<Arc<SchemaContext>>>,
}

impl SchemaContextBuilder {
    pub fn new(source: Arc<dyn ContextSource>) -> Self {
        Self {
            source,
            current: RwLock::new(None),
        }
    }

    /// Cached snapshot, if one has been loaded
    pub fn cached(&self) -> Option<Arc<SchemaContext>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cached snapshot, loading it on first use
    pub async fn context(&self) -> Result<Arc<SchemaContext>> {
        if let Some(context) = self.cached() {
            return Ok(context);
        }
        Ok(self.refresh().await?.context)
    }

    /// Rebuild the snapshot from the source and swap it in
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let descriptors = self.source.load().await?;
        let context = Arc::new(SchemaContext::from_descriptors(&descriptors)?);

        let previous = {
            let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
            guard.replace(context.clone())
        };

        let changed = previous.map_or(true, |p| p.fingerprint != context.fingerprint);
        metrics::record_refresh("schema_context", changed);

        if changed {
            info!(
                source = %self.source.describe(),
                collections = context.collections.len(),
                classes = context.ontology_terms.classes.len(),
                fingerprint = %&context.fingerprint[..12],
                "Schema context loaded"
            );
        } else {
            debug!(source = %self.source.describe(), "Schema context unchanged");
        }

        Ok(RefreshOutcome { context, changed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const SCHEMA: &str = r#"{
        "collections": {
            "contracts": {
                "description": "one document per contract",
                "fields": {"governing_law_state": "string", "contractor_party": "string"}
            },
            "entities": {"fields": {"entity_type": "string", "contract_count": "number"}}
        }
    }"#;

    const ONTOLOGY: &str = "@prefix caig: <http://cosmosdb.com/caig#> .\n\
        @prefix owl: <http://www.w3.org/2002/07/owl#> .\n\
        caig:Contract a owl:Class .\n\
        caig:ContractorParty a owl:Class .\n\
        caig:contractor_party a owl:ObjectProperty .\n\
        caig:governing_law_state rdf:type owl:DatatypeProperty .\n";

    struct SwappableSource(Mutex<Descriptors>);

    #[async_trait]
    impl ContextSource for SwappableSource {
        async fn load(&self) -> Result<Descriptors> {
            Ok(self.0.lock().unwrap().clone())
        }

        fn describe(&self) -> String {
            "memory".to_string()
        }
    }

    fn descriptors() -> Descriptors {
        Descriptors {
            schema: SCHEMA.to_string(),
            ontology: ONTOLOGY.to_string(),
        }
    }

    #[test]
    fn test_context_from_descriptors() {
        let context = SchemaContext::from_descriptors(&descriptors()).unwrap();

        assert_eq!(context.collections.len(), 2);
        let contracts = context.collection("contracts").unwrap();
        assert!(contracts
            .fields
            .contains(&("governing_law_state".to_string(), "string".to_string())));

        let terms = &context.ontology_terms;
        assert_eq!(terms.namespace.as_deref(), Some("http://cosmosdb.com/caig#"));
        assert_eq!(terms.classes, vec!["Contract", "ContractorParty"]);
        assert!(terms.has_property("contractor_party"));
        assert!(terms.has_property("governing_law_state"));

        assert!(context.combined.contains("## Document schema"));
        assert!(context.combined.contains("Classes: caig:Contract, caig:ContractorParty"));
        assert_eq!(context.fingerprint.len(), 64);
    }

    #[test]
    fn test_invalid_descriptors() {
        let bad_schema = Descriptors {
            schema: "{\"tables\": {}}".to_string(),
            ontology: ONTOLOGY.to_string(),
        };
        assert!(matches!(
            SchemaContext::from_descriptors(&bad_schema),
            Err(AppError::Schema { .. })
        ));

        let empty_ontology = Descriptors {
            schema: SCHEMA.to_string(),
            ontology: "  ".to_string(),
        };
        assert!(SchemaContext::from_descriptors(&empty_ontology).is_err());
    }

    #[tokio::test]
    async fn test_builder_caches_and_refreshes() {
        let source = Arc::new(SwappableSource(Mutex::new(descriptors())));
        let builder = SchemaContextBuilder::new(source.clone());

        assert!(builder.cached().is_none());
        let first = builder.context().await.unwrap();
        let again = builder.context().await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let unchanged = builder.refresh().await.unwrap();
        assert!(!unchanged.changed);

        source.0.lock().unwrap().ontology.push_str("caig:Clause a owl:Class .\n");
        let changed = builder.refresh().await.unwrap();
        assert!(changed.changed);
        assert!(changed.context.ontology_terms.classes.contains(&"Clause".to_string()));

        // Readers holding the old snapshot still see it
        assert!(!first.ontology_terms.classes.contains(&"Clause".to_string()));
    }
}
