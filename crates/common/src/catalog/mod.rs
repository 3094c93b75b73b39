//! Entity catalogs
//!
//! Provides:
//! - Immutable catalog snapshots keyed by normalized entity name
//! - A shared handle that swaps snapshots on refresh
//! - Catalog sources (JSON file)
//! - Name normalization and fuzzy scoring

mod fuzzy;
mod normalize;
mod source;

pub use fuzzy::{
    fuzzy_score, levenshtein, soundex, token_set_overlap, MatchTier, ACCEPT_THRESHOLD,
    REVIEW_THRESHOLD, VERY_HIGH_THRESHOLD,
};
pub use normalize::{name_tokens, normalize_name, COMPANY_SUFFIXES};
pub use source::{CatalogSource, JsonCatalogSource};

use crate::errors::Result;
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Kinds of entities the contract corpus is indexed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Party performing the contract
    ContractorParty,
    /// Party commissioning the contract
    ContractingParty,
    /// State whose law governs the contract
    GoverningLawState,
    /// Kind of agreement (MSA, NDA, ...)
    ContractType,
    /// Clause category
    ClauseType,
}

impl EntityKind {
    /// All kinds, in resolution order
    pub const ALL: [EntityKind; 5] = [
        EntityKind::ContractorParty,
        EntityKind::ContractingParty,
        EntityKind::GoverningLawState,
        EntityKind::ContractType,
        EntityKind::ClauseType,
    ];

    /// Document field the kind filters on
    pub fn field_name(&self) -> &'static str {
        match self {
            EntityKind::ContractorParty => "contractor_party",
            EntityKind::ContractingParty => "contracting_party",
            EntityKind::GoverningLawState => "governing_law_state",
            EntityKind::ContractType => "contract_type",
            EntityKind::ClauseType => "clause_type",
        }
    }

    /// Parse a field name back into a kind
    pub fn from_field(field: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.field_name() == field)
    }

    /// Party catalogs get fuzzy matching
    pub fn is_party(&self) -> bool {
        matches!(self, EntityKind::ContractorParty | EntityKind::ContractingParty)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Lookup key
    pub normalized_name: String,

    /// Name as it appears in the source data
    pub display_name: String,

    /// Pre-aggregated number of contracts, when known
    pub contract_count: Option<u64>,
}

/// Immutable snapshot of every entity catalog
#[derive(Debug, Clone)]
pub struct EntityCatalog {
    entries: BTreeMap<EntityKind, BTreeMap<String, CatalogEntry>>,
    index: HashMap<String, Vec<EntityKind>>,
    max_tokens: usize,
    loaded_at: DateTime<Utc>,
}

impl EntityCatalog {
    /// A catalog with no entries
    pub fn empty() -> Self {
        CatalogBuilder::new().build()
    }

    /// Start building a catalog
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    /// Whether any catalog knows this name
    pub fn is_known(&self, name: &str) -> bool {
        self.index.contains_key(&normalize_name(name))
    }

    /// First kind (in [`EntityKind::ALL`] order) that knows this name
    pub fn resolve(&self, name: &str) -> Option<EntityKind> {
        self.resolve_all(name).first().copied()
    }

    /// Every kind that knows this name
    pub fn resolve_all(&self, name: &str) -> &[EntityKind] {
        self.index
            .get(&normalize_name(name))
            .map(|kinds| kinds.as_slice())
            .unwrap_or(&[])
    }

    /// Entry for a name in one catalog
    pub fn get(&self, kind: EntityKind, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(&kind)?.get(&normalize_name(name))
    }

    /// Entries of one catalog, ordered by normalized name
    pub fn list(&self, kind: EntityKind) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.get(&kind).into_iter().flat_map(|entries| entries.values())
    }

    /// Best fuzzy match for `name` in one catalog, if any scores above zero
    pub fn best_fuzzy_match(&self, kind: EntityKind, name: &str) -> Option<(&CatalogEntry, f64)> {
        self.list(kind)
            .map(|entry| (entry, fuzzy_score(name, &entry.normalized_name)))
            .filter(|(_, score)| *score > 0.0)
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Total number of entries across catalogs
    pub fn len(&self) -> usize {
        self.entries.values().map(|entries| entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Longest entry, in tokens
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Collects entries and produces an [`EntityCatalog`]
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    entries: BTreeMap<EntityKind, BTreeMap<String, CatalogEntry>>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a name; blank names are ignored, duplicates keep the first display name
    pub fn insert(self, kind: EntityKind, display_name: &str) -> Self {
        self.insert_with_count(kind, display_name, None)
    }

    /// Add a name with its pre-aggregated contract count
    pub fn insert_with_count(
        mut self,
        kind: EntityKind,
        display_name: &str,
        contract_count: Option<u64>,
    ) -> Self {
        let normalized_name = normalize_name(display_name);
        if normalized_name.is_empty() {
            return self;
        }

        self.entries
            .entry(kind)
            .or_default()
            .entry(normalized_name.clone())
            .or_insert_with(|| CatalogEntry {
                normalized_name,
                display_name: display_name.trim().to_string(),
                contract_count,
            });
        self
    }

    pub fn build(self) -> EntityCatalog {
        let mut index: HashMap<String, Vec<EntityKind>> = HashMap::new();
        let mut max_tokens = 0;

        for (kind, entries) in &self.entries {
            for name in entries.keys() {
                index.entry(name.clone()).or_default().push(*kind);
                max_tokens = max_tokens.max(name_tokens(name).count());
            }
        }

        // BTreeMap iteration already follows EntityKind order
        EntityCatalog {
            entries: self.entries,
            index,
            max_tokens,
            loaded_at: Utc::now(),
        }
    }
}

/// Shared reference to the current catalog snapshot.
///
/// Readers take an `Arc` to a complete snapshot; refresh builds a new
/// snapshot first and only then swaps the reference.
#[derive(Debug, Clone)]
pub struct CatalogHandle {
    current: Arc<RwLock<Arc<EntityCatalog>>>,
}

impl CatalogHandle {
    pub fn new(catalog: EntityCatalog) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    /// Load the first snapshot from a source
    pub async fn initialize(source: &dyn CatalogSource) -> Result<Self> {
        let catalog = source.load().await?;
        info!(
            source = %source.describe(),
            entries = catalog.len(),
            "Entity catalog initialized"
        );
        Ok(Self::new(catalog))
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<EntityCatalog> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the snapshot
    pub fn replace(&self, catalog: EntityCatalog) {
        let next = Arc::new(catalog);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Rebuild from a source and swap the new snapshot in.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn refresh(&self, source: &dyn CatalogSource) -> Result<Arc<EntityCatalog>> {
        let catalog = Arc::new(source.load().await?);
        let previous_len = self.snapshot().len();

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = catalog.clone();

        metrics::record_refresh("catalog", previous_len != catalog.len());
        info!(
            source = %source.describe(),
            previous_entries = previous_len,
            entries = catalog.len(),
            "Entity catalog refreshed"
        );
        Ok(catalog)
    }
}
