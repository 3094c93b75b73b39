//! Strategy selection and baseline plan compilation

use super::detector::{Detection, EntityMatch};
use crate::plan::{QueryParameter, QueryPlan, QueryType, Strategy};
use crate::validation::sanitize_literal;
use caig_common::catalog::{EntityCatalog, EntityKind};
use caig_common::config::{AppConfig, CollectionsConfig};
use caig_common::metrics;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::debug;

static AGGREGATION_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:how\s+many|count|number\s+of|total|sum\s+of|average)\b")
        .expect("valid aggregation cue")
});

static RELATIONSHIP_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:between|depends?\s+on|connected|related\s+to)\b")
        .expect("valid relationship cue")
});

static OR_LIST_CUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:or|either)\b").expect("valid or-list cue"));

/// Constraint on one document field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldConstraint {
    Equals(String),
    NotEquals(String),
    In(Vec<String>),
    NotIn(Vec<String>),
}

impl FieldConstraint {
    pub fn is_negative(&self) -> bool {
        matches!(self, FieldConstraint::NotEquals(_) | FieldConstraint::NotIn(_))
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldConstraint::Equals(value) => json!(value),
            FieldConstraint::NotEquals(value) => json!({ "not-equals": value }),
            FieldConstraint::In(values) => json!({ "in": values }),
            FieldConstraint::NotIn(values) => json!({ "not-in": values }),
        }
    }

    fn parameter_value(&self) -> Value {
        match self {
            FieldConstraint::Equals(value) | FieldConstraint::NotEquals(value) => json!(value),
            FieldConstraint::In(values) | FieldConstraint::NotIn(values) => json!(values),
        }
    }
}

/// Field → constraint map built from one detection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositeFilter {
    fields: BTreeMap<String, FieldConstraint>,
}

impl CompositeFilter {
    /// Positive constraints take precedence over negations on the same field
    pub fn from_detection(detection: &Detection) -> Self {
        let mut fields = BTreeMap::new();

        for (kind, matches) in &detection.positives {
            if let Some(constraint) = collapse(matches, FieldConstraint::Equals, FieldConstraint::In) {
                fields.insert(kind.field_name().to_string(), constraint);
            }
        }

        for (kind, matches) in &detection.negations {
            let field = kind.field_name();
            if fields.contains_key(field) {
                debug!(field = %field, "Dropping negation on a field with a positive constraint");
                continue;
            }
            if let Some(constraint) =
                collapse(matches, FieldConstraint::NotEquals, FieldConstraint::NotIn)
            {
                fields.insert(field.to_string(), constraint);
            }
        }

        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&FieldConstraint> {
        self.fields.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldConstraint)> {
        self.fields.iter().map(|(field, c)| (field.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn has_negation(&self) -> bool {
        self.fields.values().any(FieldConstraint::is_negative)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(field, c)| (field.clone(), c.to_json()))
                .collect(),
        )
    }
}

impl Serialize for CompositeFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn collapse(
    matches: &[EntityMatch],
    single: fn(String) -> FieldConstraint,
    many: fn(Vec<String>) -> FieldConstraint,
) -> Option<FieldConstraint> {
    let mut values: Vec<String> = Vec::new();
    for m in matches {
        if !values.contains(&m.normalized_name) {
            values.push(m.normalized_name.clone());
        }
    }
    match values.len() {
        0 => None,
        1 => values.pop().map(single),
        _ => Some(many(values)),
    }
}

/// Linguistic cues found in the text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Cues {
    pub aggregation: bool,
    pub relationship: bool,
    pub or_list: bool,
}

impl Cues {
    pub fn scan(text: &str) -> Self {
        Self {
            aggregation: AGGREGATION_CUE.is_match(text),
            relationship: RELATIONSHIP_CUE.is_match(text),
            or_list: OR_LIST_CUE.is_match(text),
        }
    }
}

/// Strategy decision for one text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Optimization {
    pub strategy: Strategy,
    pub filter: CompositeFilter,
    pub cues: Cues,
    pub reasoning: String,
}

/// Picks a strategy by strict priority and compiles baseline plans
#[derive(Debug, Clone)]
pub struct QueryOptimizer {
    collections: CollectionsConfig,
    namespace: String,
    result_limit: usize,
}

impl QueryOptimizer {
    pub fn new(collections: CollectionsConfig, namespace: impl Into<String>, result_limit: usize) -> Self {
        Self {
            collections,
            namespace: namespace.into(),
            result_limit: result_limit.max(1),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.collections.clone(),
            config.execution.caig_namespace.clone(),
            config.execution.result_limit,
        )
    }

    /// Select a strategy.
    ///
    /// 1. aggregation cue + one positive entity → ENTITY_AGGREGATION
    /// 2. one positive entity → ENTITY_FIRST
    /// 3. relationship cue → GRAPH_TRAVERSAL
    /// 4. negation, several entities or an OR-list → CONTRACT_DIRECT
    /// 5. otherwise → VECTOR_SEARCH
    ///
    /// Rules 1 and 2 require no negation and no OR-list.
    pub fn optimize(&self, text: &str, detection: &Detection) -> Optimization {
        let cues = Cues::scan(text);
        let filter = CompositeFilter::from_detection(detection);
        let positives = detection.positive_count();
        let single = positives == 1 && !detection.has_negation() && !cues.or_list;

        let (strategy, reasoning) = if single && cues.aggregation {
            (Strategy::EntityAggregation, "Aggregation cue with a single entity".to_string())
        } else if single {
            (Strategy::EntityFirst, "Single entity without negation".to_string())
        } else if cues.relationship {
            (Strategy::GraphTraversal, "Relationship cue".to_string())
        } else if !filter.is_empty() && (detection.has_negation() || positives > 1 || cues.or_list) {
            (
                Strategy::ContractDirect,
                format!(
                    "{} positive and {} negated entities{}",
                    positives,
                    detection.negation_count(),
                    if cues.or_list { " in an OR-list" } else { "" }
                ),
            )
        } else {
            (Strategy::VectorSearch, "No structured signal".to_string())
        };

        metrics::record_strategy(strategy.as_str());
        debug!(strategy = %strategy, filter = %filter.to_json(), "Strategy selected");

        Optimization {
            strategy,
            filter,
            cues,
            reasoning,
        }
    }

    /// Optimize and compile in one step
    pub fn plan(&self, text: &str, detection: &Detection, catalog: &EntityCatalog) -> QueryPlan {
        let optimization = self.optimize(text, detection);
        self.build_plan(&optimization, detection, catalog)
    }

    /// Compile the baseline plan for a decision
    pub fn build_plan(
        &self,
        optimization: &Optimization,
        detection: &Detection,
        catalog: &EntityCatalog,
    ) -> QueryPlan {
        let filter = &optimization.filter;

        let (strategy, query_text, mut execution_plan, confidence) =
            match (optimization.strategy, detection.first_positive()) {
                (Strategy::EntityFirst, Some((kind, entity))) => {
                    let query = "SELECT * FROM c WHERE c.entity_type = @entity_type \
                                 AND c.normalized_name = @normalized_name";
                    (Strategy::EntityFirst, query.to_string(), self.entity_plan(kind, entity), 0.9)
                }
                (Strategy::EntityAggregation, Some((kind, entity))) => {
                    let query = "SELECT c.normalized_name, c.display_name, c.contract_count FROM c \
                                 WHERE c.entity_type = @entity_type AND c.normalized_name = @normalized_name";
                    let mut plan = self.entity_plan(kind, entity);
                    if let Some(count) = catalog
                        .get(kind, &entity.normalized_name)
                        .and_then(|e| e.contract_count)
                    {
                        plan.insert("catalog_contract_count".to_string(), json!(count));
                    }
                    (Strategy::EntityAggregation, query.to_string(), plan, 0.9)
                }
                (Strategy::ContractDirect, _) => {
                    let (query, plan) = self.contract_plan(filter);
                    (Strategy::ContractDirect, query, plan, 0.85)
                }
                (Strategy::GraphTraversal, _) => {
                    let (query, plan) = self.graph_plan(filter);
                    (Strategy::GraphTraversal, query, plan, 0.7)
                }
                // Entity strategies without a positive match end up here too
                _ => {
                    let (query, plan) = self.vector_parts();
                    (Strategy::VectorSearch, query, plan, 0.5)
                }
            };
        execution_plan.insert("filter".to_string(), filter.to_json());

        QueryPlan {
            strategy,
            fallback_strategy: fallback_for(strategy, filter),
            query_type: strategy.query_type(),
            query_text,
            execution_plan,
            confidence,
            reasoning: optimization.reasoning.clone(),
            raw_response: None,
        }
    }

    /// Semantic fallback plan; `@embedding` is bound at execution time
    pub fn vector_plan(&self, reasoning: impl Into<String>) -> QueryPlan {
        let (query_text, execution_plan) = self.vector_parts();

        QueryPlan {
            strategy: Strategy::VectorSearch,
            fallback_strategy: None,
            query_type: QueryType::Sql,
            query_text,
            execution_plan,
            confidence: 0.5,
            reasoning: reasoning.into(),
            raw_response: None,
        }
    }

    fn entity_plan(&self, kind: EntityKind, entity: &EntityMatch) -> Map<String, Value> {
        execution_plan(
            &self.collections.entities,
            vec![
                QueryParameter::new("@entity_type", kind.field_name()),
                QueryParameter::new("@normalized_name", entity.normalized_name.clone()),
            ],
        )
    }

    fn contract_plan(&self, filter: &CompositeFilter) -> (String, Map<String, Value>) {
        let mut conditions = Vec::with_capacity(filter.len());
        let mut parameters = Vec::with_capacity(filter.len());

        for (field, constraint) in filter.iter() {
            let param = format!("@{}", field);
            conditions.push(match constraint {
                FieldConstraint::Equals(_) => format!("c.{} = {}", field, param),
                FieldConstraint::NotEquals(_) => format!("c.{} != {}", field, param),
                FieldConstraint::In(_) => format!("ARRAY_CONTAINS({}, c.{})", param, field),
                FieldConstraint::NotIn(_) => format!("NOT ARRAY_CONTAINS({}, c.{})", param, field),
            });
            parameters.push(QueryParameter::new(param, constraint.parameter_value()));
        }

        let mut query = String::from("SELECT * FROM c");
        if !conditions.is_empty() {
            let _ = write!(query, " WHERE {}", conditions.join(" AND "));
        }
        (query, execution_plan(&self.collections.contracts, parameters))
    }

    fn graph_plan(&self, filter: &CompositeFilter) -> (String, Map<String, Value>) {
        let literal = |value: &str| format!("\"{}\"", sanitize_literal(value));
        let list = |values: &[String]| {
            values
                .iter()
                .map(|v| literal(v.as_str()))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut patterns = vec!["?contract a caig:Contract .".to_string()];
        for (i, (field, constraint)) in filter.iter().enumerate() {
            let pattern = match constraint {
                FieldConstraint::Equals(value) => format!(
                    "?contract caig:{f} ?e{i} .\n  ?e{i} caig:normalized_name {v} .",
                    f = field,
                    i = i,
                    v = literal(value)
                ),
                FieldConstraint::In(values) => format!(
                    "?contract caig:{f} ?e{i} .\n  ?e{i} caig:normalized_name ?n{i} .\n  FILTER(?n{i} IN ({v}))",
                    f = field,
                    i = i,
                    v = list(values)
                ),
                FieldConstraint::NotEquals(value) => format!(
                    "FILTER NOT EXISTS {{ ?contract caig:{f} ?x{i} . ?x{i} caig:normalized_name {v} }}",
                    f = field,
                    i = i,
                    v = literal(value)
                ),
                FieldConstraint::NotIn(values) => format!(
                    "FILTER NOT EXISTS {{ ?contract caig:{f} ?x{i} . ?x{i} caig:normalized_name ?m{i} . FILTER(?m{i} IN ({v})) }}",
                    f = field,
                    i = i,
                    v = list(values)
                ),
            };
            patterns.push(pattern);
        }
        if filter.is_empty() {
            patterns.push("?contract ?relation ?related .".to_string());
        }

        let select = if filter.is_empty() {
            "SELECT DISTINCT ?contract ?relation ?related"
        } else {
            "SELECT DISTINCT ?contract"
        };
        let query = format!(
            "PREFIX caig: <{ns}>\n{select} WHERE {{\n  {body}\n}}\nLIMIT {limit}",
            ns = self.namespace,
            select = select,
            body = patterns.join("\n  "),
            limit = self.result_limit
        );

        let mut plan = execution_plan(&self.collections.contracts, Vec::new());
        plan.insert(
            "estimated_cost".to_string(),
            json!(5.0 + 2.5 * filter.len() as f64),
        );
        (query, plan)
    }

    fn vector_parts(&self) -> (String, Map<String, Value>) {
        let query = "SELECT TOP @k c.id, c.contract_id, c.text, \
                     VectorDistance(c.embedding, @embedding) AS score FROM c \
                     ORDER BY VectorDistance(c.embedding, @embedding)";
        let plan = execution_plan(
            &self.collections.chunks,
            vec![QueryParameter::new("@k", self.result_limit)],
        );
        (query.to_string(), plan)
    }
}

fn execution_plan(collection: &str, parameters: Vec<QueryParameter>) -> Map<String, Value> {
    let mut plan = Map::new();
    plan.insert("collections".to_string(), json!([collection]));
    plan.insert(
        "parameters".to_string(),
        Value::Array(
            parameters
                .into_iter()
                .filter_map(|p| serde_json::to_value(p).ok())
                .collect(),
        ),
    );
    plan
}

fn fallback_for(strategy: Strategy, filter: &CompositeFilter) -> Option<Strategy> {
    match strategy {
        Strategy::EntityFirst | Strategy::EntityAggregation => Some(Strategy::ContractDirect),
        Strategy::GraphTraversal if !filter.is_empty() => Some(Strategy::ContractDirect),
        Strategy::GraphTraversal | Strategy::ContractDirect => Some(Strategy::VectorSearch),
        Strategy::VectorSearch => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::detector::{EntityDetector, RuleBasedDetector};
    use crate::validation::{SparqlValidator, SqlValidator};

    fn catalog() -> EntityCatalog {
        EntityCatalog::builder()
            .insert(EntityKind::GoverningLawState, "Alabama")
            .insert_with_count(EntityKind::GoverningLawState, "Delaware", Some(31))
            .insert(EntityKind::ContractorParty, "Acme Corp")
            .insert(EntityKind::ContractorParty, "Initech")
            .insert(EntityKind::ContractType, "NDA")
            .build()
    }

    fn optimizer() -> QueryOptimizer {
        QueryOptimizer::from_config(&AppConfig::default())
    }

    fn run(text: &str) -> (Optimization, QueryPlan) {
        let catalog = catalog();
        let detection = RuleBasedDetector::default().detect(text, &catalog);
        let optimization = optimizer().optimize(text, &detection);
        let plan = optimizer().build_plan(&optimization, &detection, &catalog);
        (optimization, plan)
    }

    fn assert_plan_validates(plan: &QueryPlan) {
        let outcome = match plan.query_type {
            QueryType::Sql => SqlValidator::default().validate(&plan.query_text),
            QueryType::Sparql => SparqlValidator::default().validate(&plan.query_text),
        };
        assert!(outcome.is_valid, "{}: {}", outcome.message, plan.query_text);
    }

    #[test]
    fn test_negation_filter_shape() {
        let (optimization, plan) = run("Show all contracts not governed by Alabama");

        assert_eq!(
            optimization.filter.to_json(),
            json!({"governing_law_state": {"not-equals": "alabama"}})
        );
        assert_eq!(optimization.strategy, Strategy::ContractDirect);
        assert_eq!(
            plan.query_text,
            "SELECT * FROM c WHERE c.governing_law_state != @governing_law_state"
        );
        assert_eq!(plan.target_collection(), Some("contracts"));
        assert_eq!(
            plan.parameters(),
            vec![QueryParameter::new("@governing_law_state", "alabama")]
        );
        assert_plan_validates(&plan);
    }

    #[test]
    fn test_aggregation_priority() {
        let (optimization, plan) = run("How many contracts are governed by Delaware?");
        assert_eq!(optimization.strategy, Strategy::EntityAggregation);
        assert_eq!(plan.target_collection(), Some("entities"));
        assert_eq!(plan.execution_plan["catalog_contract_count"], json!(31));
        assert_eq!(plan.fallback_strategy, Some(Strategy::ContractDirect));
        assert_plan_validates(&plan);

        let (optimization, _) = run("Show contracts governed by Delaware");
        assert_eq!(optimization.strategy, Strategy::EntityFirst);

        let (optimization, _) = run("How many contracts are governed by Delaware with Initech?");
        assert_eq!(optimization.strategy, Strategy::ContractDirect);

        let (optimization, _) = run("How many Delaware contracts excluding Initech?");
        assert_eq!(optimization.strategy, Strategy::ContractDirect);
    }

    #[test]
    fn test_or_list_disables_entity_first() {
        let (optimization, plan) = run("contracts governed by Delaware or Alabama");
        assert_eq!(optimization.strategy, Strategy::ContractDirect);
        assert_eq!(
            optimization.filter.to_json(),
            json!({"governing_law_state": {"in": ["delaware", "alabama"]}})
        );
        assert_eq!(
            plan.query_text,
            "SELECT * FROM c WHERE ARRAY_CONTAINS(@governing_law_state, c.governing_law_state)"
        );
        assert_plan_validates(&plan);
    }

    #[test]
    fn test_relationship_cue() {
        let (optimization, plan) = run("Which contracts are related to Initech and Acme?");
        assert_eq!(optimization.strategy, Strategy::GraphTraversal);
        assert_eq!(plan.query_type, QueryType::Sparql);
        assert!(plan.query_text.starts_with("PREFIX caig: <http://cosmosdb.com/caig#>"));
        assert!(plan.query_text.contains("?contract caig:contractor_party ?e0 ."));
        assert!(plan.query_text.ends_with("LIMIT 50"));
        assert_eq!(plan.estimated_cost(), Some(7.5));
        assert_plan_validates(&plan);

        let (_, bare) = run("What is connected to what?");
        assert_eq!(bare.strategy, Strategy::GraphTraversal);
        assert_eq!(bare.fallback_strategy, Some(Strategy::VectorSearch));
        assert_plan_validates(&bare);
    }

    #[test]
    fn test_negated_graph_pattern_validates() {
        let catalog = catalog();
        let detection = RuleBasedDetector::default()
            .detect("contracts between Acme and anyone excluding NDA", &catalog);
        let plan = optimizer().plan("contracts between Acme and anyone excluding NDA", &detection, &catalog);
        assert_eq!(plan.strategy, Strategy::GraphTraversal);
        assert!(plan.query_text.contains("FILTER NOT EXISTS"));
        assert_plan_validates(&plan);
    }

    #[test]
    fn test_vector_fallback() {
        let (optimization, plan) = run("Which contracts mention force majeure?");
        assert_eq!(optimization.strategy, Strategy::VectorSearch);
        assert_eq!(plan.strategy, Strategy::VectorSearch);
        assert_eq!(plan.confidence, 0.5);
        assert_eq!(plan.target_collection(), Some("contract_chunks"));
        assert!(plan.fallback_strategy.is_none());
        assert_plan_validates(&plan);

        let fallback = optimizer().vector_plan("fallback");
        assert_eq!(fallback.parameters(), vec![QueryParameter::new("@k", 50)]);
    }

    #[test]
    fn test_positive_beats_negation_on_same_field() {
        let catalog = catalog();
        let detection = RuleBasedDetector::default()
            .detect("Delaware contracts not governed by Alabama", &catalog);
        let filter = CompositeFilter::from_detection(&detection);
        assert_eq!(filter.to_json(), json!({"governing_law_state": "delaware"}));
        assert!(!filter.has_negation());
    }
}
