//! Query plans
//!
//! `QueryPlan` is the typed, validated shape every component works with.
//! `RawQueryPlan` is the string-typed shape received from the planner;
//! converting it rejects unknown strategies and query types.

use caig_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Execution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Single entity lookup in the entities collection
    EntityFirst,
    /// Multi-filter or negation lookup in the contracts collection
    ContractDirect,
    /// Pre-aggregated figures for one entity
    EntityAggregation,
    /// Relationship query against the graph store
    GraphTraversal,
    /// Semantic similarity over embedded chunks
    VectorSearch,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::EntityFirst,
        Strategy::ContractDirect,
        Strategy::EntityAggregation,
        Strategy::GraphTraversal,
        Strategy::VectorSearch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::EntityFirst => "ENTITY_FIRST",
            Strategy::ContractDirect => "CONTRACT_DIRECT",
            Strategy::EntityAggregation => "ENTITY_AGGREGATION",
            Strategy::GraphTraversal => "GRAPH_TRAVERSAL",
            Strategy::VectorSearch => "VECTOR_SEARCH",
        }
    }

    /// Query language the strategy compiles to
    pub fn query_type(&self) -> QueryType {
        match self {
            Strategy::GraphTraversal => QueryType::Sparql,
            _ => QueryType::Sql,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == wanted)
            .ok_or_else(|| AppError::UnknownStrategy { value: s.to_string() })
    }
}

/// Query language of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryType {
    #[serde(rename = "SQL")]
    Sql,
    #[serde(rename = "SPARQL")]
    Sparql,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Sql => "SQL",
            QueryType::Sparql => "SPARQL",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SQL" => Ok(QueryType::Sql),
            "SPARQL" => Ok(QueryType::Sparql),
            _ => Err(AppError::UnknownQueryType { value: s.to_string() }),
        }
    }
}

/// Named query parameter, e.g. `@governing_law_state`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParameter {
    pub name: String,
    pub value: Value,
}

impl QueryParameter {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A structured, executable query plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub strategy: Strategy,

    /// Strategy to try when this plan fails
    pub fallback_strategy: Option<Strategy>,

    pub query_type: QueryType,

    pub query_text: String,

    /// Executor hints: `collections`, `collection`, `parameters`,
    /// `estimated_cost`, `filter`
    #[serde(default)]
    pub execution_plan: Map<String, Value>,

    /// Confidence in [0, 1]
    pub confidence: f64,

    #[serde(default)]
    pub reasoning: String,

    /// Unparsed planner output, if the plan came from the planner
    #[serde(default)]
    pub raw_response: Option<String>,
}

impl QueryPlan {
    /// Collection the plan targets: first of `collections`, else `collection`
    pub fn target_collection(&self) -> Option<&str> {
        self.execution_plan
            .get("collections")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.as_str())
            .or_else(|| {
                self.execution_plan
                    .get("collection")
                    .and_then(|c| c.as_str())
            })
            .filter(|c| !c.trim().is_empty())
    }

    /// Parameters bound to the query text
    pub fn parameters(&self) -> Vec<QueryParameter> {
        self.execution_plan
            .get("parameters")
            .and_then(|p| p.as_array())
            .map(|params| {
                params
                    .iter()
                    .filter_map(|p| serde_json::from_value(p.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Bind (or rebind) one parameter
    pub fn with_parameter(mut self, name: &str, value: Value) -> Self {
        let mut params = self.parameters();
        match params.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value,
            None => params.push(QueryParameter::new(name, value)),
        }

        let params = params
            .into_iter()
            .filter_map(|p| serde_json::to_value(p).ok())
            .collect();
        self.execution_plan
            .insert("parameters".to_string(), Value::Array(params));
        self
    }

    /// Cost estimate carried by the plan
    pub fn estimated_cost(&self) -> Option<f64> {
        self.execution_plan
            .get("estimated_cost")
            .and_then(|c| c.as_f64())
    }
}

/// Plan as received from the planner, before type checks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawQueryPlan {
    pub strategy: String,

    #[serde(default)]
    pub fallback_strategy: Option<String>,

    pub query_type: String,

    pub query_text: String,

    #[serde(default)]
    pub execution_plan: Value,

    pub confidence: f64,

    #[serde(default)]
    pub reasoning: String,

    #[serde(default)]
    pub raw_response: Option<String>,
}

impl TryFrom<RawQueryPlan> for QueryPlan {
    type Error = AppError;

    fn try_from(raw: RawQueryPlan) -> Result<Self> {
        let strategy = raw.strategy.parse::<Strategy>()?;
        let query_type = raw.query_type.parse::<QueryType>()?;

        let fallback_strategy = match raw.fallback_strategy.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(value.parse::<Strategy>()?),
        };

        if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
            return Err(AppError::Validation {
                message: format!("Plan confidence {} is outside [0, 1]", raw.confidence),
            });
        }

        let execution_plan = match raw.execution_plan {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(AppError::Validation {
                    message: format!("execution_plan must be an object, got {}", other),
                })
            }
        };

        Ok(QueryPlan {
            strategy,
            fallback_strategy,
            query_type,
            query_text: raw.query_text,
            execution_plan,
            confidence: raw.confidence,
            reasoning: raw.reasoning,
            raw_response: raw.raw_response,
        })
    }
}
