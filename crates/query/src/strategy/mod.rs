//! Rule-based strategy planning
//!
//! Provides:
//! - Entity detection against the catalogs (positive and negated mentions)
//! - Composite filter construction
//! - Strategy selection by strict priority
//! - Baseline plan compilation for every strategy

mod detector;
mod optimizer;

pub use detector::{
    Detection, EntityDetector, EntityMatch, MatchType, NegationPolicy, RuleBasedDetector,
};
pub use optimizer::{CompositeFilter, Cues, FieldConstraint, Optimization, QueryOptimizer};
