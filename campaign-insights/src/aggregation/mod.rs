pub mod engine;
pub mod rollup;
pub mod totals;

pub use engine::{
    resolve_params, AggregationEngine, ReaggregationStatus, ReaggregationSummary,
};
pub use totals::{Ratios, Totals};
