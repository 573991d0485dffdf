//! Runtime optimization: the data-skew pass that rebalances hashed key
//! ranges from observed partition sizes, and the event plumbing that applies
//! it to a running job.

pub mod data_skew;
pub mod event_handler;
pub mod metric;

pub use data_skew::{DataSkewRuntimePass, DEFAULT_NUM_SKEWED_KEYS, HASH_RANGE_MULTIPLIER};
pub use event_handler::DynamicOptimizationHandler;
pub use metric::MetricCollectionBarrier;
