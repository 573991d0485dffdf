//! Floe runtime core.
//!
//! The driver-side heart of the runtime: the physical-plan model, job and
//! task-group state machines, the skew-aware task-group scheduler, and the
//! dynamic optimization that rebalances shuffle key ranges from observed
//! partition sizes.

pub mod optimizer;
pub mod plan;
pub mod scheduler;
pub mod state;

pub use optimizer::{DataSkewRuntimePass, DynamicOptimizationHandler, MetricCollectionBarrier};
pub use plan::{
    ContainerType, DataCommunicationPattern, PhysicalPlan, ScheduledTaskGroup, ShuffleDistribution,
    Stage, StageEdge,
};
pub use scheduler::{
    ExecutorRegistry, ExecutorRepresenter, PendingTaskGroupQueue, RoundRobinSchedulingPolicy,
    SchedulerRunner, SchedulingPolicy,
};
pub use state::{JobState, JobStateManager, TaskGroupState};
