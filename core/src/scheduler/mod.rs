//! Task-group scheduling: executor registry, pending queue, placement
//! policy and the scheduler runner that drives them.

pub mod executor;
pub mod pending_queue;
pub mod policy;
pub mod registry;
pub mod runner;

pub use executor::{ExecutorRepresenter, ExecutorState};
pub use pending_queue::PendingTaskGroupQueue;
pub use policy::{RoundRobinSchedulingPolicy, SchedulingPolicy};
pub use registry::ExecutorRegistry;
pub use runner::{SchedulerRunner, SignalQueuingCondition};
