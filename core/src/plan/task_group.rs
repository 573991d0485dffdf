//! Scheduling units: one task group per stage index.

use crate::plan::properties::{ContainerType, DataCommunicationPattern};
use floe_common::HashRange;
use serde::{Deserialize, Serialize};

/// The id of the task group at `idx` of `stage_id`.
pub fn task_group_id(stage_id: &str, idx: usize) -> String {
    format!("{stage_id}-{idx}")
}

/// A fresh job id.
pub fn new_job_id() -> String {
    format!("job-{}", uuid::Uuid::new_v4())
}

/// A task group's view of one adjacent stage edge: for incoming shuffle
/// edges, `key_range` is the slice of the edge's bucket space this task
/// group reads, snapshotted when the task group is emitted for scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGroupEdge {
    pub edge_id: String,
    pub pattern: DataCommunicationPattern,
    pub key_range: Option<HashRange>,
}

impl TaskGroupEdge {
    pub fn new(
        edge_id: impl Into<String>,
        pattern: DataCommunicationPattern,
        key_range: Option<HashRange>,
    ) -> Self {
        Self {
            edge_id: edge_id.into(),
            pattern,
            key_range,
        }
    }
}

/// A task group ready to be placed on an executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTaskGroup {
    pub task_group_id: String,
    pub job_id: String,
    pub stage_id: String,
    pub idx: usize,
    pub container_type: ContainerType,
    pub incoming: Vec<TaskGroupEdge>,
    pub outgoing: Vec<TaskGroupEdge>,
    /// Hint that this task group should not count against executor capacity.
    pub small_hint: bool,
}

impl ScheduledTaskGroup {
    /// Whether any incoming key range is flagged hot. Hot task groups are
    /// steered away from executors already running another hot task group.
    pub fn is_hot(&self) -> bool {
        self.incoming
            .iter()
            .any(|edge| edge.key_range.map(|range| range.is_hot()).unwrap_or(false))
    }
}
