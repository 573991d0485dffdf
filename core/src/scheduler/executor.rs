//! Driver-side representation of one executor.

use crate::plan::ContainerType;
use floe_utils::current_timestamp_secs;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Running,
    Failed,
    Completed,
}

/// The driver's record of an executor: its container type, capacity, and the
/// task groups it is running or has finished. Mutated only under the
/// executor registry's lock.
#[derive(Debug, Clone)]
pub struct ExecutorRepresenter {
    executor_id: String,
    container_type: ContainerType,
    capacity: usize,
    running: HashSet<String>,
    small: HashSet<String>,
    complete: HashSet<String>,
    failed: HashSet<String>,
    state: ExecutorState,
    start_time_secs: u64,
}

impl ExecutorRepresenter {
    pub fn new(executor_id: impl Into<String>, container_type: ContainerType, capacity: usize) -> Self {
        Self {
            executor_id: executor_id.into(),
            container_type,
            capacity,
            running: HashSet::new(),
            small: HashSet::new(),
            complete: HashSet::new(),
            failed: HashSet::new(),
            state: ExecutorState::Running,
            start_time_secs: current_timestamp_secs(),
        }
    }

    pub fn executor_id(&self) -> &str {
        &self.executor_id
    }

    pub fn container_type(&self) -> ContainerType {
        self.container_type
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn start_time_secs(&self) -> u64 {
        self.start_time_secs
    }

    pub fn running_task_groups(&self) -> &HashSet<String> {
        &self.running
    }

    pub fn complete_task_groups(&self) -> &HashSet<String> {
        &self.complete
    }

    pub fn failed_task_groups(&self) -> &HashSet<String> {
        &self.failed
    }

    /// Whether another task group fits. Small task groups are a hint
    /// category that does not count against capacity.
    pub fn has_free_slot(&self) -> bool {
        self.running.len().saturating_sub(self.small.len()) < self.capacity
    }

    pub fn on_task_group_scheduled(&mut self, task_group_id: impl Into<String>, small_hint: bool) {
        let task_group_id = task_group_id.into();
        if small_hint {
            self.small.insert(task_group_id.clone());
        }
        self.running.insert(task_group_id);
    }

    pub fn on_task_group_complete(&mut self, task_group_id: &str) {
        self.running.remove(task_group_id);
        self.small.remove(task_group_id);
        self.complete.insert(task_group_id.to_string());
    }

    pub fn on_task_group_failed(&mut self, task_group_id: &str) {
        self.running.remove(task_group_id);
        self.small.remove(task_group_id);
        self.failed.insert(task_group_id.to_string());
    }

    /// Mark this executor failed, moving its running task groups into the
    /// failed set. Returns the task groups that were running so the
    /// scheduler can resubmit them.
    pub fn on_executor_failed(&mut self) -> HashSet<String> {
        self.state = ExecutorState::Failed;
        let was_running: HashSet<String> = self.running.drain().collect();
        self.small.clear();
        self.failed.extend(was_running.iter().cloned());
        was_running
    }

    pub fn on_executor_completed(&mut self) {
        self.state = ExecutorState::Completed;
    }
}
