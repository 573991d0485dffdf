//! Process-wide directory of executors.

use crate::plan::ContainerType;
use crate::scheduler::executor::{ExecutorRepresenter, ExecutorState};
use floe_common::{Result, RuntimeError};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::info;

/// Thread-safe map of executor id to [`ExecutorRepresenter`].
///
/// The registry uniquely owns the representers; every operation takes the
/// single internal lock once.
pub struct ExecutorRegistry {
    executors: Mutex<HashMap<String, ExecutorRepresenter>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, executor: ExecutorRepresenter) -> Result<()> {
        let mut executors = self.executors.lock().await;
        let executor_id = executor.executor_id().to_string();
        if executors.contains_key(&executor_id) {
            return Err(RuntimeError::invalid_state(format!(
                "executor {executor_id} is already registered"
            )));
        }
        info!(executor_id, container_type = %executor.container_type(), "registered executor");
        executors.insert(executor_id, executor);
        Ok(())
    }

    /// Mark an executor failed and return the snapshot of task groups it was
    /// running, for resubmission.
    pub async fn mark_failed(&self, executor_id: &str) -> Result<HashSet<String>> {
        let mut executors = self.executors.lock().await;
        let executor = Self::get_mut(&mut executors, executor_id)?;
        let snapshot = executor.on_executor_failed();
        info!(executor_id, resubmit = snapshot.len(), "executor failed");
        Ok(snapshot)
    }

    pub async fn mark_complete(&self, executor_id: &str) -> Result<()> {
        let mut executors = self.executors.lock().await;
        Self::get_mut(&mut executors, executor_id)?.on_executor_completed();
        info!(executor_id, "executor completed");
        Ok(())
    }

    /// Ids of all executors currently in the running state, in sorted order.
    pub async fn running_executor_ids(&self) -> Vec<String> {
        let executors = self.executors.lock().await;
        let mut ids: Vec<String> = executors
            .values()
            .filter(|e| e.state() == ExecutorState::Running)
            .map(|e| e.executor_id().to_string())
            .collect();
        ids.sort();
        ids
    }

    pub async fn contains(&self, executor_id: &str) -> bool {
        self.executors.lock().await.contains_key(executor_id)
    }

    pub async fn is_running(&self, executor_id: &str) -> bool {
        self.executors
            .lock()
            .await
            .get(executor_id)
            .map(|e| e.state() == ExecutorState::Running)
            .unwrap_or(false)
    }

    pub async fn is_failed(&self, executor_id: &str) -> bool {
        self.executors
            .lock()
            .await
            .get(executor_id)
            .map(|e| e.state() == ExecutorState::Failed)
            .unwrap_or(false)
    }

    /// Whether a running executor has capacity for another task group.
    pub async fn has_free_slot(&self, executor_id: &str) -> Result<bool> {
        let executors = self.executors.lock().await;
        let executor = Self::get(&executors, executor_id)?;
        if executor.state() != ExecutorState::Running {
            return Err(RuntimeError::invalid_state(format!(
                "executor {executor_id} is not running"
            )));
        }
        Ok(executor.has_free_slot())
    }

    pub async fn container_type_of(&self, executor_id: &str) -> Result<ContainerType> {
        let executors = self.executors.lock().await;
        Ok(Self::get(&executors, executor_id)?.container_type())
    }

    pub async fn running_task_groups_of(&self, executor_id: &str) -> Result<HashSet<String>> {
        let executors = self.executors.lock().await;
        Ok(Self::get(&executors, executor_id)?.running_task_groups().clone())
    }

    /// Record a task group as running on an executor.
    pub async fn assign_task_group(
        &self,
        executor_id: &str,
        task_group_id: &str,
        small_hint: bool,
    ) -> Result<()> {
        let mut executors = self.executors.lock().await;
        let executor = Self::get_mut(&mut executors, executor_id)?;
        if executor.state() != ExecutorState::Running {
            return Err(RuntimeError::invalid_state(format!(
                "cannot assign {task_group_id} to non-running executor {executor_id}"
            )));
        }
        executor.on_task_group_scheduled(task_group_id, small_hint);
        Ok(())
    }

    pub async fn on_task_group_complete(
        &self,
        executor_id: &str,
        task_group_id: &str,
    ) -> Result<()> {
        let mut executors = self.executors.lock().await;
        Self::get_mut(&mut executors, executor_id)?.on_task_group_complete(task_group_id);
        Ok(())
    }

    pub async fn on_task_group_failed(
        &self,
        executor_id: &str,
        task_group_id: &str,
    ) -> Result<()> {
        let mut executors = self.executors.lock().await;
        Self::get_mut(&mut executors, executor_id)?.on_task_group_failed(task_group_id);
        Ok(())
    }

    fn get<'a>(
        executors: &'a HashMap<String, ExecutorRepresenter>,
        executor_id: &str,
    ) -> Result<&'a ExecutorRepresenter> {
        executors
            .get(executor_id)
            .ok_or_else(|| RuntimeError::invalid_state(format!("unknown executor {executor_id}")))
    }

    fn get_mut<'a>(
        executors: &'a mut HashMap<String, ExecutorRepresenter>,
        executor_id: &str,
    ) -> Result<&'a mut ExecutorRepresenter> {
        executors
            .get_mut(executor_id)
            .ok_or_else(|| RuntimeError::invalid_state(format!("unknown executor {executor_id}")))
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
