//! Job and task-group state machines.

use crate::plan::PhysicalPlan;
use crate::plan::task_group::task_group_id;
use floe_common::{Result, RuntimeError, TaskGroupFailureCause};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Per-job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Executing,
    Complete,
    Failed,
}

/// Per-task-group state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskGroupState {
    Ready,
    Executing,
    Complete,
    FailedRecoverable(TaskGroupFailureCause),
    FailedUnrecoverable,
    /// Waiting for dynamic optimization of an upstream metric barrier.
    OnHold,
}

impl TaskGroupState {
    fn can_transition_to(&self, next: &TaskGroupState) -> bool {
        use TaskGroupState::*;
        matches!(
            (self, next),
            (Ready, Executing)
                | (Executing, Complete)
                | (Executing, FailedRecoverable(_))
                | (Executing, FailedUnrecoverable)
                | (Executing, OnHold)
                | (FailedRecoverable(_), Ready)
                | (FailedRecoverable(_), FailedUnrecoverable)
                | (OnHold, Ready)
        )
    }
}

struct JobStateInner {
    job_state: JobState,
    task_groups: HashMap<String, TaskGroupState>,
}

/// Tracks the states of one job's task groups and derives the job state.
///
/// Task groups of stages fed by a metric-collection barrier start `OnHold`
/// and are released to `Ready` when dynamic optimization re-emits them;
/// everything else starts `Ready`.
pub struct JobStateManager {
    job_id: String,
    inner: Mutex<JobStateInner>,
}

impl JobStateManager {
    pub fn from_plan(job_id: impl Into<String>, plan: &PhysicalPlan) -> Self {
        let mut task_groups = HashMap::new();
        for stage in plan.stages() {
            let initial = if plan.fed_by_metric_barrier(&stage.id) {
                TaskGroupState::OnHold
            } else {
                TaskGroupState::Ready
            };
            for idx in 0..stage.parallelism {
                task_groups.insert(task_group_id(&stage.id, idx), initial);
            }
        }
        Self {
            job_id: job_id.into(),
            inner: Mutex::new(JobStateInner {
                job_state: JobState::Pending,
                task_groups,
            }),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub async fn job_state(&self) -> JobState {
        self.inner.lock().await.job_state
    }

    pub async fn task_group_state(&self, task_group_id: &str) -> Result<TaskGroupState> {
        self.inner
            .lock()
            .await
            .task_groups
            .get(task_group_id)
            .copied()
            .ok_or_else(|| {
                RuntimeError::invalid_state(format!("unknown task group {task_group_id}"))
            })
    }

    /// Apply a task-group state transition and derive the job state from it.
    pub async fn on_task_group_state_changed(
        &self,
        task_group_id: &str,
        new_state: TaskGroupState,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let current = inner.task_groups.get(task_group_id).copied().ok_or_else(|| {
            RuntimeError::invalid_state(format!("unknown task group {task_group_id}"))
        })?;
        if !current.can_transition_to(&new_state) {
            return Err(RuntimeError::invalid_state(format!(
                "task group {task_group_id}: {current:?} -> {new_state:?}"
            )));
        }
        info!(job_id = %self.job_id, task_group_id, ?current, ?new_state, "task group state changed");
        inner.task_groups.insert(task_group_id.to_string(), new_state);

        match new_state {
            TaskGroupState::Executing => {
                if inner.job_state == JobState::Pending {
                    info!(job_id = %self.job_id, "job executing");
                    inner.job_state = JobState::Executing;
                }
            }
            TaskGroupState::Complete => {
                let all_complete = inner
                    .task_groups
                    .values()
                    .all(|s| *s == TaskGroupState::Complete);
                if all_complete && inner.job_state != JobState::Failed {
                    info!(job_id = %self.job_id, "job complete");
                    inner.job_state = JobState::Complete;
                }
            }
            TaskGroupState::FailedUnrecoverable => {
                warn!(job_id = %self.job_id, task_group_id, "job failed");
                inner.job_state = JobState::Failed;
            }
            _ => {}
        }
        Ok(())
    }

    /// Number of task groups currently in `state`.
    pub async fn count_in_state(&self, state: TaskGroupState) -> usize {
        self.inner
            .lock()
            .await
            .task_groups
            .values()
            .filter(|s| **s == state)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{DataCommunicationPattern, PhysicalPlan, Stage, StageEdge};

    fn plan_with_barrier() -> PhysicalPlan {
        PhysicalPlan::new(
            "plan",
            vec![
                Stage::new("map", 2).as_metric_collection_barrier(),
                Stage::new("reduce", 2),
            ],
            vec![StageEdge::new(
                "edge-0",
                "map",
                "reduce",
                DataCommunicationPattern::Shuffle,
            )],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_initial_states_respect_barrier() {
        let manager = JobStateManager::from_plan("job-0", &plan_with_barrier());
        assert_eq!(
            manager.task_group_state("map-0").await.unwrap(),
            TaskGroupState::Ready
        );
        assert_eq!(
            manager.task_group_state("reduce-0").await.unwrap(),
            TaskGroupState::OnHold
        );
        assert_eq!(manager.job_state().await, JobState::Pending);
    }

    #[tokio::test]
    async fn test_job_completes_when_all_task_groups_complete() {
        let manager = JobStateManager::from_plan("job-0", &plan_with_barrier());
        for id in ["map-0", "map-1"] {
            manager
                .on_task_group_state_changed(id, TaskGroupState::Executing)
                .await
                .unwrap();
        }
        assert_eq!(manager.job_state().await, JobState::Executing);

        for id in ["reduce-0", "reduce-1"] {
            manager
                .on_task_group_state_changed(id, TaskGroupState::Ready)
                .await
                .unwrap();
            manager
                .on_task_group_state_changed(id, TaskGroupState::Executing)
                .await
                .unwrap();
        }
        for id in ["map-0", "map-1", "reduce-0", "reduce-1"] {
            manager
                .on_task_group_state_changed(id, TaskGroupState::Complete)
                .await
                .unwrap();
        }
        assert_eq!(manager.job_state().await, JobState::Complete);
    }

    #[tokio::test]
    async fn test_unrecoverable_failure_fails_the_job() {
        let manager = JobStateManager::from_plan("job-0", &plan_with_barrier());
        manager
            .on_task_group_state_changed("map-0", TaskGroupState::Executing)
            .await
            .unwrap();
        manager
            .on_task_group_state_changed(
                "map-0",
                TaskGroupState::FailedRecoverable(TaskGroupFailureCause::OutputWriteFailure),
            )
            .await
            .unwrap();
        manager
            .on_task_group_state_changed("map-0", TaskGroupState::FailedUnrecoverable)
            .await
            .unwrap();
        assert_eq!(manager.job_state().await, JobState::Failed);
    }

    #[tokio::test]
    async fn test_invalid_transitions_are_rejected() {
        let manager = JobStateManager::from_plan("job-0", &plan_with_barrier());
        // Ready -> Complete skips Executing.
        let err = manager
            .on_task_group_state_changed("map-0", TaskGroupState::Complete)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidState { .. }));

        let err = manager
            .on_task_group_state_changed("nope", TaskGroupState::Executing)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidState { .. }));
    }
}
