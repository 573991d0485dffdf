//! The scheduler runner: takes task groups from the pending queue and places
//! them through the scheduling policy.

use crate::plan::ScheduledTaskGroup;
use crate::scheduler::executor::ExecutorRepresenter;
use crate::scheduler::pending_queue::PendingTaskGroupQueue;
use crate::scheduler::policy::SchedulingPolicy;
use crate::state::{JobStateManager, TaskGroupState};
use floe_common::{Result, RuntimeConfig, RuntimeError, TaskGroupFailureCause};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, warn};

/// A condition that queues at most one signal.
///
/// `signal` wakes a single waiter, or stores the wake-up if nobody is
/// waiting; `wait` consumes a stored wake-up immediately instead of
/// suspending. A signal observed after a check-and-wait is therefore never
/// lost, which is exactly `tokio::sync::Notify`'s single-permit behavior.
pub struct SignalQueuingCondition {
    notify: Notify,
}

impl SignalQueuingCondition {
    pub fn new() -> Self {
        Self {
            notify: Notify::new(),
        }
    }

    pub fn signal(&self) {
        self.notify.notify_one();
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

impl Default for SignalQueuingCondition {
    fn default() -> Self {
        Self::new()
    }
}

struct TrackedTaskGroup {
    task_group: ScheduledTaskGroup,
    attempts: u32,
}

/// Drives the scheduling loop on a dedicated task, spawned at construction.
///
/// The loop sleeps in the condition whenever neither an executor nor a task
/// group is available and wakes on `on_an_executor_available`,
/// `on_a_task_group_available` or `terminate`. It also records every emitted
/// task group so that recoverable failures and executor loss can resubmit
/// them, bounded by the configured retry count.
pub struct SchedulerRunner {
    policy: Arc<dyn SchedulingPolicy>,
    pending_queue: Arc<PendingTaskGroupQueue>,
    condition: SignalQueuingCondition,
    job_state_managers: Mutex<HashMap<String, Arc<JobStateManager>>>,
    tracked: Mutex<HashMap<String, TrackedTaskGroup>>,
    max_task_group_retries: u32,
    terminated: AtomicBool,
}

impl SchedulerRunner {
    pub fn new(
        policy: Arc<dyn SchedulingPolicy>,
        pending_queue: Arc<PendingTaskGroupQueue>,
        config: &RuntimeConfig,
    ) -> Arc<Self> {
        let runner = Arc::new(Self {
            policy,
            pending_queue,
            condition: SignalQueuingCondition::new(),
            job_state_managers: Mutex::new(HashMap::new()),
            tracked: Mutex::new(HashMap::new()),
            max_task_group_retries: config.max_task_group_retries,
            terminated: AtomicBool::new(false),
        });
        let scheduling_loop = Arc::clone(&runner);
        tokio::spawn(async move { scheduling_loop.run_loop().await });
        runner
    }

    pub fn pending_queue(&self) -> &Arc<PendingTaskGroupQueue> {
        &self.pending_queue
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub async fn job_state_manager(&self, job_id: &str) -> Option<Arc<JobStateManager>> {
        self.job_state_managers.lock().await.get(job_id).cloned()
    }

    /// Begin scheduling a job. Jobs arriving after termination are ignored.
    pub async fn schedule_job(
        &self,
        job_state: Arc<JobStateManager>,
        task_groups: Vec<ScheduledTaskGroup>,
    ) {
        if self.is_terminated() {
            warn!(job_id = %job_state.job_id(), "ignoring job scheduled after termination");
            return;
        }
        self.job_state_managers
            .lock()
            .await
            .insert(job_state.job_id().to_string(), job_state);
        for task_group in task_groups {
            self.enqueue_task_group(task_group).await;
        }
    }

    /// Put a task group into the pending queue and wake the loop.
    pub async fn enqueue_task_group(&self, task_group: ScheduledTaskGroup) {
        self.tracked
            .lock()
            .await
            .entry(task_group.task_group_id.clone())
            .or_insert_with(|| TrackedTaskGroup {
                task_group: task_group.clone(),
                attempts: 0,
            });
        self.pending_queue.enqueue(task_group).await;
        self.on_a_task_group_available();
    }

    pub fn on_an_executor_available(&self) {
        self.condition.signal();
    }

    pub fn on_a_task_group_available(&self) {
        self.condition.signal();
    }

    /// Register a new executor with the policy and wake the loop.
    pub async fn handle_executor_added(&self, executor: ExecutorRepresenter) -> Result<()> {
        self.policy.on_executor_added(executor).await?;
        self.on_an_executor_available();
        Ok(())
    }

    /// Remove a lost executor and resubmit the task groups it was running.
    pub async fn handle_executor_removed(&self, executor_id: &str) -> Result<()> {
        let to_resubmit = self.policy.on_executor_removed(executor_id).await?;
        warn!(
            executor_id,
            resubmit = to_resubmit.len(),
            "executor removed"
        );
        for task_group_id in to_resubmit {
            self.resubmit_or_fail(&task_group_id, TaskGroupFailureCause::ContainerFailure)
                .await?;
        }
        Ok(())
    }

    pub async fn handle_task_group_complete(
        &self,
        executor_id: &str,
        task_group_id: &str,
    ) -> Result<()> {
        self.policy
            .on_task_group_complete(executor_id, task_group_id)
            .await?;
        let job_state = self.job_state_manager_of(task_group_id).await?;
        job_state
            .on_task_group_state_changed(task_group_id, TaskGroupState::Complete)
            .await?;
        self.on_an_executor_available();
        Ok(())
    }

    pub async fn handle_task_group_failed(
        &self,
        executor_id: &str,
        task_group_id: &str,
        cause: TaskGroupFailureCause,
    ) -> Result<()> {
        self.policy
            .on_task_group_failed(executor_id, task_group_id)
            .await?;
        self.resubmit_or_fail(task_group_id, cause).await?;
        self.on_an_executor_available();
        Ok(())
    }

    /// Terminate the policy (shutting down executors) and let the loop exit
    /// at its next checkpoint.
    pub async fn terminate(&self) -> Result<()> {
        self.policy.terminate().await?;
        self.terminated.store(true, Ordering::Release);
        self.condition.signal();
        Ok(())
    }

    async fn job_state_manager_of(&self, task_group_id: &str) -> Result<Arc<JobStateManager>> {
        let job_id = {
            let tracked = self.tracked.lock().await;
            tracked
                .get(task_group_id)
                .map(|t| t.task_group.job_id.clone())
                .ok_or_else(|| {
                    RuntimeError::invalid_state(format!(
                        "task group {task_group_id} was never scheduled"
                    ))
                })?
        };
        self.job_state_manager(&job_id).await.ok_or_else(|| {
            RuntimeError::invalid_state(format!("no job state manager for job {job_id}"))
        })
    }

    async fn resubmit_or_fail(
        &self,
        task_group_id: &str,
        cause: TaskGroupFailureCause,
    ) -> Result<()> {
        let (task_group, attempts) = {
            let mut tracked = self.tracked.lock().await;
            let entry = tracked.get_mut(task_group_id).ok_or_else(|| {
                RuntimeError::invalid_state(format!(
                    "task group {task_group_id} was never scheduled"
                ))
            })?;
            entry.attempts += 1;
            (entry.task_group.clone(), entry.attempts)
        };
        let job_state = self.job_state_manager(&task_group.job_id).await.ok_or_else(|| {
            RuntimeError::invalid_state(format!("no job state manager for job {}", task_group.job_id))
        })?;

        if !cause.is_recoverable() {
            job_state
                .on_task_group_state_changed(task_group_id, TaskGroupState::FailedUnrecoverable)
                .await?;
            return Ok(());
        }

        job_state
            .on_task_group_state_changed(task_group_id, TaskGroupState::FailedRecoverable(cause))
            .await?;
        if attempts <= self.max_task_group_retries {
            warn!(
                task_group_id,
                attempts,
                max_retries = self.max_task_group_retries,
                ?cause,
                "resubmitting task group"
            );
            job_state
                .on_task_group_state_changed(task_group_id, TaskGroupState::Ready)
                .await?;
            self.pending_queue.enqueue(task_group).await;
            self.on_a_task_group_available();
        } else {
            error!(task_group_id, "task group failed after all retries");
            job_state
                .on_task_group_state_changed(task_group_id, TaskGroupState::FailedUnrecoverable)
                .await?;
        }
        Ok(())
    }

    async fn run_loop(&self) {
        info!("scheduler runner started");
        'scheduling: while !self.is_terminated() {
            // Block-dequeue: sleep in the condition instead of spinning on an
            // empty queue.
            let task_group = loop {
                if self.is_terminated() {
                    break 'scheduling;
                }
                match self.pending_queue.dequeue().await {
                    Some(task_group) => break task_group,
                    None => self.condition.wait().await,
                }
            };

            let Some(job_state) = self.job_state_manager(&task_group.job_id).await else {
                warn!(
                    job_id = %task_group.job_id,
                    task_group_id = %task_group.task_group_id,
                    "dropping task group of unknown job"
                );
                continue;
            };

            match self.policy.schedule_task_group(&task_group, &job_state).await {
                Ok(true) => {
                    // There may be other scheduling opportunities.
                    self.condition.signal();
                }
                Ok(false) => {
                    info!(
                        task_group_id = %task_group.task_group_id,
                        timeout_ms = self.policy.schedule_timeout_ms(),
                        "failed to assign an executor before the timeout, re-enqueueing"
                    );
                    self.pending_queue.enqueue(task_group).await;
                    self.condition.wait().await;
                }
                Err(e) => {
                    error!(
                        task_group_id = %task_group.task_group_id,
                        error = %e,
                        "scheduling attempt failed"
                    );
                    if let Err(e) = job_state
                        .on_task_group_state_changed(
                            &task_group.task_group_id,
                            TaskGroupState::FailedUnrecoverable,
                        )
                        .await
                    {
                        error!(error = %e, "could not record scheduling failure");
                    }
                }
            }
        }
        info!("scheduler runner terminated");
    }
}
