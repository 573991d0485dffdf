//! Applies dynamic optimization to a running job.

use crate::optimizer::data_skew::DataSkewRuntimePass;
use crate::plan::PhysicalPlan;
use crate::scheduler::runner::SchedulerRunner;
use crate::state::TaskGroupState;
use floe_common::Result;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Owns a job's in-memory physical plan and rewrites it when a
/// metric-collection barrier completes.
///
/// Runs on the event dispatch path: the pass is applied, the rewritten
/// edge's destination task groups are released into the pending queue with
/// their freshly assigned key ranges, and the scheduler is woken. The
/// rewrite is permanent for the remainder of the job; task groups scheduled
/// earlier are unaffected.
pub struct DynamicOptimizationHandler {
    plan: Mutex<PhysicalPlan>,
    pass: DataSkewRuntimePass,
    runner: Arc<SchedulerRunner>,
}

impl DynamicOptimizationHandler {
    pub fn new(plan: PhysicalPlan, pass: DataSkewRuntimePass, runner: Arc<SchedulerRunner>) -> Self {
        Self {
            plan: Mutex::new(plan),
            pass,
            runner,
        }
    }

    /// Handle the completion of a metric-collection barrier for `edge_id`:
    /// rebalance the edge's key ranges from the observed sizes, then emit
    /// the destination stage's task groups for scheduling.
    pub async fn on_metric_barrier_complete<K: Hash>(
        &self,
        job_id: &str,
        edge_id: &str,
        key_to_size: &HashMap<K, u64>,
    ) -> Result<()> {
        let task_groups = {
            let mut plan = self.plan.lock().await;
            let distribution = self.pass.apply(&mut plan, edge_id, key_to_size)?;
            info!(
                job_id,
                edge_id,
                hash_range = distribution.hash_range(),
                hot_ranges = distribution.ranges().iter().filter(|r| r.is_hot()).count(),
                "rewrote shuffle distribution"
            );
            let dst_stage = plan.edge(edge_id)?.dst_stage.clone();
            plan.task_groups_of_stage(&dst_stage, job_id)?
        };

        if let Some(job_state) = self.runner.job_state_manager(job_id).await {
            for task_group in &task_groups {
                job_state
                    .on_task_group_state_changed(&task_group.task_group_id, TaskGroupState::Ready)
                    .await?;
            }
        }
        for task_group in task_groups {
            self.runner.enqueue_task_group(task_group).await;
        }
        Ok(())
    }

    /// Snapshot of the current plan.
    pub async fn current_plan(&self) -> PhysicalPlan {
        self.plan.lock().await.clone()
    }
}
