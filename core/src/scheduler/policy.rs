//! Task-group placement policies.

use crate::plan::{ContainerType, ScheduledTaskGroup};
use crate::scheduler::executor::ExecutorRepresenter;
use crate::scheduler::registry::ExecutorRegistry;
use crate::state::{JobStateManager, TaskGroupState};
use async_trait::async_trait;
use floe_common::Result;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Decides which executor a task group runs on.
///
/// Implementations are thread-safe; every method serializes on internal
/// state and returns without blocking on external events.
#[async_trait]
pub trait SchedulingPolicy: Send + Sync {
    /// Notional per-attempt timeout, reported by the runner when placement
    /// fails.
    fn schedule_timeout_ms(&self) -> u64;

    /// Try to place a task group. Returns `false` when no candidate executor
    /// has a free slot, in which case the runner re-enqueues the task group.
    async fn schedule_task_group(
        &self,
        task_group: &ScheduledTaskGroup,
        job_state: &JobStateManager,
    ) -> Result<bool>;

    async fn on_executor_added(&self, executor: ExecutorRepresenter) -> Result<()>;

    /// Remove an executor, returning the task groups it was running so they
    /// can be resubmitted.
    async fn on_executor_removed(&self, executor_id: &str) -> Result<HashSet<String>>;

    async fn on_task_group_complete(&self, executor_id: &str, task_group_id: &str) -> Result<()>;

    async fn on_task_group_failed(&self, executor_id: &str, task_group_id: &str) -> Result<()>;

    /// Shut down all running executors.
    async fn terminate(&self) -> Result<()>;
}

struct RoundRobinState {
    /// The pool of executors available for each container type.
    executor_ids_by_type: BTreeMap<ContainerType, Vec<String>>,
    /// The index of the next executor to try for each container type.
    next_index_by_type: BTreeMap<ContainerType, usize>,
    /// Executors currently running a hot task group, by hot task group id.
    hot_task_group_by_executor: HashMap<String, String>,
}

impl RoundRobinState {
    fn ensure_container_type(&mut self, container_type: ContainerType) {
        self.executor_ids_by_type.entry(container_type).or_default();
        self.next_index_by_type.entry(container_type).or_insert(0);
    }

    /// Candidate executors for a container type; the `None` sentinel draws
    /// from every pool in stable type order.
    fn candidates_for(&self, container_type: ContainerType) -> Vec<String> {
        if container_type == ContainerType::None {
            self.executor_ids_by_type
                .values()
                .flat_map(|ids| ids.iter().cloned())
                .collect()
        } else {
            self.executor_ids_by_type
                .get(&container_type)
                .cloned()
                .unwrap_or_default()
        }
    }
}

/// Round-robin placement per container type, biased so that hot task groups
/// land on executors not already running another hot task group.
pub struct RoundRobinSchedulingPolicy {
    registry: Arc<ExecutorRegistry>,
    schedule_timeout_ms: u64,
    state: Mutex<RoundRobinState>,
}

impl RoundRobinSchedulingPolicy {
    pub fn new(registry: Arc<ExecutorRegistry>, schedule_timeout_ms: u64) -> Self {
        let mut state = RoundRobinState {
            executor_ids_by_type: BTreeMap::new(),
            next_index_by_type: BTreeMap::new(),
            hot_task_group_by_executor: HashMap::new(),
        };
        state.ensure_container_type(ContainerType::None);
        Self {
            registry,
            schedule_timeout_ms,
            state: Mutex::new(state),
        }
    }

    /// Hot task groups first scan executors without a hot task group, in
    /// pool order; everything else (and any hot task group that found no
    /// light executor) falls through to plain round-robin.
    async fn consider_skew(
        &self,
        state: &mut RoundRobinState,
        task_group: &ScheduledTaskGroup,
    ) -> Result<Option<String>> {
        if task_group.is_hot() {
            let light_candidates: Vec<String> = state
                .candidates_for(task_group.container_type)
                .into_iter()
                .filter(|id| !state.hot_task_group_by_executor.contains_key(id))
                .collect();
            for executor_id in light_candidates {
                if self.registry.has_free_slot(&executor_id).await? {
                    info!(
                        executor_id,
                        task_group_id = %task_group.task_group_id,
                        "placing hot task group on light executor"
                    );
                    state
                        .hot_task_group_by_executor
                        .insert(executor_id.clone(), task_group.task_group_id.clone());
                    return Ok(Some(executor_id));
                }
            }
        }
        self.select_executor_by_rr(state, task_group.container_type)
            .await
    }

    async fn select_executor_by_rr(
        &self,
        state: &mut RoundRobinState,
        container_type: ContainerType,
    ) -> Result<Option<String>> {
        let candidates = state.candidates_for(container_type);
        if candidates.is_empty() {
            return Ok(None);
        }
        let num_executors = candidates.len();
        let start = state
            .next_index_by_type
            .get(&container_type)
            .copied()
            .unwrap_or(0);
        for i in 0..num_executors {
            let index = (start + i) % num_executors;
            let executor_id = &candidates[index];
            if self.registry.has_free_slot(executor_id).await? {
                state
                    .next_index_by_type
                    .insert(container_type, (index + 1) % num_executors);
                return Ok(Some(executor_id.clone()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl SchedulingPolicy for RoundRobinSchedulingPolicy {
    fn schedule_timeout_ms(&self) -> u64 {
        self.schedule_timeout_ms
    }

    async fn schedule_task_group(
        &self,
        task_group: &ScheduledTaskGroup,
        job_state: &JobStateManager,
    ) -> Result<bool> {
        debug!(task_group_id = %task_group.task_group_id, "attempting round-robin placement");
        let mut state = self.state.lock().await;
        state.ensure_container_type(task_group.container_type);

        match self.consider_skew(&mut state, task_group).await? {
            Some(executor_id) => {
                job_state
                    .on_task_group_state_changed(
                        &task_group.task_group_id,
                        TaskGroupState::Executing,
                    )
                    .await?;
                self.registry
                    .assign_task_group(
                        &executor_id,
                        &task_group.task_group_id,
                        task_group.small_hint,
                    )
                    .await?;
                info!(
                    task_group_id = %task_group.task_group_id,
                    executor_id,
                    "scheduled task group"
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn on_executor_added(&self, executor: ExecutorRepresenter) -> Result<()> {
        let executor_id = executor.executor_id().to_string();
        let container_type = executor.container_type();
        let mut state = self.state.lock().await;
        self.registry.register(executor).await?;
        state.ensure_container_type(container_type);

        // Insert at the cursor so the new executor is tried next.
        let cursor = state
            .next_index_by_type
            .get(&container_type)
            .copied()
            .unwrap_or(0);
        let pool = state.executor_ids_by_type.entry(container_type).or_default();
        let position = cursor.min(pool.len());
        pool.insert(position, executor_id);
        Ok(())
    }

    async fn on_executor_removed(&self, executor_id: &str) -> Result<HashSet<String>> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let container_type = self.registry.container_type_of(executor_id).await?;
        let failed_task_groups = self.registry.mark_failed(executor_id).await?;
        state.hot_task_group_by_executor.remove(executor_id);

        if let Some(pool) = state.executor_ids_by_type.get_mut(&container_type) {
            if let Some(position) = pool.iter().position(|id| id == executor_id) {
                let cursor = state
                    .next_index_by_type
                    .get(&container_type)
                    .copied()
                    .unwrap_or(0);
                if position < cursor {
                    state.next_index_by_type.insert(container_type, cursor - 1);
                } else if position == cursor {
                    state.next_index_by_type.insert(container_type, 0);
                }
                pool.remove(position);
                debug_assert!(
                    pool.is_empty()
                        || state
                            .next_index_by_type
                            .get(&container_type)
                            .copied()
                            .unwrap_or(0)
                            < pool.len()
                );
            }
        }
        Ok(failed_task_groups)
    }

    async fn on_task_group_complete(&self, executor_id: &str, task_group_id: &str) -> Result<()> {
        self.registry
            .on_task_group_complete(executor_id, task_group_id)
            .await?;
        let mut state = self.state.lock().await;
        if state.hot_task_group_by_executor.get(executor_id).map(String::as_str)
            == Some(task_group_id)
        {
            state.hot_task_group_by_executor.remove(executor_id);
        }
        info!(task_group_id, executor_id, "task group completed");
        Ok(())
    }

    async fn on_task_group_failed(&self, executor_id: &str, task_group_id: &str) -> Result<()> {
        self.registry
            .on_task_group_failed(executor_id, task_group_id)
            .await?;
        let mut state = self.state.lock().await;
        if state.hot_task_group_by_executor.get(executor_id).map(String::as_str)
            == Some(task_group_id)
        {
            state.hot_task_group_by_executor.remove(executor_id);
        }
        info!(task_group_id, executor_id, "task group failed");
        Ok(())
    }

    async fn terminate(&self) -> Result<()> {
        for executor_id in self.registry.running_executor_ids().await {
            self.registry.mark_complete(&executor_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{
        DataCommunicationPattern, PhysicalPlan, ShuffleDistribution, Stage, StageEdge,
    };
    use floe_common::HashRange;

    fn policy_fixture() -> (Arc<ExecutorRegistry>, RoundRobinSchedulingPolicy) {
        let registry = Arc::new(ExecutorRegistry::new());
        let policy = RoundRobinSchedulingPolicy::new(Arc::clone(&registry), 1_000);
        (registry, policy)
    }

    /// One stage of `parallelism` task groups fed by a shuffle edge carrying
    /// the given ranges.
    fn plan_with_ranges(parallelism: usize, ranges: Vec<HashRange>) -> PhysicalPlan {
        PhysicalPlan::new(
            "plan",
            vec![Stage::new("up", 1), Stage::new("s", parallelism)],
            vec![
                StageEdge::new("e", "up", "s", DataCommunicationPattern::Shuffle)
                    .with_shuffle_distribution(ShuffleDistribution::new(11, ranges)),
            ],
        )
        .unwrap()
    }

    fn plan_without_ranges(parallelism: usize) -> PhysicalPlan {
        PhysicalPlan::new(
            "plan",
            vec![Stage::new("up", 1), Stage::new("s", parallelism)],
            vec![StageEdge::new("e", "up", "s", DataCommunicationPattern::OneToOne)],
        )
        .unwrap()
    }

    async fn add_executors(policy: &RoundRobinSchedulingPolicy, ids: &[&str], capacity: usize) {
        for id in ids {
            policy
                .on_executor_added(ExecutorRepresenter::new(*id, ContainerType::None, capacity))
                .await
                .unwrap();
        }
    }

    async fn executor_of(registry: &ExecutorRegistry, task_group_id: &str) -> Option<String> {
        for executor_id in registry.running_executor_ids().await {
            if registry
                .running_task_groups_of(&executor_id)
                .await
                .unwrap()
                .contains(task_group_id)
            {
                return Some(executor_id);
            }
        }
        None
    }

    #[tokio::test]
    async fn test_round_robin_cycles_through_all_executors() {
        let (registry, policy) = policy_fixture();
        add_executors(&policy, &["e0", "e1", "e2"], 1).await;

        let plan = plan_without_ranges(6);
        let job_state = JobStateManager::from_plan("job", &plan);
        let task_groups = plan.task_groups_of_stage("s", "job").unwrap();

        // First round: every executor receives exactly one task group.
        let mut first_round = Vec::new();
        for task_group in &task_groups[..3] {
            assert!(policy
                .schedule_task_group(task_group, &job_state)
                .await
                .unwrap());
            first_round.push(
                executor_of(&registry, &task_group.task_group_id)
                    .await
                    .unwrap(),
            );
        }
        let distinct: HashSet<&String> = first_round.iter().collect();
        assert_eq!(distinct.len(), 3);
        // A newly added executor sits at the cursor, so the pool is scanned
        // starting from the most recent registration.
        assert_eq!(first_round[0], "e2");

        // Second round repeats the same deterministic cycle.
        for (task_group, expected) in task_groups[..3].iter().zip(&first_round) {
            policy
                .on_task_group_complete(expected, &task_group.task_group_id)
                .await
                .unwrap();
        }
        for (task_group, expected) in task_groups[3..].iter().zip(&first_round) {
            assert!(policy
                .schedule_task_group(task_group, &job_state)
                .await
                .unwrap());
            assert_eq!(
                &executor_of(&registry, &task_group.task_group_id)
                    .await
                    .unwrap(),
                expected
            );
        }
    }

    #[tokio::test]
    async fn test_saturated_pool_returns_false() {
        let (_registry, policy) = policy_fixture();
        add_executors(&policy, &["e0"], 1).await;

        let plan = plan_without_ranges(2);
        let job_state = JobStateManager::from_plan("job", &plan);
        let task_groups = plan.task_groups_of_stage("s", "job").unwrap();

        assert!(policy
            .schedule_task_group(&task_groups[0], &job_state)
            .await
            .unwrap());
        assert!(!policy
            .schedule_task_group(&task_groups[1], &job_state)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_hot_task_groups_avoid_each_other() {
        let (registry, policy) = policy_fixture();
        add_executors(&policy, &["e0", "e1"], 2).await;

        let plan = plan_with_ranges(
            2,
            vec![HashRange::of(0, 6, true), HashRange::of(6, 11, true)],
        );
        let job_state = JobStateManager::from_plan("job", &plan);
        let task_groups = plan.task_groups_of_stage("s", "job").unwrap();
        assert!(task_groups.iter().all(|tg| tg.is_hot()));

        assert!(policy
            .schedule_task_group(&task_groups[0], &job_state)
            .await
            .unwrap());
        assert!(policy
            .schedule_task_group(&task_groups[1], &job_state)
            .await
            .unwrap());

        let first = executor_of(&registry, "s-0").await.unwrap();
        let second = executor_of(&registry, "s-1").await.unwrap();
        assert_ne!(first, second);
        // Both had free slots, so the second hot task group was steered away
        // purely by the skew bias.
        assert!(registry.has_free_slot(&first).await.unwrap());
    }

    #[tokio::test]
    async fn test_hot_placement_falls_back_to_round_robin() {
        let (registry, policy) = policy_fixture();
        add_executors(&policy, &["e0", "e1"], 2).await;

        let plan = plan_with_ranges(
            3,
            vec![
                HashRange::of(0, 4, true),
                HashRange::of(4, 8, true),
                HashRange::of(8, 11, true),
            ],
        );
        let job_state = JobStateManager::from_plan("job", &plan);
        let task_groups = plan.task_groups_of_stage("s", "job").unwrap();

        for task_group in &task_groups {
            assert!(policy
                .schedule_task_group(task_group, &job_state)
                .await
                .unwrap());
        }
        // Both executors hold a hot task group, so the third fell through to
        // round-robin and shares an executor with one of them.
        let pool_head = executor_of(&registry, "s-0").await.unwrap();
        assert_eq!(executor_of(&registry, "s-2").await.unwrap(), pool_head);
    }

    #[tokio::test]
    async fn test_hot_entry_cleared_on_completion() {
        let (registry, policy) = policy_fixture();
        add_executors(&policy, &["e0"], 2).await;

        let plan = plan_with_ranges(
            2,
            vec![HashRange::of(0, 6, true), HashRange::of(6, 11, true)],
        );
        let job_state = JobStateManager::from_plan("job", &plan);
        let task_groups = plan.task_groups_of_stage("s", "job").unwrap();

        assert!(policy
            .schedule_task_group(&task_groups[0], &job_state)
            .await
            .unwrap());
        policy.on_task_group_complete("e0", "s-0").await.unwrap();

        // The executor is light again, so the next hot task group takes the
        // skew-aware path back onto it.
        assert!(policy
            .schedule_task_group(&task_groups[1], &job_state)
            .await
            .unwrap());
        assert_eq!(executor_of(&registry, "s-1").await.unwrap(), "e0");
    }

    #[tokio::test]
    async fn test_executor_removal_adjusts_cursor_and_returns_running() {
        let (registry, policy) = policy_fixture();
        add_executors(&policy, &["e0", "e1", "e2"], 1).await;

        let plan = plan_without_ranges(3);
        let job_state = JobStateManager::from_plan("job", &plan);
        let task_groups = plan.task_groups_of_stage("s", "job").unwrap();

        // First placement lands on the pool head e2 and moves the cursor to e1.
        assert!(policy
            .schedule_task_group(&task_groups[0], &job_state)
            .await
            .unwrap());
        assert_eq!(executor_of(&registry, "s-0").await.unwrap(), "e2");

        // Removing the executor at the cursor resets it to the pool head.
        let resubmit = policy.on_executor_removed("e1").await.unwrap();
        assert!(resubmit.is_empty());

        // e2 is full, so the scan from the head picks e0.
        assert!(policy
            .schedule_task_group(&task_groups[1], &job_state)
            .await
            .unwrap());
        assert_eq!(executor_of(&registry, "s-1").await.unwrap(), "e0");

        // Removing a loaded executor returns its running task groups.
        let resubmit = policy.on_executor_removed("e2").await.unwrap();
        assert_eq!(resubmit, HashSet::from(["s-0".to_string()]));
        assert_eq!(registry.running_executor_ids().await, vec!["e0"]);
    }

    #[tokio::test]
    async fn test_terminate_completes_running_executors() {
        let (registry, policy) = policy_fixture();
        add_executors(&policy, &["e0", "e1"], 1).await;

        policy.terminate().await.unwrap();
        assert!(registry.running_executor_ids().await.is_empty());
    }
}
