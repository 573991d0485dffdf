//! FIFO of task groups awaiting placement.

use crate::plan::ScheduledTaskGroup;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::debug;

/// Non-blocking FIFO queue of task groups. Waiting for work is the scheduler
/// runner's job, via its signal-queuing condition.
pub struct PendingTaskGroupQueue {
    queue: Mutex<VecDeque<ScheduledTaskGroup>>,
}

impl PendingTaskGroupQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn enqueue(&self, task_group: ScheduledTaskGroup) {
        let mut queue = self.queue.lock().await;
        queue.push_back(task_group);
        debug!(queue_len = queue.len(), "enqueued task group");
    }

    /// The head of the queue, or `None` when empty.
    pub async fn dequeue(&self) -> Option<ScheduledTaskGroup> {
        self.queue.lock().await.pop_front()
    }

    /// The id of the head task group without removing it.
    pub async fn peek(&self) -> Option<String> {
        self.queue
            .lock()
            .await
            .front()
            .map(|tg| tg.task_group_id.clone())
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }
}

impl Default for PendingTaskGroupQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{task_group_id, ContainerType};

    fn task_group(idx: usize) -> ScheduledTaskGroup {
        ScheduledTaskGroup {
            task_group_id: task_group_id("stage", idx),
            job_id: "job".to_string(),
            stage_id: "stage".to_string(),
            idx,
            container_type: ContainerType::None,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            small_hint: false,
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = PendingTaskGroupQueue::new();
        assert!(queue.dequeue().await.is_none());
        assert!(queue.peek().await.is_none());

        for idx in 0..3 {
            queue.enqueue(task_group(idx)).await;
        }
        assert_eq!(queue.len().await, 3);
        assert_eq!(queue.peek().await.as_deref(), Some("stage-0"));

        for idx in 0..3 {
            assert_eq!(
                queue.dequeue().await.unwrap().task_group_id,
                task_group_id("stage", idx)
            );
        }
        assert!(queue.is_empty().await);
    }
}
