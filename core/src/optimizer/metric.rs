//! Metric aggregation at a metric-collection barrier.

use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct BarrierInner<K> {
    aggregated: HashMap<K, u64>,
    reported: usize,
}

/// Accumulates the observed key-to-size maps of a barrier stage's producer
/// tasks for one shuffle edge. When every producer has reported, the
/// aggregate is handed to dynamic optimization.
pub struct MetricCollectionBarrier<K> {
    edge_id: String,
    expected_producers: usize,
    inner: Mutex<BarrierInner<K>>,
}

impl<K> MetricCollectionBarrier<K>
where
    K: Clone + Eq + Hash + Send,
{
    pub fn new(edge_id: impl Into<String>, expected_producers: usize) -> Self {
        Self {
            edge_id: edge_id.into(),
            expected_producers,
            inner: Mutex::new(BarrierInner {
                aggregated: HashMap::new(),
                reported: 0,
            }),
        }
    }

    pub fn edge_id(&self) -> &str {
        &self.edge_id
    }

    /// Merge one producer's key-to-size map. Returns `true` once all
    /// expected producers have reported.
    pub async fn add_metric(&self, key_to_size: HashMap<K, u64>) -> bool {
        let mut inner = self.inner.lock().await;
        for (key, size) in key_to_size {
            *inner.aggregated.entry(key).or_insert(0) += size;
        }
        inner.reported += 1;
        if inner.reported > self.expected_producers {
            warn!(
                edge_id = %self.edge_id,
                reported = inner.reported,
                expected = self.expected_producers,
                "metric barrier received more reports than producers"
            );
        }
        debug!(
            edge_id = %self.edge_id,
            reported = inner.reported,
            expected = self.expected_producers,
            "collected metric report"
        );
        inner.reported >= self.expected_producers
    }

    /// The aggregate collected so far.
    pub async fn aggregated(&self) -> HashMap<K, u64> {
        self.inner.lock().await.aggregated.clone()
    }
}
