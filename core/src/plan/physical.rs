//! The physical plan: a DAG of stages connected by stage edges.

use crate::plan::properties::{
    ContainerType, DataCommunicationPattern, PartitionerType, ShuffleDistribution,
};
use crate::plan::task_group::{task_group_id, ScheduledTaskGroup, TaskGroupEdge};
use floe_common::{Result, RuntimeError};
use serde::{Deserialize, Serialize};

/// A maximal group of vertices executed together, one task group per index
/// in `0..parallelism`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub parallelism: usize,
    pub container_type: ContainerType,
    /// Marks a metric-collection barrier: stages fed by this stage stay on
    /// hold until dynamic optimization has ingested the observed sizes.
    pub metric_collection_barrier: bool,
}

impl Stage {
    pub fn new(id: impl Into<String>, parallelism: usize) -> Self {
        Self {
            id: id.into(),
            parallelism,
            container_type: ContainerType::None,
            metric_collection_barrier: false,
        }
    }

    pub fn with_container_type(mut self, container_type: ContainerType) -> Self {
        self.container_type = container_type;
        self
    }

    pub fn as_metric_collection_barrier(mut self) -> Self {
        self.metric_collection_barrier = true;
        self
    }
}

/// A stage boundary with its execution properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEdge {
    pub id: String,
    pub src_stage: String,
    pub dst_stage: String,
    pub pattern: DataCommunicationPattern,
    pub partitioner: PartitionerType,
    pub shuffle_distribution: Option<ShuffleDistribution>,
}

impl StageEdge {
    pub fn new(
        id: impl Into<String>,
        src_stage: impl Into<String>,
        dst_stage: impl Into<String>,
        pattern: DataCommunicationPattern,
    ) -> Self {
        let partitioner = match pattern {
            DataCommunicationPattern::Shuffle => PartitionerType::Hash,
            _ => PartitionerType::Intact,
        };
        Self {
            id: id.into(),
            src_stage: src_stage.into(),
            dst_stage: dst_stage.into(),
            pattern,
            partitioner,
            shuffle_distribution: None,
        }
    }

    pub fn with_partitioner(mut self, partitioner: PartitionerType) -> Self {
        self.partitioner = partitioner;
        self
    }

    pub fn with_shuffle_distribution(mut self, distribution: ShuffleDistribution) -> Self {
        self.shuffle_distribution = Some(distribution);
        self
    }
}

/// The physical plan of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalPlan {
    id: String,
    stages: Vec<Stage>,
    edges: Vec<StageEdge>,
}

impl PhysicalPlan {
    pub fn new(id: impl Into<String>, stages: Vec<Stage>, edges: Vec<StageEdge>) -> Result<Self> {
        let plan = Self {
            id: id.into(),
            stages,
            edges,
        };
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> Result<()> {
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.parallelism == 0 {
                return Err(RuntimeError::plan(format!(
                    "stage {} has zero parallelism",
                    stage.id
                )));
            }
            if self.stages[..i].iter().any(|s| s.id == stage.id) {
                return Err(RuntimeError::plan(format!("duplicate stage id {}", stage.id)));
            }
        }
        for (i, edge) in self.edges.iter().enumerate() {
            if self.edges[..i].iter().any(|e| e.id == edge.id) {
                return Err(RuntimeError::plan(format!("duplicate edge id {}", edge.id)));
            }
            self.stage(&edge.src_stage)?;
            let dst = self.stage(&edge.dst_stage)?;
            if let Some(distribution) = &edge.shuffle_distribution {
                if distribution.dst_parallelism() != dst.parallelism {
                    return Err(RuntimeError::plan(format!(
                        "edge {} has {} key ranges for destination parallelism {}",
                        edge.id,
                        distribution.dst_parallelism(),
                        dst.parallelism
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn edges(&self) -> &[StageEdge] {
        &self.edges
    }

    pub fn stage(&self, stage_id: &str) -> Result<&Stage> {
        self.stages
            .iter()
            .find(|s| s.id == stage_id)
            .ok_or_else(|| RuntimeError::plan(format!("unknown stage {stage_id}")))
    }

    pub fn edge(&self, edge_id: &str) -> Result<&StageEdge> {
        self.edges
            .iter()
            .find(|e| e.id == edge_id)
            .ok_or_else(|| RuntimeError::plan(format!("unknown edge {edge_id}")))
    }

    pub fn incoming_edges_of(&self, stage_id: &str) -> Vec<&StageEdge> {
        self.edges.iter().filter(|e| e.dst_stage == stage_id).collect()
    }

    pub fn outgoing_edges_of(&self, stage_id: &str) -> Vec<&StageEdge> {
        self.edges.iter().filter(|e| e.src_stage == stage_id).collect()
    }

    /// Whether any edge into `stage_id` originates at a metric-collection
    /// barrier stage.
    pub fn fed_by_metric_barrier(&self, stage_id: &str) -> bool {
        self.incoming_edges_of(stage_id).iter().any(|edge| {
            self.stage(&edge.src_stage)
                .map(|s| s.metric_collection_barrier)
                .unwrap_or(false)
        })
    }

    /// Replace the key-range assignment of a shuffle edge. The new
    /// distribution applies to every task group emitted afterwards.
    pub fn update_shuffle_distribution(
        &mut self,
        edge_id: &str,
        distribution: ShuffleDistribution,
    ) -> Result<()> {
        let dst_parallelism = self.stage(&self.edge(edge_id)?.dst_stage)?.parallelism;
        if distribution.dst_parallelism() != dst_parallelism {
            return Err(RuntimeError::plan(format!(
                "distribution with {} ranges does not match destination parallelism {}",
                distribution.dst_parallelism(),
                dst_parallelism
            )));
        }
        let edge = self
            .edges
            .iter_mut()
            .find(|e| e.id == edge_id)
            .ok_or_else(|| RuntimeError::plan(format!("unknown edge {edge_id}")))?;
        if edge.pattern != DataCommunicationPattern::Shuffle {
            return Err(RuntimeError::plan(format!(
                "edge {edge_id} is not a shuffle edge"
            )));
        }
        edge.shuffle_distribution = Some(distribution);
        Ok(())
    }

    /// Emit the task groups of a stage, snapshotting each incoming edge's
    /// current key range for the task group's index.
    pub fn task_groups_of_stage(
        &self,
        stage_id: &str,
        job_id: &str,
    ) -> Result<Vec<ScheduledTaskGroup>> {
        let stage = self.stage(stage_id)?;
        let incoming = self.incoming_edges_of(stage_id);
        let outgoing = self.outgoing_edges_of(stage_id);

        let mut task_groups = Vec::with_capacity(stage.parallelism);
        for idx in 0..stage.parallelism {
            let incoming = incoming
                .iter()
                .map(|edge| {
                    TaskGroupEdge::new(
                        edge.id.clone(),
                        edge.pattern,
                        edge.shuffle_distribution
                            .as_ref()
                            .and_then(|d| d.range_for(idx)),
                    )
                })
                .collect();
            let outgoing = outgoing
                .iter()
                .map(|edge| TaskGroupEdge::new(edge.id.clone(), edge.pattern, None))
                .collect();
            task_groups.push(ScheduledTaskGroup {
                task_group_id: task_group_id(stage_id, idx),
                job_id: job_id.to_string(),
                stage_id: stage_id.to_string(),
                idx,
                container_type: stage.container_type,
                incoming,
                outgoing,
                small_hint: false,
            });
        }
        Ok(task_groups)
    }
}
