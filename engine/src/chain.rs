// Completion chaining.
//
// Dependency edges are validated acyclic when they are created, so
// propagation never has to detect cycles: its cost is proportional to the
// completed job's fan-out only.

use crate::coordinator::ExecutionCoordinator;
use crate::errors::{EngineError, StoreError};
use crate::models::{RunStatus, TriggerSource};
use crate::store::JobStore;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Whether dependents fire after every completed run or only after
/// successful ones.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChainPolicy {
    #[default]
    Always,
    SuccessOnly,
}

/// Propagates completion events to dependent jobs and guards the
/// dependents graph against cycles at edge-creation time.
pub struct ChainResolver {
    store: Arc<dyn JobStore>,
    policy: ChainPolicy,
}

impl ChainResolver {
    pub fn new(store: Arc<dyn JobStore>, policy: ChainPolicy) -> Self {
        Self { store, policy }
    }

    /// Check that adding `from -> to` keeps the dependents graph acyclic.
    ///
    /// Rejects self-edges and any edge whose target already transitively
    /// depends back on `from`. The graph is left untouched either way.
    pub async fn validate_edge(&self, from: Uuid, to: Uuid) -> Result<(), EngineError> {
        if from == to {
            return Err(EngineError::CycleRejected { from, to });
        }
        if self.store.get_job(from).await?.is_none() {
            return Err(EngineError::NotFound(from));
        }
        if self.store.get_job(to).await?.is_none() {
            return Err(EngineError::NotFound(to));
        }

        // BFS over dependents starting at `to`; reaching `from` means the
        // new edge would close a cycle.
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut queue: VecDeque<Uuid> = VecDeque::from([to]);
        while let Some(node) = queue.pop_front() {
            if node == from {
                return Err(EngineError::CycleRejected { from, to });
            }
            if !visited.insert(node) {
                continue;
            }
            match self.store.dependents_of(node).await {
                Ok(dependents) => queue.extend(dependents),
                // A dangling edge to a removed job has no outgoing edges.
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Validate and persist a dependency edge.
    pub async fn add_dependency(&self, from: Uuid, to: Uuid) -> Result<(), EngineError> {
        self.validate_edge(from, to).await?;
        self.store.add_dependent(from, to).await?;
        debug!(from = %from, to = %to, "Dependency edge added");
        Ok(())
    }

    /// Fire the completed job's dependents. Called exactly once per run by
    /// the coordinator, whatever the run's outcome; the policy decides
    /// whether failed runs still propagate.
    pub async fn on_complete(
        &self,
        coordinator: &ExecutionCoordinator,
        job_id: Uuid,
        outcome: RunStatus,
    ) {
        if self.policy == ChainPolicy::SuccessOnly && outcome != RunStatus::Success {
            debug!(job_id = %job_id, "Skipping chain propagation for unsuccessful run");
            return;
        }

        let dependents = match self.store.dependents_of(job_id).await {
            Ok(dependents) => dependents,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to read dependents");
                return;
            }
        };

        for dependent in dependents {
            let execution = coordinator.execute(
                dependent,
                TriggerSource::Completion { parent_id: job_id },
            );
            tokio::spawn(async move {
                if let Err(e) = execution.await {
                    warn!(
                        job_id = %dependent,
                        parent_id = %job_id,
                        error = %e,
                        "Chained execution was not started"
                    );
                }
            });
        }
    }
}
