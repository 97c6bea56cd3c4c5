//! @ai:module:intent Run-level counters updated through explicit transitions
//! @ai:module:layer domain
//! @ai:module:public_api RunAggregate, RunTransition, RunProgress
//! @ai:module:stateless false

use serde::Serialize;
use std::collections::HashSet;
use tracing::warn;

/// @ai:intent A change to a run's counters caused by one response
#[derive(Debug, Clone, PartialEq)]
pub enum RunTransition {
    /// Add a response's cost to the run total
    Charge { response_id: String, cost: f64 },
    /// A response reached a terminal state
    ModelFinished { response_id: String },
}

/// @ai:intent Snapshot of run counters after a transition
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProgress {
    pub completed_models: u32,
    pub total_models: u32,
    pub total_cost: f64,
}

/// @ai:intent Counters for one run; each response is charged and finished at most once
#[derive(Debug, Clone, Default)]
pub struct RunAggregate {
    total_models: u32,
    completed_models: u32,
    total_cost: f64,
    charged: HashSet<String>,
    finished: HashSet<String>,
}

impl RunAggregate {
    pub fn new(total_models: u32) -> Self {
        Self {
            total_models,
            ..Self::default()
        }
    }

    /// @ai:intent Apply one transition and return the resulting snapshot
    /// @ai:post completed_models and total_cost never decrease
    /// @ai:effects state:write
    pub fn apply(&mut self, transition: RunTransition) -> RunProgress {
        match transition {
            RunTransition::Charge { response_id, cost } => {
                let cost = if cost.is_finite() && cost >= 0.0 {
                    cost
                } else {
                    warn!("Ignoring invalid cost {} for response {}", cost, response_id);
                    0.0
                };
                if self.charged.insert(response_id) {
                    self.total_cost += cost;
                }
            }
            RunTransition::ModelFinished { response_id } => {
                if self.completed_models < self.total_models && self.finished.insert(response_id) {
                    self.completed_models += 1;
                }
            }
        }

        self.progress()
    }

    pub fn progress(&self) -> RunProgress {
        RunProgress {
            completed_models: self.completed_models,
            total_models: self.total_models,
            total_cost: self.total_cost,
        }
    }

    /// @ai:intent True once every response reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.completed_models >= self.total_models
    }
}
