//! One full pipeline run for a change: one execution per quest, created
//! lazily. A failed execution short-circuits the rest of the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::kernel::EngineDeps;
use crate::model::Change;
use crate::quest::{Execution, Quest, ResultArguments};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    change: Change,
    executions: Vec<Execution>,
}

impl Attempt {
    pub fn new(change: Change) -> Self {
        Self {
            change,
            executions: Vec::new(),
        }
    }

    pub fn change(&self) -> &Change {
        &self.change
    }

    pub fn executions(&self) -> &[Execution] {
        &self.executions
    }

    /// Complete iff the last created execution is complete and is either
    /// failed or the final quest. On failure the remaining quests never
    /// start.
    pub fn completed(&self, quest_count: usize) -> bool {
        match self.executions.last() {
            None => false,
            Some(execution) => {
                execution.completed()
                    && (execution.failed() || self.executions.len() == quest_count)
            }
        }
    }

    /// The failed execution's trace, if any execution failed.
    pub fn exception(&self) -> Option<&str> {
        self.executions.iter().find_map(Execution::exception)
    }

    /// Advance this attempt by one step: create the first execution if none
    /// exists yet, otherwise poll the last one and, if it just completed
    /// successfully with quests remaining, create the next execution from
    /// its outputs.
    pub async fn schedule_work(&mut self, quests: &mut [Quest], deps: &EngineDeps) {
        if self.executions.is_empty() {
            let Some(first) = quests.first_mut() else {
                return;
            };
            let execution = first.start(&self.change, &ResultArguments::new());
            self.executions.push(execution);
            return;
        }

        let index = self.executions.len() - 1;
        let execution = &mut self.executions[index];
        execution.poll(&mut quests[index], deps).await;

        if execution.completed() && !execution.failed() && index + 1 < quests.len() {
            let arguments = execution.result_arguments().clone();
            let next = quests[index + 1].start(&self.change, &arguments);
            self.executions.push(next);
        }
    }

    pub fn as_dict(&self) -> serde_json::Value {
        json!({
            "executions": self.executions.iter().map(Execution::as_dict).collect::<Vec<_>>(),
        })
    }
}
