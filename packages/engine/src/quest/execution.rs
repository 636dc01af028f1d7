//! The execution lifecycle shared by every quest.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::kernel::EngineDeps;
use crate::quest::find_isolate::FindIsolateRun;
use crate::quest::read_value::{ReadChartJsonRun, ReadGraphJsonRun};
use crate::quest::run_test::RunTestRun;
use crate::quest::{Quest, ResultArguments};

/// What one poll step produced.
pub(crate) enum StepResult {
    /// No state change worth recording; poll again next tick.
    Pending,
    Complete {
        values: Vec<f64>,
        arguments: ResultArguments,
    },
}

/// Per-quest execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionKind {
    FindIsolate(FindIsolateRun),
    RunTest(RunTestRun),
    ReadChartJson(ReadChartJsonRun),
    ReadGraphJson(ReadGraphJsonRun),
}

/// The runtime instance of a quest for one change.
///
/// State machine: created → running → completed (ok or failed). All
/// transitions happen inside [`Execution::poll`]; once completed, nothing
/// mutates and further polls are no-ops. Everything here is serialized with
/// the job, including remote ids recorded mid-flight, so a re-delivered
/// tick resumes instead of re-dispatching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    completed: bool,
    failed: bool,
    exception: Option<String>,
    result_values: Vec<f64>,
    result_arguments: ResultArguments,
    kind: ExecutionKind,
}

impl Execution {
    pub(crate) fn new(kind: ExecutionKind) -> Self {
        Self {
            completed: false,
            failed: false,
            exception: None,
            result_values: Vec::new(),
            result_arguments: ResultArguments::new(),
            kind,
        }
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    /// The captured failure trace, if this execution failed.
    pub fn exception(&self) -> Option<&str> {
        self.exception.as_deref()
    }

    pub fn result_values(&self) -> &[f64] {
        &self.result_values
    }

    pub fn result_arguments(&self) -> &ResultArguments {
        &self.result_arguments
    }

    /// Perform one step of progress: at most one external call. Errors are
    /// captured as the execution's failure trace, never propagated; a
    /// failed measurement must not take the job down with it.
    pub async fn poll(&mut self, quest: &mut Quest, deps: &EngineDeps) {
        if self.completed {
            return;
        }

        let outcome = match (&mut self.kind, quest) {
            (ExecutionKind::FindIsolate(run), Quest::FindIsolate(quest)) => {
                run.poll(quest, deps).await
            }
            (ExecutionKind::RunTest(run), Quest::RunTest(quest)) => run.poll(quest, deps).await,
            (ExecutionKind::ReadChartJson(run), Quest::ReadChartJson(_)) => run.poll(deps).await,
            (ExecutionKind::ReadGraphJson(run), Quest::ReadGraphJson(_)) => run.poll(deps).await,
            _ => Err(anyhow::anyhow!("execution does not match its quest")),
        };

        match outcome {
            Ok(StepResult::Pending) => {}
            Ok(StepResult::Complete { values, arguments }) => {
                self.completed = true;
                self.result_values = values;
                self.result_arguments = arguments;
            }
            Err(err) => {
                tracing::debug!(error = %err, "execution failed");
                self.completed = true;
                self.failed = true;
                self.exception = Some(format!("{err:#}"));
            }
        }
    }

    /// Human-readable projection for status endpoints.
    pub fn as_dict(&self) -> serde_json::Value {
        json!({
            "completed": self.completed,
            "exception": self.exception,
            "details": self.kind.details(),
            "result_arguments": self.result_arguments,
            "result_values": self.result_values,
        })
    }
}

impl ExecutionKind {
    fn details(&self) -> serde_json::Value {
        match self {
            ExecutionKind::FindIsolate(run) => run.details(),
            ExecutionKind::RunTest(run) => run.details(),
            ExecutionKind::ReadChartJson(run) => run.details(),
            ExecutionKind::ReadGraphJson(_) => json!({}),
        }
    }
}
