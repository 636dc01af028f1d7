//! Pipeline stages and their runtime instances.
//!
//! A quest is an immutable description of one pipeline stage; an execution
//! is the runtime instance of a quest for a specific change. Quests form a
//! closed sum: the engine knows every stage it can run, and dispatch is a
//! match, not a vtable.

pub mod execution;
pub mod find_isolate;
pub mod read_value;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::args::{ArgumentError, JobArguments};
use crate::model::Change;
pub use execution::Execution;
pub use find_isolate::FindIsolate;
pub use read_value::{ReadChartJson, ReadGraphJson};
pub use run_test::RunTest;

/// Outputs threaded from one completed stage into the next.
pub type ResultArguments = BTreeMap<String, String>;

/// Targets whose results are read from telemetry chart JSON; everything
/// else is assumed to produce graph JSON.
const TELEMETRY_TARGETS: [&str; 2] = ["telemetry_perf_tests", "telemetry_perf_webview_tests"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Quest {
    FindIsolate(FindIsolate),
    RunTest(RunTest),
    ReadChartJson(ReadChartJson),
    ReadGraphJson(ReadGraphJson),
}

impl Quest {
    /// Short human label, used in state projections.
    pub fn name(&self) -> &'static str {
        match self {
            Quest::FindIsolate(_) => "Build",
            Quest::RunTest(_) => "Test",
            Quest::ReadChartJson(_) | Quest::ReadGraphJson(_) => "Values",
        }
    }

    /// Create an execution of this quest for `change`. Synchronous; no
    /// external calls. `arguments` are the previous stage's outputs.
    pub fn start(&mut self, change: &Change, arguments: &ResultArguments) -> Execution {
        use execution::ExecutionKind;
        let kind = match self {
            Quest::FindIsolate(quest) => ExecutionKind::FindIsolate(quest.start(change)),
            Quest::RunTest(quest) => ExecutionKind::RunTest(quest.start(change, arguments)),
            Quest::ReadChartJson(quest) => ExecutionKind::ReadChartJson(quest.start(arguments)),
            Quest::ReadGraphJson(quest) => ExecutionKind::ReadGraphJson(quest.start(arguments)),
        };
        Execution::new(kind)
    }
}

/// Build the quest pipeline for a job from its arguments.
///
/// The target decides the value-reading stage. Each stage may decide it
/// does not apply (e.g. no `dimensions` means a build-only job), which
/// truncates the pipeline there; a present-but-malformed stage
/// configuration is a validation error.
pub fn generate_quests(arguments: &JobArguments) -> Result<Vec<Quest>, ArgumentError> {
    let target = arguments
        .target
        .as_deref()
        .ok_or(ArgumentError::Missing("target"))?;
    let telemetry = TELEMETRY_TARGETS.contains(&target);

    let mut quests = Vec::new();
    match FindIsolate::from_args(arguments)? {
        Some(quest) => quests.push(Quest::FindIsolate(quest)),
        None => return Ok(quests),
    }
    match RunTest::from_args(arguments)? {
        Some(quest) => quests.push(Quest::RunTest(quest)),
        None => return Ok(quests),
    }
    if telemetry {
        if let Some(quest) = ReadChartJson::from_args(arguments)? {
            quests.push(Quest::ReadChartJson(quest));
        }
    } else if let Some(quest) = ReadGraphJson::from_args(arguments)? {
        quests.push(Quest::ReadGraphJson(quest));
    }
    Ok(quests)
}
