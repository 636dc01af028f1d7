//! The internal state of a job: quests, changes, attempts, and the
//! bisection policy.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::attempt::Attempt;
use crate::kernel::EngineDeps;
use crate::model::{Change, NonLinearError};
use crate::quest::Quest;
use crate::stats::{compare_samples, SampleComparison};

pub const DEFAULT_REPEAT_COUNT: usize = 15;

/// The outcome of comparing two adjacent changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Different,
    Pending,
    Same,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    /// The quest pipeline, fixed at construction. Attempts reference quests
    /// by index, so the list never grows or reorders afterwards.
    quests: Vec<Quest>,
    /// Changes in bisection order. Explore inserts only at interior
    /// positions; clients must not assume any particular commit ordering.
    changes: Vec<Change>,
    /// Attempts per change, parallel to `changes`.
    attempts: Vec<Vec<Attempt>>,
    repeat_count: usize,
}

impl JobState {
    pub fn new(quests: Vec<Quest>, repeat_count: usize) -> Self {
        Self {
            quests,
            changes: Vec::new(),
            attempts: Vec::new(),
            repeat_count,
        }
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn quests(&self) -> &[Quest] {
        &self.quests
    }

    pub fn repeat_count(&self) -> usize {
        self.repeat_count
    }

    pub fn attempts_for(&self, index: usize) -> &[Attempt] {
        &self.attempts[index]
    }

    /// Add a change at `index` (or append) and allocate its attempts.
    pub fn add_change(&mut self, change: Change, index: Option<usize>) {
        let index = index.unwrap_or(self.changes.len());
        let attempts = (0..self.repeat_count)
            .map(|_| Attempt::new(change.clone()))
            .collect();
        self.changes.insert(index, change);
        self.attempts.insert(index, attempts);
    }

    /// Poll every non-completed attempt exactly once. Returns true iff any
    /// work remains.
    pub async fn schedule_work(&mut self, deps: &EngineDeps) -> bool {
        let quest_count = self.quests.len();
        let mut work_left = false;
        for attempts in self.attempts.iter_mut() {
            for attempt in attempts.iter_mut() {
                if attempt.completed(quest_count) {
                    continue;
                }
                attempt.schedule_work(&mut self.quests, deps).await;
                work_left = true;
            }
        }
        work_left
    }

    /// Compare adjacent changes and bisect by inserting midpoints where the
    /// results differ. Pairs whose midpoint is not computable are terminal
    /// and skipped.
    pub async fn explore(&mut self, deps: &EngineDeps) -> Result<()> {
        // Insertions happen at the pair's own index, so visiting pairs in
        // reverse keeps still-to-visit indices stable.
        for index in self.difference_indices().into_iter().rev() {
            let change_a = &self.changes[index - 1];
            let change_b = &self.changes[index];

            let midpoint =
                match Change::midpoint(change_a, change_b, &*deps.revisions, &deps.repositories)
                    .await
                {
                    Ok(midpoint) => midpoint,
                    Err(err) if err.downcast_ref::<NonLinearError>().is_some() => continue,
                    Err(err) => return Err(err),
                };

            info!(change = %midpoint, index, "adding midpoint change");
            self.add_change(midpoint, Some(index));
        }
        Ok(())
    }

    /// Every adjacent pair with statistically different results, as
    /// `(index, later change)`; the later change is the one assumed to
    /// have caused the difference.
    pub fn differences(&self) -> Vec<(usize, &Change)> {
        self.difference_indices()
            .into_iter()
            .map(|index| (index, &self.changes[index]))
            .collect()
    }

    fn difference_indices(&self) -> Vec<usize> {
        (1..self.changes.len())
            .filter(|&index| self.compare(index - 1, index) == Comparison::Different)
            .collect()
    }

    /// Compare the changes at two indices.
    ///
    /// Exception-rate divergence is checked before values and is itself a
    /// significant signal: a build or test failing on one side only is a
    /// real regression, and must not be masked just because that side
    /// produced no measurements.
    pub fn compare(&self, index_a: usize, index_b: usize) -> Comparison {
        let attempts_a = &self.attempts[index_a];
        let attempts_b = &self.attempts[index_b];

        let quest_count = self.quests.len();
        if attempts_a
            .iter()
            .chain(attempts_b.iter())
            .any(|attempt| !attempt.completed(quest_count))
        {
            return Comparison::Pending;
        }

        let exceptions_a = exception_flags(attempts_a);
        let exceptions_b = exception_flags(attempts_b);
        if compare_samples(&exceptions_a, &exceptions_b) == SampleComparison::Different {
            return Comparison::Different;
        }

        let results_a = self.combined_results(attempts_a);
        let results_b = self.combined_results(attempts_b);
        for quest_index in 0..quest_count {
            if compare_samples(&results_a[quest_index], &results_b[quest_index])
                == SampleComparison::Different
            {
                return Comparison::Different;
            }
        }

        // "Same" only means we failed to find a difference with the full
        // sample budget; it is never decided early.
        if attempts_a.len() >= self.repeat_count && attempts_b.len() >= self.repeat_count {
            return Comparison::Same;
        }
        Comparison::Unknown
    }

    /// Concatenate result values per quest across completed attempts.
    fn combined_results(&self, attempts: &[Attempt]) -> Vec<Vec<f64>> {
        let quest_count = self.quests.len();
        let mut combined = vec![Vec::new(); quest_count];
        for attempt in attempts {
            if !attempt.completed(quest_count) {
                continue;
            }
            for (quest_index, execution) in attempt.executions().iter().enumerate() {
                combined[quest_index].extend_from_slice(execution.result_values());
            }
        }
        combined
    }

    pub fn as_dict(&self) -> serde_json::Value {
        let comparisons: Vec<Comparison> = (1..self.changes.len())
            .map(|index| self.compare(index - 1, index))
            .collect();

        // result_values[change][quest] lists every value for that pair.
        let result_values: Vec<Vec<Vec<f64>>> = self
            .attempts
            .iter()
            .map(|attempts| self.combined_results(attempts))
            .collect();

        let attempts: Vec<Vec<serde_json::Value>> = self
            .attempts
            .iter()
            .map(|attempts| attempts.iter().map(Attempt::as_dict).collect())
            .collect();

        json!({
            "quests": self.quests.iter().map(Quest::name).collect::<Vec<_>>(),
            "changes": self.changes.iter().map(Change::as_dict).collect::<Vec<_>>(),
            "comparisons": comparisons,
            "result_values": result_values,
            "attempts": attempts,
        })
    }
}

fn exception_flags(attempts: &[Attempt]) -> Vec<f64> {
    attempts
        .iter()
        .map(|attempt| if attempt.exception().is_some() { 1.0 } else { 0.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Commit;
    use crate::quest::FindIsolate;

    fn change(hash: &str) -> Change {
        Change::new(vec![Commit::new("chromium", hash)], None).unwrap()
    }

    fn state() -> JobState {
        JobState::new(
            vec![Quest::FindIsolate(FindIsolate::new("Mac Builder", "perf_tests"))],
            DEFAULT_REPEAT_COUNT,
        )
    }

    #[test]
    fn add_change_allocates_repeat_count_attempts() {
        let mut state = state();
        state.add_change(change("aaa"), None);
        assert_eq!(state.attempts_for(0).len(), DEFAULT_REPEAT_COUNT);
    }

    #[test]
    fn add_change_inserts_at_interior_index() {
        let mut state = state();
        state.add_change(change("aaa"), None);
        state.add_change(change("ccc"), None);
        state.add_change(change("bbb"), Some(1));
        let hashes: Vec<&str> = state
            .changes()
            .iter()
            .map(|c| c.last_commit().git_hash.as_str())
            .collect();
        assert_eq!(hashes, vec!["aaa", "bbb", "ccc"]);
        assert_eq!(state.attempts_for(1)[0].change(), &state.changes()[1]);
    }

    #[test]
    fn compare_is_pending_until_attempts_complete() {
        let mut state = state();
        state.add_change(change("aaa"), None);
        state.add_change(change("bbb"), None);
        assert_eq!(state.compare(0, 1), Comparison::Pending);
    }
}
