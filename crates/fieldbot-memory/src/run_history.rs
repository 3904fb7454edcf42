//! Process-lifetime run log.
//!
//! Every finished autonomous session is appended as one [`Run`].  Nothing is
//! written to disk; the history lives as long as the process.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use fieldbot_memory::run_history::{RunHistory, RunLogSink};
//! use fieldbot_types::{Run, RunLogEntry};
//!
//! let history = RunHistory::new();
//! let entry = RunLogEntry {
//!     timestamp: Utc::now(),
//!     label: "pest".into(),
//!     horizontal_angle: 40,
//!     vertical_angle: 0,
//!     distance_mm: Some(220.0),
//! };
//! history.append(Run::new(Utc::now(), vec![entry]));
//!
//! assert!(history.answer("did we see a pest last run").starts_with("Yes"));
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fieldbot_types::Run;
use tracing::info;

use crate::query::{QueryScope, RunQuery};

/// Destination for completed runs.
pub trait RunLogSink: Send + Sync {
    fn append(&self, run: Run);
}

/// In-memory list of runs, oldest first.  Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct RunHistory {
    runs: Arc<Mutex<Vec<Run>>>,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Run>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of every run.
    pub fn runs(&self) -> Vec<Run> {
        self.lock().clone()
    }

    pub fn last(&self) -> Option<Run> {
        self.lock().last().cloned()
    }

    /// Answer a plain-language question about what the rover saw.
    pub fn answer(&self, question: &str) -> String {
        let query = RunQuery::parse(question);
        let runs = self.lock();
        let scoped: &[Run] = match query.scope {
            QueryScope::LastRun => &runs[runs.len().saturating_sub(1)..],
            QueryScope::AllRuns => &runs,
        };
        query.answer(scoped).to_string()
    }
}

impl RunLogSink for RunHistory {
    fn append(&self, run: Run) {
        info!(run = %run.id, entries = run.entries.len(), "run recorded");
        self.lock().push(run);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fieldbot_types::RunLogEntry;

    fn run(labels: &[&str]) -> Run {
        let entries = labels
            .iter()
            .enumerate()
            .map(|(i, label)| RunLogEntry {
                timestamp: Utc::now(),
                label: (*label).to_string(),
                horizontal_angle: (i * 5) as u8,
                vertical_angle: 0,
                distance_mm: Some(500.0),
            })
            .collect();
        Run::new(Utc::now(), entries)
    }

    #[test]
    fn clones_share_history() {
        let history = RunHistory::new();
        let sink: Box<dyn RunLogSink> = Box::new(history.clone());
        sink.append(run(&["tree"]));
        sink.append(run(&["rock"]));
        assert_eq!(history.len(), 2);
        assert_eq!(history.last().unwrap().entries[0].label, "rock");
    }

    #[test]
    fn last_run_scope_ignores_earlier_runs() {
        let history = RunHistory::new();
        history.append(run(&["Pest", "tree"]));
        history.append(run(&["tree", "rock"]));

        assert!(history.answer("did we see a pest last run?").starts_with("No"));
        assert!(history.answer("did we ever see a pest?").starts_with("Yes"));
    }

    #[test]
    fn empty_history() {
        let history = RunHistory::new();
        assert_eq!(history.answer("did we see a pest last run"), "No runs recorded yet.");
    }
}
