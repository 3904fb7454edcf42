//! Plain-language questions over recorded runs.
//!
//! A question is reduced to a scope ("last run" or every run) and a set of
//! search terms; an entry matches when its label contains any term,
//! case-insensitively.

use std::fmt;

use fieldbot_types::{Run, RunLogEntry};

/// Words that carry no search meaning in questions like
/// "did we see any pests during the last run?".
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "any", "anything", "are", "at", "did", "do", "during", "ever", "find", "found",
    "have", "in", "is", "last", "latest", "notice", "noticed", "of", "on", "or", "run", "runs", "saw",
    "see", "seen", "spot", "spotted", "the", "there", "this", "time", "was", "we", "were", "what",
    "when", "you",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryScope {
    LastRun,
    AllRuns,
}

/// A parsed question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunQuery {
    pub scope: QueryScope,
    /// Lower-case search terms.
    pub terms: Vec<String>,
}

impl RunQuery {
    pub fn parse(question: &str) -> Self {
        let lower = question.to_lowercase();
        let scope = if lower.contains("last run") || lower.contains("latest run") {
            QueryScope::LastRun
        } else {
            QueryScope::AllRuns
        };
        let terms = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
            .map(|w| singular(w).to_string())
            .collect();
        Self { scope, terms }
    }

    fn matches(&self, entry: &RunLogEntry) -> bool {
        let label = entry.label.to_lowercase();
        self.terms.iter().any(|t| label.contains(t.as_str()))
    }

    /// Search `runs` (already narrowed to the query's scope).
    pub fn answer<'a>(&'a self, runs: &'a [Run]) -> QueryAnswer<'a> {
        if runs.is_empty() {
            return QueryAnswer::NoRuns;
        }
        if self.terms.is_empty() {
            return QueryAnswer::NothingToSearch;
        }
        let hits: Vec<&RunLogEntry> = runs
            .iter()
            .flat_map(|r| r.entries.iter())
            .filter(|e| self.matches(e))
            .collect();
        QueryAnswer::Searched { query: self, hits }
    }
}

/// Strip a plural `s` so "pests" finds "pest".
fn singular(word: &str) -> &str {
    match word.strip_suffix('s') {
        Some(stem) if stem.len() > 2 && !stem.ends_with('s') => stem,
        _ => word,
    }
}

/// Result of a [`RunQuery`], rendered with `Display`.
#[derive(Debug)]
pub enum QueryAnswer<'a> {
    NoRuns,
    NothingToSearch,
    Searched {
        query: &'a RunQuery,
        hits: Vec<&'a RunLogEntry>,
    },
}

impl fmt::Display for QueryAnswer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryAnswer::NoRuns => f.write_str("No runs recorded yet."),
            QueryAnswer::NothingToSearch => {
                f.write_str("Ask about something the rover saw, e.g. \"did we see a pest last run\".")
            }
            QueryAnswer::Searched { query, hits } => {
                let what = query.terms.join(" or ");
                let scope = match query.scope {
                    QueryScope::LastRun => "the last run",
                    QueryScope::AllRuns => "any run",
                };
                match hits.first() {
                    None => write!(f, "No, no {what} was seen in {scope}."),
                    Some(first) => {
                        write!(
                            f,
                            "Yes, {what} was seen {} time(s) in {scope}; first at {} (pan {}°",
                            hits.len(),
                            first.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                            first.horizontal_angle
                        )?;
                        if let Some(mm) = first.distance_mm {
                            write!(f, ", {mm:.0} mm")?;
                        }
                        f.write_str(").")
                    }
                }
            }
        }
    }
}
