//! `fieldbot-memory` – what the rover remembers about its sessions.
//!
//! # Modules
//!
//! - [`run_history`] – [`RunHistory`][run_history::RunHistory]: the
//!   process-lifetime list of completed runs, and the
//!   [`RunLogSink`][run_history::RunLogSink] trait the autonomous loop
//!   appends through.
//! - [`query`] – [`RunQuery`][query::RunQuery]: turns questions such as
//!   "did we see a pest last run" into a scoped label search.

pub mod query;
pub mod run_history;

pub use query::{QueryAnswer, QueryScope, RunQuery};
pub use run_history::{RunHistory, RunLogSink};
