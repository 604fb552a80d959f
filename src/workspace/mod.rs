//! Repository indexing into agent archival memory.
//!
//! A repository is turned into passages in three steps:
//! - collect included files (`scanner`, `submodule`)
//! - split each file into bounded, header-prefixed chunks (`chunker`)
//! - plan and execute uploads and stale-passage cleanup (`plan`, `executor`)
//!
//! [`RepoSync`] drives those steps against the state store and git.

mod chunker;
mod executor;
mod plan;
mod reconcile;
mod scanner;
mod submodule;
mod sync;
mod upload;

// Re-exports
pub use chunker::DEFAULT_MAX_CHUNK_CHARS;
pub use executor::LogProgress;
#[cfg(test)]
pub use executor::NoOpProgress;
pub use plan::DEFAULT_FULL_REINDEX_THRESHOLD;
pub use reconcile::{compute_reconcile_plan, fix_reconcile_drift, strip_missing_in_store};
pub use scanner::{collect_files, is_included, logical_from_absolute};
pub use submodule::collect_with_submodules;
pub use sync::{PollOutcome, RepoSync, SyncOptions, SyncReport};
pub use upload::DEFAULT_CONCURRENCY;
