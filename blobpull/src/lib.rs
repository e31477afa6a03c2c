//! A simple crate pulling remote blobs.
//!
//! A robust and efficient crate dedicated to:
//! - fetching remote binary assets ("blobs") over HTTP(S) and optionally extracting them,
//! - avoiding redundant network and disk work across runs, thanks to a history of prior outcomes,
//! - cleaning up stale artifacts left by prior runs,
//! - running transfers in isolated workers, with bounded concurrency and an optional fail-fast policy.
//!
//! Each run goes through the following steps:
//!
//! ```text
//!     requested blobs
//!       L reconciler (history + destination + fingerprint) -> verdicts
//!         L skipped verdicts ----------------------------------------+
//!         L verdicts to fetch                                        |
//!           L size probes (all at once)                              |
//!           L fetch workers (bounded, in order) -> results         |
//!             L history rewrite <------------------------------------+
//! ```
//!
//! As a **strong hypothesis**, we can assume that:
//! - no two runs target the same destinations at the same time;
//! - within a run, no two blobs resolve to the same destination file.
//!
//! Based on this assumption, each fetch worker exclusively owns its destination file and no lock is ever taken on
//! the filesystem. Workers share nothing with the orchestrator but an ordered message channel, and the only state
//! shared between the orchestrator's per-item handlers is a batch-wide error latch.
//!
//! The history is a single JSON file mapping each blob fingerprint to its last known outcome:
//!
//! ```text
//!     {
//!       "{fingerprint}": {
//!         "url": "https://example.com/model.zip",
//!         "dest": "./models",
//!         "blobOptionsDigest": "{fingerprint}",
//!         "decompression": { "optionsDigest": "{digest}", "filesList": ["model.bin"] }
//!       }
//!     }
//! ```
//!
//! A missing or corrupt history only costs a redundant download, it is never fatal.

mod data;
pub use data::*;

mod error;
pub use error::Error;

pub mod archive;
pub mod batch;
pub mod config;
pub mod download;
pub mod engine;
pub mod progress;
pub mod reconcile;

pub use config::Config;
pub use engine::{Engine, Outcome, Report};
