//! # ctools-audit
//!
//! Checks that run across a package cache and the environments linked from it:
//!
//! - which cache packages no environment uses ([`unlinked_packages`])
//! - whether hard-linked files really share an inode with the cache
//!   ([`check_hardlinked_pkg`], [`check_hardlinked_env`])
//! - whether extracted packages still match their archives ([`verify_hashes`])
//! - ownership and dependency questions about one environment ([`owns`],
//!   [`dependency_graph`], [`orphaned`], [`explicitly_installed`])
//!
//! Verification results are data: a mismatch is a `false` or a list of paths,
//! never an error. Errors are reserved for failing to read what was asked for.

pub mod correlate;
pub mod graph;
pub mod links;
pub mod verify;

pub use correlate::{linked_environments, unlinked_packages};
pub use graph::{dependency_graph, explicitly_installed, orphaned, owns};
pub use links::{check_hardlinked_env, check_hardlinked_pkg, is_hardlinked};
pub use verify::{verify_hashes, verify_package, Mismatch};

use std::io;

use ctools_cache::CacheError;
use ctools_env::{EnvError, HistoryError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    History(#[from] HistoryError),
}

pub type Result<T> = std::result::Result<T, AuditError>;
