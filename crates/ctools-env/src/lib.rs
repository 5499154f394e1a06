//! # ctools-env
//!
//! Read-only model of installed environments: the per-package records under
//! `conda-meta/`, how each package was linked from the cache, and the
//! environment's revision history.
//!
//! ## Directory Layout
//!
//! ```text
//! envs/py35/
//! ├── conda-meta/
//! │   ├── numpy-1.11.0-py35_0.json   # PackageMeta, with link {type, source}
//! │   ├── python-3.5.1-0.json
//! │   └── history                    # append-only revision log (History)
//! ├── bin/
//! └── lib/
//! ```
//!
//! An [`Environment`] is a snapshot taken when it is opened. Reflecting later
//! changes on disk means opening a new one.

pub mod environment;
pub mod history;
pub mod link;
pub mod meta;

pub use environment::{active_environment, environments, is_environment, named_environments, Environment, META_DIR};
pub use history::{Dist, History, HistoryError, HistoryEvent, Revision, State, UserRequest};
pub use link::LinkType;
pub use meta::{LinkInfo, PackageMeta};

use std::io;
use std::path::PathBuf;

use ctools_cache::CacheError;
use thiserror::Error;

/// Errors raised by the environment model
#[derive(Error, Debug)]
pub enum EnvError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Unable to load environment {0:?}")]
    InvalidEnvironment(PathBuf),

    #[error("No environment seems to be currently active")]
    NoActiveEnvironment,

    #[error("JSON error in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    History(#[from] HistoryError),
}

pub type Result<T> = std::result::Result<T, EnvError>;
