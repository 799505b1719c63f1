//! Error taxonomy for the simulation engine
//!
//! Format/Io/Allocation/Config failures are fatal to a run; `Abort` is raised
//! by the driver when a stage reports an unrecoverable physical state

use thiserror::Error;

/// Crate-wide result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Trajectory file header or record does not match this format
    #[error("format error: {0}")]
    Format(String),

    /// File open/read/write/seek failure
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A particle buffer could not be reserved
    #[error("allocation failure: {0}")]
    Allocation(String),

    /// Unknown stage, bad option string, bad run configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A stage requested ABORT; the in-flight slice was discarded
    #[error("aborted by stage(s): {0}")]
    Abort(String),

    #[error("slice {index} out of range (trajectory holds {count})")]
    SliceOutOfRange { index: u64, count: u64 },

    /// The trajectory handle was closed
    #[error("trajectory is closed")]
    Closed,

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Shorthand used by stage option parsers
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
