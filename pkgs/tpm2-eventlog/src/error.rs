use std::{collections::TryReserveError, io, path::PathBuf};

use thiserror::Error;

/// Exit code for a run that completed.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for I/O, allocation and parse failures.
pub const EXIT_GENERAL_ERROR: i32 = 1;
/// Exit code for bad or missing command line arguments.
pub const EXIT_OPTION_ERROR: i32 = 2;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Config(String),

    #[error("failed to allocate event log buffer: {0}")]
    Resource(#[from] TryReserveError),

    #[error("{}: {}", path.display(), source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse event log: {0}")]
    Format(#[from] FormatError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for this error.
    ///
    /// Only argument errors get a dedicated code, everything that happens
    /// once the file is touched is a general error.
    pub fn exit_code(&self) -> i32 {
        use Error::*;
        match self {
            Config(_) => EXIT_OPTION_ERROR,
            Resource(_) | Io { .. } | Format(_) => EXIT_GENERAL_ERROR,
        }
    }
}

/// Failure reported by a [`Formatter`](crate::ingest::Formatter).
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("event {event}: {reason}")]
    Parse { event: usize, reason: String },

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("write: {0}")]
    Io(#[from] io::Error),
}

impl FormatError {
    pub(crate) fn parse(event: usize, reason: impl Into<String>) -> Self {
        FormatError::Parse {
            event,
            reason: reason.into(),
        }
    }
}
