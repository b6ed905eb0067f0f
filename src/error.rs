//! Failures that reach the user.
//!
//! The analyses themselves never fail: anything they cannot make sense of is logged and dropped.
//! Only bad input and lost output are reported through [`Error`].

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The analysis export could not be parsed
    #[error("analysis export, line {line}: {message}")]
    Parse { line: usize, message: String },
    /// The requested entry point names no symbol in the binary
    #[error("entry point symbol `{0}` not found")]
    MissingEntryPoint(String),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
