use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while writing, reading or transforming a log.
///
/// Every variant is returned to the immediate caller. Nothing in the crate
/// retries or repairs: a failing operation leaves the log either raw-intact or
/// finalized-intact on disk.
#[derive(Debug, Error)]
pub enum Error {
    /// A record could not be serialized. `path` names the offending field,
    /// e.g. `metrics.loss[2]`.
    #[error("cannot encode field `{path}`: {reason}")]
    RecordEncoding { path: String, reason: String },

    /// A single line is not a JSON object.
    #[error("line {line}: cannot decode record: {reason}")]
    RecordDecoding { line: usize, reason: String },

    /// The file as a whole violates the log format.
    #[error("malformed log {}{}: {reason}", .path.display(), line_suffix(.line))]
    MalformedLog {
        path: PathBuf,
        line: Option<usize>,
        reason: String,
    },

    /// The writer has already been closed.
    #[error("log writer for {} is closed", .0.display())]
    ClosedWriter(PathBuf),

    /// Compressing or replacing the raw file failed. The raw file is intact.
    #[error("failed to finalize {}: {source}", .path.display())]
    Finalization {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An op asked for a header field that this log does not have.
    #[error("header has no field `{0}`")]
    MissingHeaderField(String),

    /// A log already exists where a writer was asked to create one.
    #[error("log already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn line_suffix(line: &Option<usize>) -> String {
    match line {
        Some(line) => format!(" (line {line})"),
        None => String::new(),
    }
}

impl Error {
    pub(crate) fn malformed(path: impl Into<PathBuf>, line: Option<usize>, reason: impl Into<String>) -> Self {
        Error::MalformedLog {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}
