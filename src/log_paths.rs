use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Extension of a log while it is being written.
pub const RAW_EXTENSION: &str = "jsonl";

/// Suffix appended to the raw path once the log is finalized.
pub const COMPRESSED_SUFFIX: &str = ".lz4";

/// The two locations one log can occupy on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    /// `run.jsonl`, present while the log is open
    pub raw: PathBuf,
    /// `run.jsonl.lz4`, present after a successful close
    pub compressed: PathBuf,
}

impl LogPaths {
    /// Derives both locations from either one of them.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match path.to_str().and_then(|s| s.strip_suffix(COMPRESSED_SUFFIX)) {
            Some(raw) if !raw.is_empty() => LogPaths {
                raw: PathBuf::from(raw),
                compressed: path.to_path_buf(),
            },
            _ => {
                let mut compressed = OsString::from(path.as_os_str());
                compressed.push(COMPRESSED_SUFFIX);
                LogPaths {
                    raw: path.to_path_buf(),
                    compressed: PathBuf::from(compressed),
                }
            }
        }
    }

    /// The file a reader should open. The finalized form wins when both
    /// exist, since the raw file is only expected mid-write.
    pub fn existing(&self) -> Option<&Path> {
        if self.compressed.is_file() {
            Some(&self.compressed)
        } else if self.raw.is_file() {
            Some(&self.raw)
        } else {
            None
        }
    }

    /// Whether `path` names a log in either form.
    pub fn is_log_path(path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let name = name.strip_suffix(COMPRESSED_SUFFIX).unwrap_or(name);
        Path::new(name).extension().and_then(|e| e.to_str()) == Some(RAW_EXTENSION)
    }
}
