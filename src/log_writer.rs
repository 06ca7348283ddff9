//! Append-only writer for one event log.
//!
//! This module provides the LogWriter struct and its options for producing
//! logs that stay readable while a long-running job is still writing them.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use lz4_flex::frame::FrameEncoder;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, trace};

use crate::error::{Error, Result};
use crate::log_paths::LogPaths;
use crate::log_value::{Fields, Header, LogValue};
use crate::record_codec;

/// Header field added by [`WriterOptions::run_id`].
pub const ID_FIELD: &str = "id";
/// Header field added by [`WriterOptions::timestamps`].
pub const TIME_FIELD: &str = "time";
/// Event field added by [`WriterOptions::timestamps`].
pub const ELAPSED_FIELD: &str = "elapsed";
/// Event field added by [`PendingEvent::commit`].
pub const DURATION_FIELD: &str = "duration";

/// Settings for [`LogWriter::open_with`].
///
/// Serializable so callers can embed it in their own configuration files.
///
/// # Examples
///
/// ```
/// # use runlog::WriterOptions;
/// let options = WriterOptions::default()
///     .compress_on_close(false)
///     .overwrite(true);
/// assert!(!options.compress_on_close);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// Compress the log into `<path>.lz4` on close. When false the finalized
    /// log stays in raw form.
    pub compress_on_close: bool,

    /// Replace an existing log at the same location instead of failing with
    /// [`Error::AlreadyExists`].
    pub overwrite: bool,

    /// `fsync` after every appended line, not only on close.
    pub sync_on_write: bool,

    /// Record the wall-clock start time in the header and the seconds since
    /// open in every event.
    pub timestamps: bool,

    /// Record a random integer `id` in the header so that runs sharing a
    /// seed and configuration can still be told apart. An `id` already in
    /// the header is kept.
    pub run_id: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compress_on_close: true,
            overwrite: false,
            sync_on_write: false,
            timestamps: false,
            run_id: false,
        }
    }
}

impl WriterOptions {
    pub fn compress_on_close(mut self, enabled: bool) -> Self {
        self.compress_on_close = enabled;
        self
    }

    pub fn overwrite(mut self, enabled: bool) -> Self {
        self.overwrite = enabled;
        self
    }

    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    pub fn run_id(mut self, enabled: bool) -> Self {
        self.run_id = enabled;
        self
    }
}

/// Writes a header and a stream of events to a JSON Lines file.
///
/// The LogWriter follows a simple lifecycle:
///
/// 1. `open` creates the raw file and writes the header line
/// 2. `add` appends one event line and flushes it
/// 3. `close` compresses the raw file and removes it
///
/// Every line is flushed as soon as it is written, so other processes can
/// read the raw file while the writer is still open.
///
/// # Thread Safety
///
/// **Important**: one writer per file. Two writers appending to the same
/// path produce an unspecified interleaving.
///
/// # Scoped Use
///
/// Dropping a writer that is still open closes it. Errors raised during that
/// implicit close are logged, so call [`LogWriter::close`] when you need them.
///
/// # Examples
///
/// ```
/// # use runlog::{fields, LogWriter};
/// # fn main() -> runlog::Result<()> {
/// # let dir = tempfile::tempdir()?;
/// let path = dir.path().join("log.jsonl");
/// let mut writer = LogWriter::open(&path, fields! { "lr" => 0.01 })?;
/// writer.add("step", fields! { "loss" => 10 })?;
/// writer.add("step", fields! { "loss" => 5 })?;
/// writer.close()?;
///
/// assert!(!path.exists());
/// assert!(dir.path().join("log.jsonl.lz4").exists());
/// # Ok(())
/// # }
/// ```
pub struct LogWriter {
    paths: LogPaths,
    file: Option<BufWriter<File>>,
    header: Header,
    options: WriterOptions,
    events_written: u64,
    opened_at: Instant,
}

impl LogWriter {
    /// Opens a new log at `path` with default options.
    pub fn open(path: impl AsRef<Path>, header: impl Into<Header>) -> Result<Self> {
        Self::open_with(path, header, WriterOptions::default())
    }

    /// Opens a new log at `path`.
    ///
    /// The header is encoded before anything touches the disk, so a header
    /// that cannot be encoded leaves no file behind.
    ///
    /// # Arguments
    ///
    /// * `path` - The raw log location, conventionally ending in `.jsonl`
    /// * `header` - Run metadata written as the first line
    /// * `options` - See [`WriterOptions`]
    pub fn open_with(
        path: impl AsRef<Path>,
        header: impl Into<Header>,
        options: WriterOptions,
    ) -> Result<Self> {
        let paths = LogPaths::new(path);
        let mut header = header.into();
        if options.timestamps {
            header.fields_mut().insert(
                TIME_FIELD.to_string(),
                LogValue::Str(chrono::Local::now().to_rfc3339()),
            );
        }
        if options.run_id {
            // Thread-local RNG, seeded from the OS rather than any caller seed.
            let id = rand::thread_rng().gen_range(0..=i64::MAX);
            header
                .fields_mut()
                .entry(ID_FIELD.to_string())
                .or_insert(LogValue::Int(id));
        }
        let line = record_codec::encode(header.fields())?;

        let file = if options.overwrite {
            // A stale finalized log would shadow the new raw file for readers.
            if paths.compressed.exists() {
                fs::remove_file(&paths.compressed)?;
            }
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&paths.raw)?
        } else {
            if paths.compressed.exists() {
                return Err(Error::AlreadyExists(paths.compressed.clone()));
            }
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&paths.raw)
                .map_err(|e| match e.kind() {
                    io::ErrorKind::AlreadyExists => Error::AlreadyExists(paths.raw.clone()),
                    _ => Error::Io(e),
                })?
        };

        let mut writer = Self {
            paths,
            file: Some(BufWriter::new(file)),
            header,
            options,
            events_written: 0,
            opened_at: Instant::now(),
        };
        writer.write_line(&line)?;
        info!(path = %writer.paths.raw.display(), "opened log");
        Ok(writer)
    }

    /// Appends one event and flushes it to the raw file.
    ///
    /// # Arguments
    ///
    /// * `kind` - Identifier-like event type, e.g. `"step"`
    /// * `fields` - Any other fields; must not contain `kind`
    ///
    /// # Errors
    ///
    /// [`Error::ClosedWriter`] after [`close`](Self::close), and
    /// [`Error::RecordEncoding`] when the event cannot be encoded. An event
    /// that fails to encode is not written.
    pub fn add(&mut self, kind: &str, fields: Fields) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::ClosedWriter(self.paths.raw.clone()));
        }

        let mut fields = fields;
        if self.options.timestamps {
            fields
                .entry(ELAPSED_FIELD.to_string())
                .or_insert_with(|| LogValue::Float(self.opened_at.elapsed().as_secs_f64()));
        }
        let line = record_codec::encode_event(kind, &fields)?;
        self.write_line(&line)?;
        self.events_written += 1;
        trace!(kind, events = self.events_written, "appended event");
        Ok(())
    }

    /// Starts an event whose fields are filled in over time.
    ///
    /// The returned guard records how long it was alive in a `duration`
    /// field, which makes it handy for timing a block of work.
    ///
    /// # Examples
    ///
    /// ```
    /// # use runlog::{fields, LogWriter};
    /// # fn main() -> runlog::Result<()> {
    /// # let dir = tempfile::tempdir()?;
    /// # let mut writer = LogWriter::open(dir.path().join("log.jsonl"), fields! {})?;
    /// let mut eval = writer.adding("eval");
    /// eval.set("partition", "valid");
    /// eval.set("loss", 4.5);
    /// eval.commit()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn adding(&mut self, kind: &str) -> PendingEvent<'_> {
        PendingEvent {
            writer: self,
            kind: kind.to_string(),
            fields: Fields::new(),
            started: Instant::now(),
            committed: false,
        }
    }

    /// Finalizes the log.
    ///
    /// Flushes and closes the raw file, then (unless disabled in the options)
    /// compresses it into the finalized location and removes the raw file.
    /// On success exactly one of the two files exists.
    ///
    /// # Errors
    ///
    /// [`Error::Finalization`] if any step fails. The raw file is then left
    /// intact, any partial compressed output is discarded, and the writer is
    /// closed. [`Error::ClosedWriter`] if the writer was already closed.
    pub fn close(&mut self) -> Result<()> {
        let file = self
            .file
            .take()
            .ok_or_else(|| Error::ClosedWriter(self.paths.raw.clone()))?;
        let finalization = |source: io::Error| Error::Finalization {
            path: self.paths.raw.clone(),
            source,
        };

        let file = file.into_inner().map_err(|e| finalization(e.into_error()))?;
        file.sync_all().map_err(finalization)?;
        drop(file);

        if !self.options.compress_on_close {
            info!(path = %self.paths.raw.display(), events = self.events_written, "closed log");
            return Ok(());
        }

        compress_log(&self.paths).map_err(finalization)?;
        info!(
            path = %self.paths.compressed.display(),
            events = self.events_written,
            "closed and compressed log"
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    /// Location of the raw file.
    pub fn path(&self) -> &Path {
        &self.paths.raw
    }

    /// Location the log will occupy after a successful close.
    pub fn final_path(&self) -> PathBuf {
        if self.options.compress_on_close {
            self.paths.compressed.clone()
        } else {
            self.paths.raw.clone()
        }
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::ClosedWriter(self.paths.raw.clone()))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        if self.options.sync_on_write {
            file.get_ref().sync_data()?;
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if self.file.is_none() {
            return;
        }
        if let Err(e) = self.close() {
            error!(path = %self.paths.raw.display(), error = %e, "failed to close log on drop");
        }
    }
}

/// Copies the raw file into an LZ4 frame next to it, then removes the raw
/// file.
///
/// The compressed bytes go to a temporary file in the same directory that is
/// renamed into place only once complete, so the compressed path never holds
/// a partial stream.
fn compress_log(paths: &LogPaths) -> io::Result<()> {
    let dir = paths
        .raw
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut source = BufReader::new(File::open(&paths.raw)?);
    let staging = NamedTempFile::new_in(dir)?;
    let mut encoder = FrameEncoder::new(BufWriter::new(staging));
    let bytes = io::copy(&mut source, &mut encoder)?;
    let staging = encoder
        .finish()
        .map_err(io::Error::from)?
        .into_inner()
        .map_err(|e| e.into_error())?;
    staging.as_file().sync_all()?;
    staging.persist(&paths.compressed).map_err(|e| e.error)?;
    debug!(path = %paths.compressed.display(), bytes, "wrote compressed log");

    if let Err(e) = fs::remove_file(&paths.raw) {
        // Both forms must never survive a failed close.
        let _ = fs::remove_file(&paths.compressed);
        return Err(e);
    }
    Ok(())
}

/// An event under construction, see [`LogWriter::adding`].
///
/// Dropping the guard without calling [`commit`](Self::commit) still writes
/// the event; errors are then only logged.
pub struct PendingEvent<'a> {
    writer: &'a mut LogWriter,
    kind: String,
    fields: Fields,
    started: Instant,
    committed: bool,
}

impl PendingEvent<'_> {
    pub fn set(&mut self, name: &str, value: impl Into<LogValue>) -> &mut Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn extend(&mut self, fields: Fields) -> &mut Self {
        self.fields.extend(fields);
        self
    }

    /// Writes the event with its `duration` in seconds.
    pub fn commit(mut self) -> Result<()> {
        self.committed = true;
        self.write()
    }

    fn write(&mut self) -> Result<()> {
        let mut fields = std::mem::take(&mut self.fields);
        fields.insert(
            DURATION_FIELD.to_string(),
            LogValue::Float(self.started.elapsed().as_secs_f64()),
        );
        self.writer.add(&self.kind, fields)
    }
}

impl Drop for PendingEvent<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = self.write() {
            error!(kind = %self.kind, error = %e, "failed to write pending event on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;

    #[test]
    fn test_options_default() {
        let options = WriterOptions::default();
        assert!(options.compress_on_close);
        assert!(!options.overwrite);
        assert!(!options.sync_on_write);
        assert!(!options.timestamps);
        assert!(!options.run_id);
    }

    #[test]
    fn test_options_deserialize_partial() {
        let options: WriterOptions = serde_json::from_str(r#"{"overwrite": true}"#).unwrap();
        assert_eq!(options, WriterOptions::default().overwrite(true));
    }

    #[test]
    fn test_header_encoding_error_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let result = LogWriter::open(&path, fields! { "lr" => f64::INFINITY });
        assert!(matches!(result, Err(Error::RecordEncoding { ref path, .. }) if path == "lr"));
        assert!(!path.exists());
    }

    #[test]
    fn test_existing_raw_is_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        fs::write(&path, "{\"keep\":true}\n").unwrap();

        let result = LogWriter::open(&path, fields! {});
        assert!(matches!(result, Err(Error::AlreadyExists(ref p)) if p == &path));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"keep\":true}\n");
    }

    #[test]
    fn test_final_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");

        let writer = LogWriter::open(&path, fields! {}).unwrap();
        assert_eq!(writer.final_path(), dir.path().join("log.jsonl.lz4"));
        drop(writer);

        let options = WriterOptions::default().compress_on_close(false).overwrite(true);
        let writer = LogWriter::open_with(&path, fields! {}, options).unwrap();
        assert_eq!(writer.final_path(), path);
    }
}
