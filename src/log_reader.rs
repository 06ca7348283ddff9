//! Reader for event logs in either storage form.
//!
//! This module provides the functionality to locate, decompress and decode
//! logs produced by the LogWriter, whether they are finalized or still being
//! written.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use lz4_flex::frame::FrameDecoder;
use tracing::debug;

use crate::error::{Error, Result};
use crate::log_paths::LogPaths;
use crate::log_value::{Event, Fields, Header, LogValue, KIND_FIELD};
use crate::record_codec;

/// First four bytes of every LZ4 frame (little-endian `0x184D2204`).
const LZ4_FRAME_MAGIC: [u8; 4] = [0x04, 0x22, 0x4D, 0x18];

/// How a log is stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageForm {
    /// Plain JSON Lines, possibly still being appended to
    Raw,

    /// LZ4 frame stream of a finished log
    Compressed,
}

/// Facts about a log file that are not part of its contents.
#[derive(Debug, Clone)]
pub struct LogMetadata {
    /// The file that was actually opened
    pub path: PathBuf,

    pub form: StorageForm,

    /// Size on disk in bytes
    pub size: u64,

    /// Creation time, when the platform and filesystem report one
    pub created: Option<SystemTime>,

    /// Last modification time, when the platform reports one
    pub modified: Option<SystemTime>,
}

/// An opened log: its header plus a way to stream its events.
///
/// LogFile reads the header eagerly and the events lazily. Each call to
/// [`events`](Self::events) locates and reopens the log, which is how a
/// traversal is restarted from the beginning. A log opened mid-write is
/// followed to its finalized form once the writer closes it.
///
/// # How It Works
///
/// Given a path in either form (`run.jsonl` or `run.jsonl.lz4`), the reader
/// looks for both files:
///
/// 1. Finalized log (`.lz4`):
///    * Preferred whenever it exists
///    * Decompressed on the fly while reading
///
/// 2. Raw log (`.jsonl`):
///    * Read up to its length at the time events are requested
///    * A trailing line with no newline is an append in progress and is skipped
///
/// The storage form is detected from the file contents, so a finalized log
/// renamed to anything is still read correctly.
///
/// # Examples
///
/// ```
/// # use runlog::{fields, LogFile, LogWriter};
/// # fn main() -> runlog::Result<()> {
/// # let dir = tempfile::tempdir()?;
/// # let path = dir.path().join("log.jsonl");
/// # let mut writer = LogWriter::open(&path, fields! { "lr" => 0.01 })?;
/// # writer.add("step", fields! { "loss" => 10 })?;
/// # writer.close()?;
/// let log = LogFile::open(&path)?;
/// assert_eq!(log.header().get("lr").and_then(|v| v.as_f64()), Some(0.01));
///
/// for event in log.events()? {
///     let event = event?;
///     println!("{} {:?}", event.kind(), event.fields);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LogFile {
    paths: LogPaths,
    path: PathBuf,
    form: StorageForm,
    header: Header,
}

impl LogFile {
    /// Opens a log and decodes its header.
    ///
    /// # Errors
    ///
    /// * [`Error::Io`] with `NotFound` if neither form exists
    /// * [`Error::MalformedLog`] if the file is empty, the header is not a
    ///   JSON object, or a compressed stream cannot be decoded
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let paths = LogPaths::new(path.as_ref());
        let path = locate(&paths)?;

        let mut lines = LineSource::open(&path)?;
        let form = lines.form;
        let header = match lines.next_line()? {
            Some(line) => decode_header(&path, &line)?,
            None => return Err(Error::malformed(&path, None, "log is empty")),
        };
        debug!(path = %path.display(), ?form, "opened log for reading");

        Ok(Self {
            paths,
            path,
            form,
            header,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The file that was resolved when the log was opened.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Storage form at open time. A raw log may since have been finalized.
    pub fn form(&self) -> StorageForm {
        self.form
    }

    /// Starts a new pass over the events, from the first one.
    ///
    /// The log is located again on every call: if the raw file seen at open
    /// has been finalized in the meantime, the compressed file is read.
    pub fn events(&self) -> Result<Events> {
        let path = self.current_path();
        let mut lines = LineSource::open(&path)?;
        // The header was validated in `open`.
        lines.next_line()?;
        Ok(Events {
            lines,
            line_number: 1,
            done: false,
        })
    }

    /// Every distinct event kind in the log.
    pub fn kinds(&self) -> Result<BTreeSet<String>> {
        let mut kinds = BTreeSet::new();
        for event in self.events()? {
            let event = event?;
            if !kinds.contains(event.kind()) {
                kinds.insert(event.kind().to_string());
            }
        }
        Ok(kinds)
    }

    /// Facts about the file currently holding the log.
    pub fn metadata(&self) -> Result<LogMetadata> {
        let path = self.current_path();
        let form = if path == self.path {
            self.form
        } else {
            StorageForm::Compressed
        };
        let meta = std::fs::metadata(&path)?;
        Ok(LogMetadata {
            path,
            form,
            size: meta.len(),
            created: meta.created().ok(),
            modified: meta.modified().ok(),
        })
    }

    fn current_path(&self) -> PathBuf {
        if self.form == StorageForm::Raw && self.path == self.paths.raw && !self.path.is_file() {
            debug!(path = %self.paths.compressed.display(), "raw log finalized, following");
            return self.paths.compressed.clone();
        }
        self.path.clone()
    }
}

fn locate(paths: &LogPaths) -> Result<PathBuf> {
    let path = paths.existing().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no log at {} or {}", paths.raw.display(), paths.compressed.display()),
        )
    })?;
    Ok(path.to_path_buf())
}

/// Opens a log and starts a pass over its events in one call.
pub fn read_log(path: impl AsRef<Path>) -> Result<(Header, Events)> {
    let log = LogFile::open(path)?;
    let events = log.events()?;
    Ok((log.header, events))
}

/// Lazy, forward-only sequence of the events in one log.
///
/// Yields `Err` at the first line that cannot be decoded and stops there;
/// no line is ever skipped or repaired.
pub struct Events {
    lines: LineSource,
    line_number: usize,
    done: bool,
}

impl Events {
    fn read_event(&mut self) -> Result<Option<Event>> {
        let Some(line) = self.lines.next_line()? else {
            return Ok(None);
        };
        self.line_number += 1;
        decode_event(&self.lines.path, &line, self.line_number).map(Some)
    }
}

impl Iterator for Events {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for Events {}

enum Source {
    Raw(BufReader<io::Take<File>>),
    Compressed(BufReader<FrameDecoder<BufReader<File>>>),
}

/// Line-by-line access to either storage form.
struct LineSource {
    path: PathBuf,
    form: StorageForm,
    source: Source,
    buf: Vec<u8>,
    lines_read: usize,
}

impl LineSource {
    fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();

        let mut magic = Vec::with_capacity(LZ4_FRAME_MAGIC.len());
        (&mut file).take(LZ4_FRAME_MAGIC.len() as u64).read_to_end(&mut magic)?;
        file.seek(SeekFrom::Start(0))?;

        let (form, source) = if magic == LZ4_FRAME_MAGIC {
            let decoder = FrameDecoder::new(BufReader::new(file));
            (StorageForm::Compressed, Source::Compressed(BufReader::new(decoder)))
        } else {
            (StorageForm::Raw, Source::Raw(BufReader::new(file.take(len))))
        };

        Ok(Self {
            path: path.to_path_buf(),
            form,
            source,
            buf: Vec::new(),
            lines_read: 0,
        })
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        let read = match &mut self.source {
            Source::Raw(reader) => reader.read_until(b'\n', &mut self.buf),
            Source::Compressed(reader) => reader.read_until(b'\n', &mut self.buf),
        };
        let line_number = self.lines_read + 1;
        let n = match read {
            Ok(n) => n,
            Err(e) if self.form == StorageForm::Compressed => {
                return Err(Error::malformed(
                    &self.path,
                    Some(line_number),
                    format!("unreadable compressed stream: {e}"),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            return Ok(None);
        }
        if self.form == StorageForm::Raw && !self.buf.ends_with(b"\n") {
            debug!(path = %self.path.display(), line = line_number, "skipping unterminated line");
            return Ok(None);
        }

        self.lines_read = line_number;
        let line = String::from_utf8(std::mem::take(&mut self.buf))
            .map_err(|e| Error::malformed(&self.path, Some(line_number), format!("invalid UTF-8: {e}")))?;
        Ok(Some(line))
    }
}

fn decode_record(path: &Path, line: &str, line_number: usize) -> Result<Fields> {
    record_codec::decode(line, line_number).map_err(|e| match e {
        Error::RecordDecoding { reason, .. } => Error::malformed(path, Some(line_number), reason),
        other => other,
    })
}

fn decode_header(path: &Path, line: &str) -> Result<Header> {
    decode_record(path, line, 1).map(Header::new)
}

fn decode_event(path: &Path, line: &str, line_number: usize) -> Result<Event> {
    let mut record = decode_record(path, line, line_number)?;
    match record.remove(KIND_FIELD) {
        Some(LogValue::Str(kind)) if !kind.is_empty() => Ok(Event::new(kind, record)),
        Some(_) => Err(Error::malformed(
            path,
            Some(line_number),
            "`kind` must be a non-empty string",
        )),
        None => Err(Error::malformed(path, Some(line_number), "event has no `kind` field")),
    }
}
