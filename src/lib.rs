//! # runlog
//!
//! Structured event logs for long-running jobs, and the tools to turn them
//! into tables afterwards.
//!
//! * **Append-friendly**: one JSON object per line, flushed as it is written,
//!   so a run can be inspected while it is still going
//! * **Schema-free**: every event carries a `kind` and any other fields
//! * **Compact at rest**: logs are compressed with LZ4 when the writer closes
//!
//! ## Main Components
//!
//! * `LogWriter`: writes the header and appends events, finalizes on close
//! * `LogFile`: opens a log in either form and streams its events lazily
//! * `ops`: denormalization steps such as copying header fields into events
//!   or numbering events of one kind
//! * `table`: splits an enriched stream into one column-oriented table per kind
//! * `LogSet`: the same pipeline over a directory of logs
//!
//! ## Quick Start
//!
//! ```
//! use runlog::{fields, ops, table, LogFile, LogValue, LogWriter};
//!
//! # fn main() -> runlog::Result<()> {
//! # let dir = tempfile::tempdir()?;
//! let path = dir.path().join("log.jsonl");
//!
//! let mut writer = LogWriter::open(&path, fields! { "lr" => 0.01 })?;
//! writer.add("step", fields! { "loss" => 10 })?;
//! writer.add("step", fields! { "loss" => 5 })?;
//! writer.add("valid", fields! { "loss" => 6 })?;
//! writer.close()?;
//!
//! let log = LogFile::open(&path)?;
//! let enriched = ops::apply(
//!     log.header(),
//!     log.events()?,
//!     vec![ops::header("lr"), ops::count("step")],
//! );
//! let tables = table::by_kind(enriched)?;
//!
//! let steps = &tables["step"];
//! assert_eq!(steps.column("step"), Some(vec![LogValue::Int(1), LogValue::Int(2)]));
//! assert_eq!(tables["valid"].rows()[0]["lr"], LogValue::Float(0.01));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod log_paths;
pub mod log_reader;
pub mod log_set;
pub mod log_value;
pub mod log_writer;
pub mod ops;
pub mod record_codec;
pub mod table;

pub use error::{Error, Result};
pub use log_paths::{LogPaths, COMPRESSED_SUFFIX, RAW_EXTENSION};
pub use log_reader::{read_log, Events, LogFile, LogMetadata, StorageForm};
pub use log_set::LogSet;
pub use log_value::{Event, Fields, Header, LogValue};
pub use log_writer::{LogWriter, PendingEvent, WriterOptions};
pub use ops::{Enriched, KindFilter, Op};
pub use table::Table;
