use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::log_paths::LogPaths;
use crate::log_reader::LogFile;
use crate::ops::{self, Op};
use crate::table::{self, Table};

/// A batch of logs processed together, e.g. one per hyperparameter setting.
///
/// Each log is identified by its raw path; the reader picks whichever form
/// exists when the set is read.
#[derive(Debug, Clone, Default)]
pub struct LogSet {
    paths: Vec<PathBuf>,
}

impl LogSet {
    /// Builds a set from explicit paths in either form. A raw path and its
    /// compressed counterpart count as one log.
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut seen = BTreeSet::new();
        let mut unique = Vec::new();
        for path in paths {
            let raw = LogPaths::new(path).raw;
            if seen.insert(raw.clone()) {
                unique.push(raw);
            }
        }
        Self { paths: unique }
    }

    /// Finds every `*.jsonl` and `*.jsonl.lz4` file directly inside `dir`,
    /// sorted by path.
    pub fn discover(dir: impl AsRef<Path>) -> Result<Self> {
        let mut raws = BTreeSet::new();
        for entry in fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.is_file() && LogPaths::is_log_path(&path) {
                raws.insert(LogPaths::new(&path).raw);
            }
        }
        debug!(dir = %dir.as_ref().display(), logs = raws.len(), "discovered logs");
        Ok(Self {
            paths: raws.into_iter().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn open(&self) -> Result<Vec<LogFile>> {
        self.paths.iter().map(LogFile::open).collect()
    }

    /// Union of the event kinds of every log.
    pub fn kinds(&self) -> Result<BTreeSet<String>> {
        let mut kinds = BTreeSet::new();
        for log in self.open()? {
            kinds.extend(log.kinds()?);
        }
        Ok(kinds)
    }

    /// Enriches every log with a fresh op chain and merges the results into
    /// one table per kind, log by log in set order.
    ///
    /// `pipeline` is called once per log so that counters and other op state
    /// start over for each file, and header ops see that file's header.
    pub fn tables<F>(&self, pipeline: F) -> Result<BTreeMap<String, Table>>
    where
        F: Fn() -> Vec<Op>,
    {
        let mut merged: BTreeMap<String, Table> = BTreeMap::new();
        for path in &self.paths {
            let log = LogFile::open(path)?;
            let enriched = ops::apply(log.header(), log.events()?, pipeline());
            for (kind, table) in table::by_kind(enriched)? {
                match merged.get_mut(&kind) {
                    Some(existing) => existing.extend(table),
                    None => {
                        merged.insert(kind, table);
                    }
                }
            }
        }
        Ok(merged)
    }
}
