//! Per-kind tables built from an enriched event stream.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::log_value::{Event, Fields, LogValue};

/// All events of one kind, viewable as rows or as named columns.
///
/// Columns are the union of the fields seen on any event of the kind; a row
/// that lacks a column reads as [`LogValue::Null`]. The `kind` itself is the
/// table's key and is not a column.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    kind: String,
    columns: BTreeSet<String>,
    records: Vec<Fields>,
}

impl Table {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            columns: BTreeSet::new(),
            records: Vec::new(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    /// Appends one event's fields. The caller is responsible for the kind.
    pub fn push(&mut self, fields: Fields) {
        for name in fields.keys() {
            if !self.columns.contains(name) {
                self.columns.insert(name.clone());
            }
        }
        self.records.push(fields);
    }

    /// Appends every row of `other`, e.g. the same kind from another log.
    pub fn extend(&mut self, other: Table) {
        self.columns.extend(other.columns);
        self.records.extend(other.records);
    }

    /// Rows in stream order, each holding every column.
    pub fn rows(&self) -> Vec<Fields> {
        self.records
            .iter()
            .map(|record| {
                self.columns
                    .iter()
                    .map(|name| (name.clone(), record.get(name).cloned().unwrap_or_default()))
                    .collect()
            })
            .collect()
    }

    /// One column in row order, `None` if no event had the field.
    pub fn column(&self, name: &str) -> Option<Vec<LogValue>> {
        if !self.columns.contains(name) {
            return None;
        }
        Some(
            self.records
                .iter()
                .map(|record| record.get(name).cloned().unwrap_or_default())
                .collect(),
        )
    }
}

/// Partitions a stream into one table per kind, keeping each kind's order.
///
/// Consumes the whole stream; the first error aborts the partition.
pub fn by_kind<I>(events: I) -> Result<BTreeMap<String, Table>>
where
    I: IntoIterator<Item = Result<Event>>,
{
    let mut tables: BTreeMap<String, Table> = BTreeMap::new();
    for event in events {
        insert(&mut tables, event?);
    }
    Ok(tables)
}

/// [`by_kind`] for a stream that cannot fail.
pub fn by_kind_events<I>(events: I) -> BTreeMap<String, Table>
where
    I: IntoIterator<Item = Event>,
{
    let mut tables = BTreeMap::new();
    for event in events {
        insert(&mut tables, event);
    }
    tables
}

fn insert(tables: &mut BTreeMap<String, Table>, event: Event) {
    let table = tables
        .entry(event.kind().to_string())
        .or_insert_with_key(|kind| Table::new(kind.clone()));
    table.push(event.fields);
}
