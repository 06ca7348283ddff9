//! Denormalization ops.
//!
//! An [`Op`] looks at one event at a time and returns fields to merge into
//! it. [`apply`] runs a chain of ops over an event stream in a single lazy
//! pass; each op sees the fields added by the ops before it.
//!
//! Ops keep their state (counters, windows, last-seen values) for exactly one
//! traversal. Build a fresh chain for every pass over a log.
//!
//! ```
//! use runlog::{fields, ops, Event, Header};
//!
//! let header = Header::new(fields! { "lr" => 0.01 });
//! let events = vec![
//!     Ok(Event::new("step", fields! { "loss" => 10 })),
//!     Ok(Event::new("valid", fields! { "loss" => 9 })),
//!     Ok(Event::new("step", fields! { "loss" => 5 })),
//! ];
//! let enriched: Vec<Event> = ops::apply(&header, events, vec![ops::header("lr"), ops::count("step")])
//!     .collect::<runlog::Result<_>>()?;
//!
//! assert_eq!(enriched[2].fields, fields! { "loss" => 5, "lr" => 0.01, "step" => 2 });
//! assert_eq!(enriched[1].get("step"), None);
//! # Ok::<(), runlog::Error>(())
//! ```

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::iter::FusedIterator;

use tracing::warn;

use crate::error::{Error, Result};
use crate::log_value::{Event, Fields, Header, LogValue};

/// Which events an op is applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindFilter {
    Any,
    Kinds(BTreeSet<String>),
}

impl KindFilter {
    pub fn matches(&self, kind: &str) -> bool {
        match self {
            KindFilter::Any => true,
            KindFilter::Kinds(kinds) => kinds.contains(kind),
        }
    }
}

type Transform = Box<dyn FnMut(&Event) -> Result<Fields>>;

enum Total {
    Int(i64),
    Float(f64),
}

enum Action {
    /// Value is looked up when the enriched stream is first pulled.
    HeaderCopy { field: String, value: Option<LogValue> },
    Count { as_field: String, count: i64 },
    CountBefore { kind: String, as_field: String, count: i64 },
    Copy { kind: String, field: String, as_field: String, last: LogValue },
    Sum { field: String, as_field: String, total: Total },
    WindowMean { kind: String, size: usize, field: String, as_field: String, window: VecDeque<f64> },
    Custom(Transform),
}

impl Action {
    fn derive(&mut self, event: &Event) -> Result<Fields> {
        let mut derived = Fields::new();
        match self {
            Action::HeaderCopy { field, value } => {
                let value = value.clone().ok_or_else(|| Error::MissingHeaderField(field.clone()))?;
                derived.insert(field.clone(), value);
            }
            Action::Count { as_field, count } => {
                *count += 1;
                derived.insert(as_field.clone(), LogValue::Int(*count));
            }
            Action::CountBefore { kind, as_field, count } => {
                derived.insert(as_field.clone(), LogValue::Int(*count));
                if event.kind() == kind {
                    *count += 1;
                }
            }
            Action::Copy { kind, field, as_field, last } => {
                if event.kind() == kind {
                    if let Some(value) = event.get(field) {
                        *last = value.clone();
                    }
                } else {
                    derived.insert(as_field.clone(), last.clone());
                }
            }
            Action::Sum { field, as_field, total } => {
                let current = match total {
                    Total::Int(i) => LogValue::Int(*i),
                    Total::Float(f) => LogValue::Float(*f),
                };
                derived.insert(as_field.clone(), current);
                let next = match (&*total, event.get(field)) {
                    (Total::Int(i), Some(LogValue::Int(n))) => Some(
                        i.checked_add(*n)
                            .map(Total::Int)
                            .unwrap_or(Total::Float(*i as f64 + *n as f64)),
                    ),
                    (Total::Int(i), Some(LogValue::Float(f))) => Some(Total::Float(*i as f64 + *f)),
                    (Total::Float(t), Some(v)) => v.as_f64().map(|f| Total::Float(*t + f)),
                    _ => None,
                };
                if let Some(next) = next {
                    *total = next;
                }
            }
            Action::WindowMean { kind, size, field, as_field, window } => {
                let mean = if window.is_empty() {
                    LogValue::Null
                } else {
                    LogValue::Float(window.iter().sum::<f64>() / window.len() as f64)
                };
                derived.insert(as_field.clone(), mean);
                if event.kind() == kind {
                    if let Some(value) = event.get(field).and_then(LogValue::as_f64) {
                        window.push_back(value);
                        while window.len() > *size {
                            window.pop_front();
                        }
                    }
                }
            }
            Action::Custom(transform) => return transform(event),
        }
        Ok(derived)
    }
}

/// One step of a denormalization pipeline.
///
/// An op is plain data: a name, the kinds it applies to, the fields it needs
/// and the action with its running state.
pub struct Op {
    name: String,
    filter: KindFilter,
    requires: Vec<String>,
    action: Action,
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Op")
            .field("name", &self.name)
            .field("filter", &self.filter)
            .field("requires", &self.requires)
            .finish()
    }
}

impl Op {
    fn new(name: String, action: Action) -> Self {
        Self {
            name,
            filter: KindFilter::Any,
            requires: Vec::new(),
            action,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter(&self) -> &KindFilter {
        &self.filter
    }

    /// Restricts the op to events of the given kinds, replacing its filter.
    pub fn when<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter = KindFilter::Kinds(kinds.into_iter().map(Into::into).collect());
        self
    }

    /// Skips the op on events that lack any of these fields. State is left
    /// untouched for skipped events.
    pub fn requires<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(fields.into_iter().map(Into::into));
        self
    }

    fn apply_to(&mut self, event: &mut Event) -> Result<()> {
        if !self.filter.matches(event.kind()) {
            return Ok(());
        }
        if !self.requires.iter().all(|field| event.has(field)) {
            return Ok(());
        }
        let derived = self.action.derive(event)?;
        if !event.merge(derived) {
            warn!(op = %self.name, kind = event.kind(), "op produced a `kind` field; ignored");
        }
        Ok(())
    }

    fn resolve_header(&mut self, header: &Header) -> Result<()> {
        if let Action::HeaderCopy { field, value } = &mut self.action {
            let found = header.get(field).ok_or_else(|| Error::MissingHeaderField(field.clone()))?;
            *value = Some(found.clone());
        }
        Ok(())
    }
}

/// Copies `field` from the header into every event.
///
/// Fails with [`Error::MissingHeaderField`] when the enriched stream is first
/// consumed if the header has no such field.
pub fn header(field: &str) -> Op {
    Op::new(
        format!("header({field})"),
        Action::HeaderCopy {
            field: field.to_string(),
            value: None,
        },
    )
}

/// Numbers the events of `kind` 1, 2, 3, ... in a field named after the kind.
/// Other events are left untouched.
pub fn count(kind: &str) -> Op {
    count_as(kind, kind)
}

/// Like [`count`] with a custom output field.
pub fn count_as(kind: &str, as_field: &str) -> Op {
    Op::new(
        format!("count({kind})"),
        Action::Count {
            as_field: as_field.to_string(),
            count: 0,
        },
    )
    .when([kind])
}

/// Attaches to every event the number of earlier events of `kind`.
///
/// Useful for tagging evaluation events with the current step:
/// `count_before("step", "step")` gives a `valid` event that follows three
/// steps the value 3.
pub fn count_before(kind: &str, as_field: &str) -> Op {
    Op::new(
        format!("count_before({kind})"),
        Action::CountBefore {
            kind: kind.to_string(),
            as_field: as_field.to_string(),
            count: 0,
        },
    )
}

/// Carries the last `field` seen on a `kind` event onto every other event,
/// as `as_field`. `Null` until the first `kind` event with that field.
pub fn copy(kind: &str, field: &str, as_field: &str) -> Op {
    Op::new(
        format!("copy({kind}.{field})"),
        Action::Copy {
            kind: kind.to_string(),
            field: field.to_string(),
            as_field: as_field.to_string(),
            last: LogValue::Null,
        },
    )
}

/// Running total of numeric `field` over the events before this one.
///
/// Stays an integer while every summand is an integer. Events without a
/// numeric `field` add nothing.
pub fn sum(field: &str, as_field: &str) -> Op {
    Op::new(
        format!("sum({field})"),
        Action::Sum {
            field: field.to_string(),
            as_field: as_field.to_string(),
            total: Total::Int(0),
        },
    )
}

/// Mean of `field` over the last `size` events of `kind` before this one,
/// or `Null` when there are none yet.
pub fn window_mean(kind: &str, size: usize, field: &str, as_field: &str) -> Op {
    Op::new(
        format!("window_mean({kind}.{field}, {size})"),
        Action::WindowMean {
            kind: kind.to_string(),
            size: size.max(1),
            field: field.to_string(),
            as_field: as_field.to_string(),
            window: VecDeque::with_capacity(size.max(1)),
        },
    )
}

/// Stateless derived field computed from each event.
pub fn map<F>(as_field: &str, mut f: F) -> Op
where
    F: FnMut(&Event) -> LogValue + 'static,
{
    let name = as_field.to_string();
    custom(&format!("map({as_field})"), move |event| {
        let mut derived = Fields::new();
        derived.insert(name.clone(), f(event));
        Ok(derived)
    })
}

/// An op defined by a closure. State captured by the closure lives as long
/// as the op, i.e. for one traversal.
pub fn custom<F>(name: &str, f: F) -> Op
where
    F: FnMut(&Event) -> Result<Fields> + 'static,
{
    Op::new(name.to_string(), Action::Custom(Box::new(f)))
}

/// Runs `ops` over `events`, left to right on every event.
///
/// Lazy: nothing is read or checked until the returned iterator is pulled.
/// Output has the same length and order as the input. The first error, from
/// upstream or from an op, is yielded once and ends the stream.
pub fn apply<I>(header: &Header, events: I, ops: Vec<Op>) -> Enriched<I::IntoIter>
where
    I: IntoIterator<Item = Result<Event>>,
{
    Enriched {
        header: Some(header.clone()),
        events: events.into_iter(),
        ops,
        done: false,
    }
}

/// Iterator returned by [`apply`].
pub struct Enriched<I> {
    /// Present until the first pull resolves header lookups.
    header: Option<Header>,
    events: I,
    ops: Vec<Op>,
    done: bool,
}

impl<I> Enriched<I>
where
    I: Iterator<Item = Result<Event>>,
{
    fn next_event(&mut self) -> Result<Option<Event>> {
        if let Some(header) = self.header.take() {
            for op in &mut self.ops {
                op.resolve_header(&header)?;
            }
        }

        let Some(event) = self.events.next() else {
            return Ok(None);
        };
        let mut event = event?;
        for op in &mut self.ops {
            op.apply_to(&mut event)?;
        }
        Ok(Some(event))
    }
}

impl<I> Iterator for Enriched<I>
where
    I: Iterator<Item = Result<Event>>,
{
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_event() {
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

impl<I> FusedIterator for Enriched<I> where I: Iterator<Item = Result<Event>> {}
