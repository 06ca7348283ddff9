use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Field name reserved for the event discriminator.
pub const KIND_FIELD: &str = "kind";

/// Named values of one record, kept in key order so encoded lines are stable.
pub type Fields = BTreeMap<String, LogValue>;

/// A value stored in a log record.
///
/// The log is schema-free, so every field holds one of the JSON value shapes.
/// Integers that do not fit in an `i64` are read back as `Float`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogValue {
    /// JSON `null`, also used for cells missing from a table row
    #[default]
    Null,

    /// A boolean value
    Bool(bool),

    /// A 64-bit signed integer
    Int(i64),

    /// A 64-bit floating point number
    Float(f64),

    /// A UTF-8 string
    Str(String),

    /// An ordered array of values
    Array(Vec<LogValue>),

    /// A nested mapping
    Map(Fields),
}

impl LogValue {
    pub fn is_null(&self) -> bool {
        matches!(self, LogValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            LogValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view. Floats with no fractional part are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            LogValue::Int(i) => Some(*i),
            LogValue::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(*f as i64),
            _ => None,
        }
    }

    /// Numeric view over both `Int` and `Float`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LogValue::Int(i) => Some(*i as f64),
            LogValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LogValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[LogValue]> {
        match self {
            LogValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            LogValue::Map(fields) => Some(fields),
            _ => None,
        }
    }
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::Null => write!(f, "null"),
            LogValue::Bool(b) => write!(f, "{}", b),
            LogValue::Int(i) => write!(f, "{}", i),
            LogValue::Float(fl) => write!(f, "{}", fl),
            LogValue::Str(s) => write!(f, "{}", s),
            LogValue::Array(_) | LogValue::Map(_) => {
                let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&text)
            }
        }
    }
}

impl From<bool> for LogValue {
    fn from(value: bool) -> Self {
        LogValue::Bool(value)
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for LogValue {
                fn from(value: $ty) -> Self {
                    LogValue::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for LogValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(i) => LogValue::Int(i),
            Err(_) => LogValue::Float(value as f64),
        }
    }
}

impl From<usize> for LogValue {
    fn from(value: usize) -> Self {
        LogValue::from(value as u64)
    }
}

impl From<f32> for LogValue {
    fn from(value: f32) -> Self {
        LogValue::Float(f64::from(value))
    }
}

impl From<f64> for LogValue {
    fn from(value: f64) -> Self {
        LogValue::Float(value)
    }
}

impl From<&str> for LogValue {
    fn from(value: &str) -> Self {
        LogValue::Str(value.to_string())
    }
}

impl From<String> for LogValue {
    fn from(value: String) -> Self {
        LogValue::Str(value)
    }
}

impl<T: Into<LogValue>> From<Vec<T>> for LogValue {
    fn from(values: Vec<T>) -> Self {
        LogValue::Array(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<LogValue>> From<Option<T>> for LogValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(LogValue::Null, Into::into)
    }
}

impl From<Fields> for LogValue {
    fn from(fields: Fields) -> Self {
        LogValue::Map(fields)
    }
}

/// Builds a [`Fields`] map from `key => value` pairs.
///
/// ```
/// use runlog::{fields, LogValue};
///
/// let f = fields! { "loss" => 2.5, "epoch" => 3 };
/// assert_eq!(f["epoch"], LogValue::Int(3));
/// ```
#[macro_export]
macro_rules! fields {
    () => {
        $crate::Fields::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut fields = $crate::Fields::new();
        $(
            fields.insert(::std::string::String::from($key), $crate::LogValue::from($value));
        )+
        fields
    }};
}

/// Static run metadata, written once as the first line of a log.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Header(Fields);

impl Header {
    pub fn new(fields: Fields) -> Self {
        Header(fields)
    }

    pub fn get(&self, name: &str) -> Option<&LogValue> {
        self.0.get(name)
    }

    pub fn fields(&self) -> &Fields {
        &self.0
    }

    pub fn into_fields(self) -> Fields {
        self.0
    }

    pub(crate) fn fields_mut(&mut self) -> &mut Fields {
        &mut self.0
    }
}

impl From<Fields> for Header {
    fn from(fields: Fields) -> Self {
        Header(fields)
    }
}

/// One record after the header: a `kind` tag plus arbitrary fields.
///
/// `fields` never contains the `kind` key; the tag lives in its own slot and
/// is immutable once the event exists.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: String,
    pub fields: Fields,
}

impl Event {
    pub fn new(kind: impl Into<String>, fields: Fields) -> Self {
        let mut fields = fields;
        fields.remove(KIND_FIELD);
        Event {
            kind: kind.into(),
            fields,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn get(&self, name: &str) -> Option<&LogValue> {
        self.fields.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Merges derived fields into the event, overwriting existing names.
    /// A `kind` entry is ignored and reported back as `false`.
    pub fn merge(&mut self, derived: Fields) -> bool {
        let mut kept_kind = true;
        for (name, value) in derived {
            if name == KIND_FIELD {
                kept_kind = false;
                continue;
            }
            self.fields.insert(name, value);
        }
        kept_kind
    }

    /// The event as one flat mapping, `kind` included.
    pub fn to_record(&self) -> Fields {
        let mut record = self.fields.clone();
        record.insert(KIND_FIELD.to_string(), LogValue::Str(self.kind.clone()));
        record
    }
}

/// Identifier-like: non-empty, ASCII alphanumerics plus `_ - . :`.
pub fn is_valid_kind(kind: &str) -> bool {
    !kind.is_empty()
        && kind
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}
