//! Line codec for log records.
//!
//! A record is one JSON object written on one line, terminated by `\n`. This
//! layer only deals with the text format: it does not know which line is the
//! header and does not look at `kind`.

use crate::error::{Error, Result};
use crate::log_value::{is_valid_kind, Fields, LogValue, KIND_FIELD};

/// Encodes a record as one compact, newline-terminated JSON line.
///
/// Fails with [`Error::RecordEncoding`] naming the first value that has no
/// JSON representation (non-finite floats).
pub fn encode(record: &Fields) -> Result<String> {
    for (name, value) in record {
        check_representable(name, value)?;
    }
    let mut line = serde_json::to_string(record).map_err(|e| Error::RecordEncoding {
        path: String::new(),
        reason: e.to_string(),
    })?;
    line.push('\n');
    Ok(line)
}

/// Encodes `{kind, ...fields}` as an event line.
pub fn encode_event(kind: &str, fields: &Fields) -> Result<String> {
    if !is_valid_kind(kind) {
        return Err(Error::RecordEncoding {
            path: KIND_FIELD.to_string(),
            reason: format!("{kind:?} is not an identifier-like kind"),
        });
    }
    if fields.contains_key(KIND_FIELD) {
        return Err(Error::RecordEncoding {
            path: KIND_FIELD.to_string(),
            reason: "field name is reserved for the event kind".to_string(),
        });
    }

    let mut record = fields.clone();
    record.insert(KIND_FIELD.to_string(), LogValue::Str(kind.to_string()));
    encode(&record)
}

/// Decodes one line into a record. `line_number` is 1-based and only used
/// for error reporting.
pub fn decode(line: &str, line_number: usize) -> Result<Fields> {
    let text = line.strip_suffix('\n').unwrap_or(line);
    let text = text.strip_suffix('\r').unwrap_or(text);

    serde_json::from_str::<Fields>(text).map_err(|e| Error::RecordDecoding {
        line: line_number,
        reason: e.to_string(),
    })
}

fn check_representable(path: &str, value: &LogValue) -> Result<()> {
    match value {
        LogValue::Float(f) if !f.is_finite() => Err(Error::RecordEncoding {
            path: path.to_string(),
            reason: format!("{f} has no JSON representation"),
        }),
        LogValue::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                check_representable(&format!("{path}[{i}]"), item)?;
            }
            Ok(())
        }
        LogValue::Map(fields) => {
            for (name, item) in fields {
                check_representable(&format!("{path}.{name}"), item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
