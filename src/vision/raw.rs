//! Raw engine output parsing
//!
//! Engines hand back loosely structured JSON: a bare result list, a
//! `[result_list, metadata]` pair, or `null`. All shape sniffing lives here.

use serde_json::Value;

/// Parsed top-level engine output
#[derive(Debug, Clone, PartialEq)]
pub enum RawDetections {
    /// The engine saw nothing
    Empty,
    /// Candidate detections, each still untrusted
    Detections(Vec<Value>),
    /// The result slot held something other than a list
    Malformed,
}

impl RawDetections {
    pub fn is_empty(&self) -> bool {
        !matches!(self, RawDetections::Detections(items) if !items.is_empty())
    }

    pub fn len(&self) -> usize {
        match self {
            RawDetections::Detections(items) => items.len(),
            _ => 0,
        }
    }

    /// The detection items, or nothing for empty/malformed output
    pub fn items(&self) -> &[Value] {
        match self {
            RawDetections::Detections(items) => items,
            _ => &[],
        }
    }
}

/// Unwrap engine output into its detection list
///
/// A top-level array contributes its first element as the result list;
/// any other value is taken as the result list itself.
pub fn parse_output(output: &Value) -> RawDetections {
    let candidate = match output {
        Value::Array(outer) => match outer.first() {
            Some(first) => first,
            None => return RawDetections::Empty,
        },
        other => other,
    };

    match candidate {
        Value::Null => RawDetections::Empty,
        Value::Array(items) if items.is_empty() => RawDetections::Empty,
        Value::Array(items) => RawDetections::Detections(items.clone()),
        _ => RawDetections::Malformed,
    }
}
