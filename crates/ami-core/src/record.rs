//! Typed key/value records produced by the wire codec
//!
//! A [`Record`] is one blank-line-terminated block. A [`Reply`] is the ordered
//! set of records returned for one action: the `Response:` record first, then
//! any list items, then the terminal `...Complete` record for list actions.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{AmiError, AmiResult};

/// Field carrying the correlation token
pub const ACTION_ID: &str = "ActionID";
/// Discriminator of unsolicited notifications and list items
pub const EVENT: &str = "Event";
/// Discriminator of the first block of a reply
pub const RESPONSE: &str = "Response";
/// Human readable text attached to a response
pub const MESSAGE: &str = "Message";
/// Marks the start/end of multi-record replies
pub const EVENT_LIST: &str = "EventList";
/// Collects lines that carry no `Key:` prefix
pub const OUTPUT: &str = "Output";

/// An ordered, flat mapping of field name to string value.
///
/// Duplicate keys are preserved in arrival order. Lookups are ASCII
/// case-insensitive and return the first match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from literal pairs
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Append a field, keeping any earlier field with the same name
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// Replace the first field with this name, or append it
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .fields
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            Some((_, v)) => *v = value,
            None => self.fields.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Field value or the empty string
    pub fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    /// Field value or a caller-provided default
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.get(key) {
            Some(v) if !v.is_empty() => v,
            _ => default,
        }
    }

    /// All values of a repeated field
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn action_id(&self) -> Option<&str> {
        self.get(ACTION_ID)
    }

    /// `Event:` value for notifications and list items
    pub fn event(&self) -> Option<&str> {
        self.get(EVENT)
    }

    /// `Response:` value for the first block of a reply
    pub fn response(&self) -> Option<&str> {
        self.get(RESPONSE)
    }

    pub fn message(&self) -> &str {
        self.get_or_empty(MESSAGE)
    }

    pub fn is_response(&self) -> bool {
        self.response().is_some()
    }

    pub fn is_error(&self) -> bool {
        self.response()
            .map(|r| r.eq_ignore_ascii_case("error"))
            .unwrap_or(false)
    }

    /// Whether this response announces that list items follow
    pub fn starts_list(&self) -> bool {
        if self.is_error() {
            return false;
        }
        let announced = self
            .get(EVENT_LIST)
            .map(|v| v.eq_ignore_ascii_case("start"))
            .unwrap_or(false);
        announced || self.message().trim_end_matches('.').to_ascii_lowercase().ends_with("will follow")
    }

    /// Whether this record terminates a list reply
    pub fn completes_list(&self) -> bool {
        let flagged = self
            .get(EVENT_LIST)
            .map(|v| v.eq_ignore_ascii_case("complete"))
            .unwrap_or(false);
        flagged || self.event().map(|e| e.ends_with("Complete")).unwrap_or(false)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.fields {
            write!(f, "{}: {}\r\n", k, v)?;
        }
        Ok(())
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Repeated keys keep the first value so the JSON object stays valid
        let mut seen: Vec<&str> = Vec::with_capacity(self.fields.len());
        let mut map = serializer.serialize_map(None)?;
        for (k, v) in &self.fields {
            if seen.iter().any(|s| s.eq_ignore_ascii_case(k)) {
                continue;
            }
            seen.push(k);
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// All records returned for one action, in wire order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    records: Vec<Record>,
}

impl Reply {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// The `Response:` record, if the reply carries one
    pub fn response(&self) -> Option<&Record> {
        self.records.iter().find(|r| r.is_response())
    }

    pub fn is_success(&self) -> bool {
        self.response().map(|r| !r.is_error()).unwrap_or(false)
    }

    pub fn is_error(&self) -> bool {
        self.response().map(|r| r.is_error()).unwrap_or(false)
    }

    /// Response message, empty when absent
    pub fn message(&self) -> &str {
        self.response().map(|r| r.message()).unwrap_or("")
    }

    /// Data records: everything except the response and the terminal record
    pub fn items(&self) -> impl Iterator<Item = &Record> {
        self.records
            .iter()
            .filter(|r| !r.is_response() && !r.completes_list())
    }

    /// Records whose `Event:` equals `name`
    pub fn events<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Record> + 'a {
        self.records
            .iter()
            .filter(move |r| r.event().map(|e| e.eq_ignore_ascii_case(name)).unwrap_or(false))
    }

    /// Turn a failure record into a protocol error
    pub fn into_result(self, action: &str) -> AmiResult<Reply> {
        if self.is_error() {
            Err(AmiError::protocol(action, self.message().to_string()))
        } else {
            Ok(self)
        }
    }
}

impl From<Vec<Record>> for Reply {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}
