pub mod pool;

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, SecondsFormat, Utc};

/// Render a timestamp the way events print them: RFC3339 with nanoseconds.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// A field value. Strings are carried as raw bytes so they can be zero-copy
/// views into the event's backing buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Bytes),
    Integer(i64),
    Boolean(bool),
}

impl Value {
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        match self {
            Value::Bytes(bytes) => String::from_utf8_lossy(bytes),
            Value::Integer(value) => Cow::Owned(value.to_string()),
            Value::Boolean(value) => Cow::Owned(value.to_string()),
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Bytes(Bytes::from(value.into_bytes()))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bytes(_) => write!(f, "\"{}\"", self.to_string_lossy()),
            Value::Integer(value) => write!(f, "{value}"),
            Value::Boolean(value) => write!(f, "{value}"),
        }
    }
}

/// A parsed record moving through the pipeline.
///
/// Events are created by inputs, either freshly allocated (`one_shot`) or
/// drawn from the [`pool`]; they move through the channels by value and the
/// final consumer hands pooled ones back with [`pool::Pool::put`]. The
/// private `buf` is the pooled backing storage: codecs copy the raw record
/// into it once and store fields as cheap [`Bytes`] views split off it.
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub fields: HashMap<String, Value>,
    pub tags: HashMap<String, i64>,
    buf: BytesMut,
    size: usize,
}

impl Event {
    /// An event outside the pool, used when a record does not fit the
    /// largest class. `put` ignores it.
    pub fn one_shot() -> Self {
        Event {
            timestamp: Utc::now(),
            fields: HashMap::new(),
            tags: HashMap::new(),
            buf: BytesMut::new(),
            size: 0,
        }
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Event {
            timestamp: Utc::now(),
            fields: HashMap::new(),
            tags: HashMap::new(),
            buf: BytesMut::with_capacity(capacity),
            size: capacity,
        }
    }

    /// The pooled-size stamp; 0 marks a one-shot event.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_pooled(&self) -> bool {
        self.size != 0
    }

    /// Copy `data` into the backing buffer and return it as an owned
    /// zero-copy view, suitable for storing in `fields`.
    pub fn put_bytes(&mut self, data: &[u8]) -> Bytes {
        self.buf.extend_from_slice(data);
        self.buf.split().freeze()
    }

    pub(crate) fn recycle(&mut self, size: usize, capacity: usize) {
        // Dropping the old field views first lets reserve reclaim the
        // original allocation instead of growing a new one.
        self.fields.clear();
        self.tags.clear();
        self.buf.clear();
        self.buf.reserve(capacity);
        self.size = size;
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ timestamp: '{}', fields: {{", format_timestamp(&self.timestamp))?;
        let mut keys: Vec<&String> = self.fields.keys().collect();
        keys.sort();
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "\"{}\": {}", key, self.fields[*key])?;
        }
        write!(f, "}}, tags: {{")?;
        let mut keys: Vec<&String> = self.tags.keys().collect();
        keys.sort();
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "\"{}\": {}", key, self.tags[*key])?;
        }
        write!(f, "}} }}")
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
