use chrono::{DateTime, Utc};

use super::{Codec, ParseError};
use crate::config::{Common, ConfigRaw};
use crate::event::{pool, Event, Value};

pub const NAME: &str = "line";

/// The single-line codec: one `\n`-terminated record becomes one event with
/// the terminator (and a preceding `\r`) stripped from `message`.
pub struct Line {
    type_name: String,
    name: String,
    host: String,
    path: String,
}

pub fn new(cfg: &ConfigRaw, common: &Common, path: &str) -> crate::Result<Box<dyn Codec>> {
    let type_name = cfg.get_str("type").unwrap_or_default().to_string();
    let name = cfg
        .get_str("name")
        .map(str::to_string)
        .unwrap_or_else(|| type_name.clone());
    Ok(Box::new(Line {
        type_name,
        name,
        host: common.hostname.clone(),
        path: path.to_string(),
    }))
}

impl Codec for Line {
    fn name(&self) -> &'static str {
        NAME
    }

    fn parse(
        &mut self,
        timestamp: DateTime<Utc>,
        data: &[u8],
    ) -> Result<Option<Event>, ParseError> {
        if data.is_empty() {
            return Err(ParseError::Empty);
        }
        if data[data.len() - 1] != b'\n' {
            return Err(ParseError::Incomplete);
        }
        let mut payload = data;
        while let [rest @ .., b'\n' | b'\r'] = payload {
            payload = rest;
        }
        if payload.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut event = pool::shared()
            .get(payload.len())
            .unwrap_or_else(Event::one_shot);
        event.timestamp = timestamp;
        let message = event.put_bytes(payload);
        event
            .fields
            .insert("type".to_string(), Value::from(self.type_name.as_str()));
        event
            .fields
            .insert("name".to_string(), Value::from(self.name.as_str()));
        event
            .fields
            .insert("host".to_string(), Value::from(self.host.as_str()));
        event
            .fields
            .insert("path".to_string(), Value::from(self.path.as_str()));
        event
            .fields
            .insert("message".to_string(), Value::Bytes(message));
        Ok(Some(event))
    }
}
