use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use super::Filter;
use crate::config::{Common, ConfigRaw};
use crate::event::{format_timestamp, Event, Value};

pub const NAME: &str = "add_field";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddFieldConfig {
    #[serde(rename = "type")]
    _type: String,
    fields: BTreeMap<String, String>,
}

/// A `%{field}` template compiled at config time into literal and
/// field-reference segments.
#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

#[derive(Debug)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> crate::Result<Template> {
        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find("%{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(format!("unterminated template token in '{source}'").into());
            };
            segments.push(Segment::Field(after[..end].to_string()));
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Ok(Template { segments })
    }

    /// Substitute field references from the event. `%{timestamp}` resolves
    /// to the event timestamp unless a real `timestamp` field shadows it.
    /// Tokens naming absent fields are left in place and reported through
    /// the second return so partial expansions stay observable.
    pub fn render(&self, event: &Event) -> (String, bool) {
        let mut out = String::new();
        let mut partial = false;
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => {
                    if let Some(value) = event.fields.get(name.as_str()) {
                        out.push_str(&value.to_string_lossy());
                    } else if name == "timestamp" {
                        out.push_str(&format_timestamp(&event.timestamp));
                    } else {
                        partial = true;
                        out.push_str("%{");
                        out.push_str(name);
                        out.push('}');
                    }
                }
            }
        }
        (out, partial)
    }
}

#[derive(Debug)]
enum Compiled {
    Literal(String),
    Template(Template),
}

/// Appends configured fields to every event, with `%{field}` templating in
/// the values.
pub struct AddField {
    fields: Vec<(String, Compiled)>,
}

pub fn new(cfg: &ConfigRaw, _common: &Common) -> crate::Result<Box<dyn Filter>> {
    let parsed: AddFieldConfig = cfg
        .decode()
        .map_err(|e| format!("filter '{NAME}': {e}"))?;
    if parsed.fields.is_empty() {
        return Err(format!("filter '{NAME}': fields not set").into());
    }
    let mut fields = Vec::with_capacity(parsed.fields.len());
    for (key, value) in parsed.fields {
        let compiled = if value.contains("%{") {
            Compiled::Template(Template::parse(&value)?)
        } else {
            Compiled::Literal(value)
        };
        fields.push((key, compiled));
    }
    Ok(Box::new(AddField { fields }))
}

impl AddField {
    /// Returns whether any template expanded only partially.
    fn apply(&self, event: &mut Event) -> bool {
        let mut partial = false;
        for (key, compiled) in &self.fields {
            let value = match compiled {
                Compiled::Literal(text) => Value::from(text.as_str()),
                Compiled::Template(template) => {
                    let (rendered, part) = template.render(event);
                    partial |= part;
                    Value::from(rendered)
                }
            };
            event.fields.insert(key.clone(), value);
        }
        partial
    }
}

#[async_trait]
impl Filter for AddField {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(
        self: Box<Self>,
        input: flume::Receiver<Event>,
        output: flume::Sender<Event>,
    ) -> crate::Result<()> {
        while let Ok(mut event) = input.recv_async().await {
            if self.apply(&mut event) {
                warn!(message = "template partially expanded", filter = NAME);
            }
            if output.send_async(event).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
