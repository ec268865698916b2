use async_trait::async_trait;
use serde::Deserialize;

use super::Filter;
use crate::config::{Common, ConfigRaw};
use crate::event::Event;

pub const NAME: &str = "remove_field";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RemoveFieldConfig {
    #[serde(rename = "type")]
    _type: String,
    fields: Vec<String>,
}

/// Deletes the configured field keys from every event.
pub struct RemoveField {
    fields: Vec<String>,
}

pub fn new(cfg: &ConfigRaw, _common: &Common) -> crate::Result<Box<dyn Filter>> {
    let parsed: RemoveFieldConfig = cfg
        .decode()
        .map_err(|e| format!("filter '{NAME}': {e}"))?;
    if parsed.fields.is_empty() {
        return Err(format!("filter '{NAME}': fields not set").into());
    }
    Ok(Box::new(RemoveField {
        fields: parsed.fields,
    }))
}

#[async_trait]
impl Filter for RemoveField {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(
        self: Box<Self>,
        input: flume::Receiver<Event>,
        output: flume::Sender<Event>,
    ) -> crate::Result<()> {
        while let Ok(mut event) = input.recv_async().await {
            for field in &self.fields {
                event.fields.remove(field);
            }
            if output.send_async(event).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{Common, ConfigRaw};
    use crate::event::{Event, Value};

    #[tokio::test]
    async fn removes_listed_fields() {
        let raw: ConfigRaw =
            serde_yaml::from_str("{type: remove_field, fields: [drop_me, also_me]}").unwrap();
        let filter = super::new(&raw, &Common::default()).unwrap();
        let (in_tx, in_rx) = flume::bounded(1);
        let (out_tx, out_rx) = flume::bounded(1);
        let task = tokio::spawn(filter.run(in_rx, out_tx));

        let mut event = Event::one_shot();
        event.fields.insert("keep".to_string(), Value::from("v"));
        event.fields.insert("drop_me".to_string(), Value::from("v"));
        event.fields.insert("also_me".to_string(), Value::from(1));
        in_tx.send_async(event).await.unwrap();
        drop(in_tx);

        let event = out_rx.recv_async().await.unwrap();
        assert!(event.fields.contains_key("keep"));
        assert!(!event.fields.contains_key("drop_me"));
        assert!(!event.fields.contains_key("also_me"));
        task.await.unwrap().unwrap();
    }

    #[test]
    fn empty_fields_are_rejected() {
        let raw: ConfigRaw =
            serde_yaml::from_str("{type: remove_field, fields: []}").unwrap();
        assert!(super::new(&raw, &Common::default()).is_err());
    }
}
