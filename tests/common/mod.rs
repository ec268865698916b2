#![allow(dead_code)]

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use logship::config::{Common, ConfigRaw};
use logship::inputs;
use logship::Event;

pub fn common() -> Common {
    Common {
        hostname: "localhost".to_string(),
    }
}

pub fn raw(yaml: &str) -> ConfigRaw {
    serde_yaml::from_str(yaml).expect("invalid test config")
}

pub struct RunningInput {
    pub token: CancellationToken,
    pub events: flume::Receiver<Event>,
    pub handle: tokio::task::JoinHandle<logship::Result<()>>,
}

impl RunningInput {
    /// Cancel the input and wait for it to finish cleanly. The wait is
    /// bounded: cancellation is supposed to propagate within a few poll
    /// intervals plus the committer drain.
    pub async fn shutdown(self) {
        self.token.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("input did not stop after cancellation")
            .unwrap()
            .unwrap();
    }
}

/// Build the input described by `yaml` and run it against a fresh channel.
pub fn start_input(yaml: &str) -> RunningInput {
    let input = inputs::create(&raw(yaml), &common()).expect("input build failed");
    let token = CancellationToken::new();
    let (tx, events) = flume::bounded(128);
    let handle = tokio::spawn(input.run(token.clone(), tx));
    RunningInput {
        token,
        events,
        handle,
    }
}

pub fn message(event: &Event) -> String {
    event.fields["message"].to_string_lossy().into_owned()
}

pub fn field(event: &Event, key: &str) -> String {
    event.fields[key].to_string_lossy().into_owned()
}

/// Wait for exactly `n` events, failing loudly on a stall.
pub async fn collect(events: &flume::Receiver<Event>, n: usize) -> Vec<Event> {
    let mut collected = Vec::with_capacity(n);
    while collected.len() < n {
        match tokio::time::timeout(Duration::from_secs(5), events.recv_async()).await {
            Ok(Ok(event)) => collected.push(event),
            Ok(Err(_)) => panic!(
                "input stopped after {} of {} events: {:?}",
                collected.len(),
                n,
                collected
            ),
            Err(_) => panic!(
                "timed out after {} of {} events: {:?}",
                collected.len(),
                n,
                collected
            ),
        }
    }
    collected
}

/// Assert the channel stays quiet for a few poll intervals.
pub async fn assert_no_events(events: &flume::Receiver<Event>, wait: Duration) {
    if let Ok(Ok(event)) = tokio::time::timeout(wait, events.recv_async()).await {
        panic!("unexpected event: {event:?}");
    }
}
