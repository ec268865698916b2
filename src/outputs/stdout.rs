use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::Output;
use crate::config::{Common, ConfigRaw};
use crate::event::{pool, Event};

pub const NAME: &str = "stdout";

/// Writes each event's display form to standard output, one per line.
pub struct Stdout;

pub fn new(_cfg: &ConfigRaw, _common: &Common) -> crate::Result<Box<dyn Output>> {
    Ok(Box::new(Stdout))
}

#[async_trait]
impl Output for Stdout {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(self: Box<Self>, input: flume::Receiver<Event>) -> crate::Result<()> {
        let mut stdout = tokio::io::stdout();
        while let Ok(event) = input.recv_async().await {
            let mut line = event.to_string();
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
            pool::shared().put(event);
        }
        Ok(())
    }
}
