pub mod line;

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use snafu::Snafu;

use crate::config::{Common, ConfigRaw};
use crate::event::Event;
use crate::registry::Registry;

#[derive(Debug, Snafu)]
pub enum ParseError {
    /// The record is empty or holds only line terminators. Not worth more
    /// than a debug log.
    #[snafu(display("record is empty"))]
    Empty,
    /// The record does not end in the line delimiter; the tailer must keep
    /// buffering.
    #[snafu(display("record does not end in a line terminator"))]
    Incomplete,
}

/// Strategy turning one raw record into an event.
///
/// `Ok(None)` means the codec consumed the bytes but is waiting for more,
/// reserved for future multi-line codecs.
pub trait Codec: Send {
    fn name(&self) -> &'static str;
    fn parse(
        &mut self,
        timestamp: DateTime<Utc>,
        data: &[u8],
    ) -> Result<Option<Event>, ParseError>;
}

impl std::fmt::Debug for dyn Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec").field("name", &self.name()).finish()
    }
}

pub type CodecFactory = fn(&ConfigRaw, &Common, &str) -> crate::Result<Box<dyn Codec>>;

fn registry() -> &'static Registry<CodecFactory> {
    static CODECS: LazyLock<Registry<CodecFactory>> = LazyLock::new(|| {
        let mut registry = Registry::new("codec");
        registry.register(line::NAME, line::new as CodecFactory);
        registry
    });
    &CODECS
}

/// Build the codec an input section asks for (`codec` key, default `line`)
/// bound to one source path.
pub fn create(cfg: &ConfigRaw, common: &Common, path: &str) -> crate::Result<Box<dyn Codec>> {
    let name = cfg.get_str("codec").unwrap_or(line::NAME);
    let factory = registry().get(name)?;
    factory(cfg, common, path)
}
