pub mod stdout;

use std::sync::LazyLock;

use async_trait::async_trait;

use crate::config::{Common, ConfigRaw};
use crate::event::Event;
use crate::registry::Registry;

/// A terminal pipeline stage. Outputs sharing one channel compete for its
/// events: each event is delivered to exactly one of them. An output runs
/// until the channel closes, returning pooled carriers as it goes.
#[async_trait]
pub trait Output: Send {
    fn name(&self) -> &'static str;
    async fn run(self: Box<Self>, input: flume::Receiver<Event>) -> crate::Result<()>;
}

impl std::fmt::Debug for dyn Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output").field("name", &self.name()).finish()
    }
}

pub type OutputFactory = fn(&ConfigRaw, &Common) -> crate::Result<Box<dyn Output>>;

fn registry() -> &'static Registry<OutputFactory> {
    static OUTPUTS: LazyLock<Registry<OutputFactory>> = LazyLock::new(|| {
        let mut registry = Registry::new("output");
        registry.register(stdout::NAME, stdout::new as OutputFactory);
        registry
    });
    &OUTPUTS
}

pub fn create(cfg: &ConfigRaw, common: &Common) -> crate::Result<Box<dyn Output>> {
    let factory = registry().get(cfg.type_name()?)?;
    factory(cfg, common)
}
