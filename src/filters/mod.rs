pub mod add_field;
pub mod remove_field;

use std::sync::LazyLock;

use async_trait::async_trait;

use crate::config::{Common, ConfigRaw};
use crate::event::Event;
use crate::registry::Registry;

/// A pipeline stage between inputs and outputs. A filter consumes events
/// until its input channel closes, forwarding, transforming or dropping
/// them; dropping its sender on return is what closes the next stage.
#[async_trait]
pub trait Filter: Send {
    fn name(&self) -> &'static str;
    async fn run(
        self: Box<Self>,
        input: flume::Receiver<Event>,
        output: flume::Sender<Event>,
    ) -> crate::Result<()>;
}

impl std::fmt::Debug for dyn Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter").field("name", &self.name()).finish()
    }
}

pub type FilterFactory = fn(&ConfigRaw, &Common) -> crate::Result<Box<dyn Filter>>;

fn registry() -> &'static Registry<FilterFactory> {
    static FILTERS: LazyLock<Registry<FilterFactory>> = LazyLock::new(|| {
        let mut registry = Registry::new("filter");
        registry.register(add_field::NAME, add_field::new as FilterFactory);
        registry.register(remove_field::NAME, remove_field::new as FilterFactory);
        registry
    });
    &FILTERS
}

pub fn create(cfg: &ConfigRaw, common: &Common) -> crate::Result<Box<dyn Filter>> {
    let factory = registry().get(cfg.type_name()?)?;
    factory(cfg, common)
}
