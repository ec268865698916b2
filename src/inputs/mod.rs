pub mod file;

use std::sync::LazyLock;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{Common, ConfigRaw};
use crate::event::Event;
use crate::registry::Registry;

/// An event producer. `run` owns the component for its whole lifetime and
/// resolves when the input is done or cancelled; dropping the sender is how
/// downstream learns the input stopped.
#[async_trait]
pub trait Input: Send {
    fn name(&self) -> &'static str;
    async fn run(
        self: Box<Self>,
        token: CancellationToken,
        out: flume::Sender<Event>,
    ) -> crate::Result<()>;
}

impl std::fmt::Debug for dyn Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Input").field("name", &self.name()).finish()
    }
}

pub type InputFactory = fn(&ConfigRaw, &Common) -> crate::Result<Box<dyn Input>>;

fn registry() -> &'static Registry<InputFactory> {
    static INPUTS: LazyLock<Registry<InputFactory>> = LazyLock::new(|| {
        let mut registry = Registry::new("input");
        registry.register(file::NAME, file::new as InputFactory);
        registry
    });
    &INPUTS
}

pub fn create(cfg: &ConfigRaw, common: &Common) -> crate::Result<Box<dyn Input>> {
    let factory = registry().get(cfg.type_name()?)?;
    factory(cfg, common)
}
