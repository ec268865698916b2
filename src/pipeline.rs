use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::event::Event;
use crate::filters::{self, Filter};
use crate::inputs::{self, Input};
use crate::outputs::{self, Output};

/// Events flow inputs -> filter chain -> outputs over bounded channels.
/// Inputs share the fan-in sender; outputs compete on the final receiver,
/// so each event reaches exactly one output. Every stage stops when its
/// upstream channel closes; the first component error cancels the rest.
#[derive(Debug)]
pub struct Pipeline {
    inputs: Vec<Box<dyn Input>>,
    filters: Vec<Box<dyn Filter>>,
    outputs: Vec<Box<dyn Output>>,
}

impl Pipeline {
    /// Build every component up front so configuration problems surface
    /// before any file is opened or task spawned.
    pub fn new(config: &Config) -> crate::Result<Pipeline> {
        if config.inputs.is_empty() {
            return Err("no inputs configured".into());
        }
        if config.outputs.is_empty() {
            return Err("no outputs configured".into());
        }
        let inputs = config
            .inputs
            .iter()
            .map(|cfg| inputs::create(cfg, &config.common))
            .collect::<crate::Result<Vec<_>>>()?;
        let filters = config
            .filters
            .iter()
            .map(|cfg| filters::create(cfg, &config.common))
            .collect::<crate::Result<Vec<_>>>()?;
        let outputs = config
            .outputs
            .iter()
            .map(|cfg| outputs::create(cfg, &config.common))
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(Pipeline {
            inputs,
            filters,
            outputs,
        })
    }

    pub async fn run(self, token: CancellationToken) -> crate::Result<()> {
        let capacity = 10 * self.inputs.len();
        let mut tasks: JoinSet<crate::Result<()>> = JoinSet::new();

        let (fan_in, mut receiver) = flume::bounded::<Event>(capacity);
        for input in self.inputs {
            let input_token = token.child_token();
            let sender = fan_in.clone();
            tasks.spawn(input.run(input_token, sender));
        }
        drop(fan_in);

        for filter in self.filters {
            let (sender, next) = flume::bounded::<Event>(capacity);
            tasks.spawn(filter.run(receiver, sender));
            receiver = next;
        }

        for output in self.outputs {
            tasks.spawn(output.run(receiver.clone()));
        }
        drop(receiver);

        info!(message = "pipeline started");
        let mut first_error: Option<crate::Error> = None;
        while let Some(result) = tasks.join_next().await {
            let result =
                result.unwrap_or_else(|e| Err(format!("pipeline task panicked: {e}").into()));
            if let Err(e) = result {
                error!(message = "pipeline component failed", error = %e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
                token.cancel();
            }
        }
        info!(message = "pipeline stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
