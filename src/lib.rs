pub mod app;
pub mod cli;
pub mod codecs;
pub mod config;
pub mod event;
pub mod filters;
pub mod inputs;
pub mod outputs;
pub mod pipeline;
pub mod registry;

pub use event::Event;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type Result<T> = std::result::Result<T, Error>;
