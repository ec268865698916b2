#![deny(clippy::all)]

pub mod buffer;
pub mod checkpointer;
pub mod file_watcher;
pub mod fsnode;

pub use self::buffer::{LineReader, ReadError};
pub use self::checkpointer::{CheckpointEvent, Checkpointer, Committer, SeekRecord};
pub use self::file_watcher::{FileCheck, FileWatcher};
pub use self::fsnode::Fsnode;

pub type FilePosition = u64;
