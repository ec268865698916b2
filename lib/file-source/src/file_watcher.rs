use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncSeekExt;
use tracing::warn;

use crate::buffer::{LineReader, ReadError};
use crate::fsnode::{self, Fsnode};
use crate::FilePosition;

/// Hard ceiling for a single record. The read buffer grows geometrically up
/// to this size; anything longer is discarded up to the next delimiter while
/// the offset still advances past it.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// What the open/reopen state machine found on this pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileCheck {
    pub truncated: bool,
    pub recreated: bool,
}

/// The per-file state machine: one open handle at most, the remembered
/// identity of the file behind it, and the read cursor.
///
/// `FileWatcher` transparently follows the file through truncation and
/// rename-rotation. It owns only filesystem state; the caller drives the
/// polling cadence and consumes the produced lines.
pub struct FileWatcher {
    path: PathBuf,
    reader: Option<LineReader<File>>,
    node: Fsnode,
    offset: FilePosition,
    read_buffer: usize,
    discarding: bool,
}

impl FileWatcher {
    /// `node` is the last known identity for the path (`Fsnode::default()`
    /// when there is none) and `offset` the committed read cursor.
    pub fn new(path: PathBuf, node: Fsnode, offset: FilePosition, read_buffer: usize) -> Self {
        FileWatcher {
            path,
            reader: None,
            node,
            offset,
            read_buffer: read_buffer.max(1),
            discarding: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> FilePosition {
        self.offset
    }

    pub fn node(&self) -> &Fsnode {
        &self.node
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Drop the handle. The next `check` reopens the path from scratch.
    pub fn close(&mut self) {
        self.reader = None;
    }

    /// Size of the file behind the current handle, valid even after the
    /// path was unlinked.
    pub async fn size(&self) -> io::Result<u64> {
        self.handle_node().await.map(|node| node.size)
    }

    async fn handle_node(&self) -> io::Result<Fsnode> {
        match &self.reader {
            Some(reader) => reader
                .get_ref()
                .metadata()
                .await
                .map(|metadata| Fsnode::from(&metadata)),
            None => Err(io::ErrorKind::NotFound.into()),
        }
    }

    fn attach(&mut self, file: File) {
        match &mut self.reader {
            Some(reader) => {
                reader.reset(file);
            }
            None => self.reader = Some(LineReader::new(file, self.read_buffer)),
        }
    }

    /// Run the open/reopen state machine: open the path when no handle is
    /// held, then classify what happened to the file since the last pass.
    ///
    /// Classification against the remembered node: a first open adopts the
    /// handle identity; a handle whose identity differs from a known node
    /// means the path was recreated between passes; a same-identity handle
    /// whose size fell below the cursor was truncated. When handle and
    /// remembered identity agree, the path itself is also stat'ed - a path
    /// now naming a different inode is rename-rotation, invisible to a pure
    /// fstat of the held handle.
    ///
    /// On truncate or recreate the cursor resets to 0. Whenever the cursor
    /// moved or the handle changed, the handle is seeked and the line reader
    /// cleared.
    pub async fn check(&mut self) -> io::Result<FileCheck> {
        let mut flags = FileCheck::default();
        let mut need_seek = false;

        if self.reader.is_none() {
            let file = File::open(&self.path).await?;
            self.attach(file);
            need_seek = true;
        }

        let handle_node = match self.handle_node().await {
            Ok(node) => node,
            Err(e) => {
                self.reader = None;
                return Err(e);
            }
        };

        if !handle_node.same(&self.node) {
            if self.node.is_unknown() {
                // First open: adopt the identity, keep the cursor.
                self.node = handle_node;
                need_seek = true;
            } else {
                flags.recreated = true;
            }
        } else if handle_node.size < self.offset {
            flags.truncated = true;
        } else {
            self.node.nlink = handle_node.nlink;
            if let Ok(path_node) = fsnode::lstat(&self.path).await {
                if !path_node.same(&handle_node) {
                    flags.recreated = true;
                }
            }
        }

        if flags.recreated {
            self.reader = None;
            let file = File::open(&self.path).await?;
            self.attach(file);
            let node = match self.handle_node().await {
                Ok(node) => node,
                Err(e) => {
                    self.reader = None;
                    return Err(e);
                }
            };
            self.node = node;
            self.offset = 0;
        } else if flags.truncated {
            self.node = handle_node;
            self.offset = 0;
        }

        if need_seek || flags.recreated || flags.truncated {
            self.discarding = false;
            if let Some(reader) = self.reader.as_mut() {
                reader
                    .get_mut()
                    .seek(SeekFrom::Start(self.offset))
                    .await?;
                reader.clear();
            }
        }

        Ok(flags)
    }

    /// Yield the next complete line, delimiter included, advancing the
    /// cursor past it. `Ok(None)` is end-of-file (a partial trailing record
    /// stays buffered); `Err` is a real read error, after which the caller
    /// should `close` and retry on its next pass.
    ///
    /// Oversized records are handled here: the buffer grows geometrically up
    /// to [`MAX_LINE_BYTES`], past which the record is discarded up to its
    /// delimiter with the cursor still advancing.
    pub async fn read_line(&mut self) -> io::Result<Option<&[u8]>> {
        let span = loop {
            let Some(reader) = self.reader.as_mut() else {
                return Err(io::ErrorKind::NotFound.into());
            };
            match reader.fill_until(b'\n').await {
                Ok(span) => {
                    self.offset += span.len() as u64;
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    break span;
                }
                Err(ReadError::Overflow) => {
                    let capacity = reader.capacity();
                    if capacity < MAX_LINE_BYTES {
                        reader.grow((capacity * 2).min(MAX_LINE_BYTES));
                    } else {
                        warn!(
                            message = "discarding line longer than the maximum",
                            path = %self.path.display(),
                            max = MAX_LINE_BYTES,
                        );
                        self.offset += reader.drain() as u64;
                        self.discarding = true;
                    }
                }
                Err(ReadError::Incomplete) => return Ok(None),
                Err(ReadError::Read { source }) => return Err(source),
            }
        };
        Ok(self.reader.as_ref().map(|reader| reader.view(span)))
    }
}
