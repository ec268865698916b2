use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::{Buf, BufMut};
use fs2::FileExt;
use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::fsnode::Fsnode;
use crate::FilePosition;

/// Longest path accepted in a seek record. A length outside `1..=1024` on
/// disk is a corruption signal, not a record.
pub const MAX_PATH_LEN: u64 = 1024;

const U64_LEN: usize = 8;

/// The persisted state for one watched path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekRecord {
    pub inode: u64,
    pub offset: FilePosition,
}

impl SeekRecord {
    pub fn new(node: &Fsnode, offset: FilePosition) -> Self {
        SeekRecord {
            inode: node.ino,
            offset,
        }
    }
}

/// A checkpoint message from a watcher to the committer.
#[derive(Debug, Clone)]
pub struct CheckpointEvent {
    pub path: String,
    pub record: SeekRecord,
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to open seek database {}: {source}", path.display()))]
    Open { path: PathBuf, source: io::Error },
    #[snafu(display("seek database {} is locked by another process", path.display()))]
    Locked { path: PathBuf },
    #[snafu(display("failed to read seek database {}: {source}", path.display()))]
    Read { path: PathBuf, source: io::Error },
    #[snafu(display("seek database {} is corrupt: path length {len} out of range", path.display()))]
    InvalidPathLen { path: PathBuf, len: u64 },
    #[snafu(display("seek database {} ends mid-record", path.display()))]
    UnexpectedEnd { path: PathBuf },
    #[snafu(display("failed to save seek database {}: {source}", path.display()))]
    Save { path: PathBuf, source: io::Error },
}

/// A crash-tolerant `path -> {inode, offset}` store backed by a single
/// binary file held under an advisory exclusive lock for the lifetime of
/// this value.
///
/// The on-disk format is a plain repetition of little-endian records,
/// `u64 path_len | path | u64 inode | u64 offset`, with no header and no
/// ordering. Saves rewrite the whole file in place: the file is itself the
/// lock target, so the write-sibling-and-rename trick would swap the locked
/// inode out from under the running process. A save interrupted by a crash
/// is caught at the next load by the `path_len` range check.
pub struct Checkpointer {
    file: File,
    path: PathBuf,
    buf: Vec<u8>,
    records: HashMap<String, SeekRecord>,
}

impl Checkpointer {
    /// Create or open the database file, take the exclusive lock, and load
    /// existing records. Failing to lock fails the open: two agents must not
    /// share seek state.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o666)
            .open(&path)
            .context(OpenSnafu { path: path.clone() })?;
        if file.try_lock_exclusive().is_err() {
            return LockedSnafu { path }.fail();
        }

        let mut checkpointer = Checkpointer {
            file,
            path,
            buf: Vec::new(),
            records: HashMap::new(),
        };
        checkpointer.load()?;
        Ok(checkpointer)
    }

    fn load(&mut self) -> Result<(), Error> {
        self.records.clear();

        let mut raw = Vec::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_end(&mut raw))
            .context(ReadSnafu {
                path: self.path.clone(),
            })?;

        let mut buf = raw.as_slice();
        while !buf.is_empty() {
            if buf.len() < U64_LEN {
                return UnexpectedEndSnafu {
                    path: self.path.clone(),
                }
                .fail();
            }
            let len = buf.get_u64_le();
            if !(1..=MAX_PATH_LEN).contains(&len) {
                return InvalidPathLenSnafu {
                    path: self.path.clone(),
                    len,
                }
                .fail();
            }
            let len = len as usize;
            if buf.len() < len + 2 * U64_LEN {
                return UnexpectedEndSnafu {
                    path: self.path.clone(),
                }
                .fail();
            }
            let path = String::from_utf8_lossy(&buf[..len]).into_owned();
            buf.advance(len);
            let inode = buf.get_u64_le();
            let offset = buf.get_u64_le();
            self.records.insert(path, SeekRecord { inode, offset });
        }
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<SeekRecord> {
        self.records.get(path).copied()
    }

    pub fn set(&mut self, path: impl Into<String>, record: SeekRecord) {
        self.records.insert(path.into(), record);
    }

    pub fn is_present(&self, path: &str) -> bool {
        self.records.contains_key(path)
    }

    /// Drop records whose path does not satisfy `keep`. Used at startup to
    /// forget paths no watcher subscribes to; the disk reflects the pruning
    /// at the next save.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.records.retain(|path, _| keep(path));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize the whole map, truncate, rewrite and fsync the backing file.
    pub fn save(&mut self) -> Result<(), Error> {
        self.buf.clear();
        for (path, record) in &self.records {
            self.buf.put_u64_le(path.len() as u64);
            self.buf.extend_from_slice(path.as_bytes());
            self.buf.put_u64_le(record.inode);
            self.buf.put_u64_le(record.offset);
        }

        self.file
            .set_len(self.buf.len() as u64)
            .and_then(|_| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| self.file.write_all(&self.buf))
            .and_then(|_| self.file.sync_all())
            .context(SaveSnafu {
                path: self.path.clone(),
            })
    }

    /// Drop the in-memory map and close the file, releasing the lock.
    pub fn close(mut self) {
        self.records.clear();
    }
}

/// The dedicated task that owns a [`Checkpointer`] and applies checkpoint
/// events streamed from the watchers.
///
/// Saves happen every `flush_every` events; a failed save leaves a dirty
/// flag set and is retried at the next checkpoint. On cancellation or when
/// the channel closes the committer drains remaining events for at most
/// `drain_timeout`, makes a final save attempt if dirty, and closes the
/// database.
pub struct Committer {
    db: Checkpointer,
    flush_every: u64,
    drain_timeout: Duration,
}

impl Committer {
    pub fn new(db: Checkpointer, flush_every: u64, drain_timeout: Duration) -> Self {
        Committer {
            db,
            flush_every: flush_every.max(1),
            drain_timeout,
        }
    }

    pub async fn run(
        mut self,
        token: CancellationToken,
        events: flume::Receiver<CheckpointEvent>,
    ) -> Result<(), Error> {
        let mut seen: u64 = 0;
        let mut dirty = false;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv_async() => match event {
                    Ok(event) => self.apply(event, &mut seen, &mut dirty),
                    Err(_) => break,
                },
            }
        }

        // Drain: accept stragglers until the timeout elapses or the channel
        // truly empties out.
        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                event = events.recv_async() => match event {
                    Ok(event) => self.apply(event, &mut seen, &mut dirty),
                    Err(_) => break,
                },
            }
        }

        if dirty {
            if let Err(e) = self.db.save() {
                error!(message = "final seek database save failed", error = %e);
                self.db.close();
                return Err(e);
            }
        }
        debug!(message = "seek database committer stopped", checkpoints = seen);
        self.db.close();
        Ok(())
    }

    fn apply(&mut self, event: CheckpointEvent, seen: &mut u64, dirty: &mut bool) {
        self.db.set(event.path, event.record);
        *dirty = true;
        *seen += 1;
        if *seen % self.flush_every == 0 {
            match self.db.save() {
                Ok(()) => *dirty = false,
                Err(e) => error!(message = "seek database save failed", error = %e),
            }
        }
    }
}
