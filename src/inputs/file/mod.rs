use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use file_source::checkpointer::{CheckpointEvent, Checkpointer, Committer, SeekRecord};
use file_source::fsnode::Fsnode;
use file_source::{FilePosition, FileWatcher};
use serde::Deserialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::Input;
use crate::codecs::{self, Codec};
use crate::config::{ByteSize, Common, ConfigRaw};
use crate::event::Event;

pub const NAME: &str = "file";

/// Lines read between checkpoints and cancellation checks.
const CHECKPOINT_LINES: u64 = 20;
/// Bounded retry while a watched path is momentarily absent at startup.
const RESOLVE_ATTEMPTS: u32 = 5;
const RESOLVE_DELAY: Duration = Duration::from_millis(500);
const MAX_INTERVAL: Duration = Duration::from_secs(20);

fn default_read_buffer() -> ByteSize {
    ByteSize(64 * 1024)
}

fn default_interval() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Keep polling the file for growth, truncation and recreation.
    #[default]
    Tail,
    /// One pass to end-of-file, then stop.
    Read,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(rename = "type")]
    pub type_name: String,
    /// Glob of files to watch.
    pub path: String,
    #[serde(default = "default_read_buffer")]
    pub read_buffer: ByteSize,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default = "default_interval", deserialize_with = "crate::config::duration")]
    pub interval: Duration,
    #[serde(default)]
    pub mode: ReadMode,
    /// Start new files from their current end instead of byte 0.
    #[serde(default)]
    pub start_end: bool,
    /// Seek database path; empty disables offset persistence and forces
    /// `start_end`.
    #[serde(default)]
    pub seek_file: String,
    /// Overrides the `name` field the codec stamps on events.
    #[serde(default)]
    pub name: Option<String>,
}

pub struct FileInput {
    cfg: FileConfig,
    raw: ConfigRaw,
    common: Common,
}

pub fn new(cfg: &ConfigRaw, common: &Common) -> crate::Result<Box<dyn Input>> {
    let parsed: FileConfig = cfg
        .decode()
        .map_err(|e| format!("input '{NAME}': {e}"))?;
    if parsed.path.is_empty() {
        return Err(format!("input '{NAME}': path not set").into());
    }
    if parsed.interval > MAX_INTERVAL {
        return Err(format!("input '{NAME}': interval must be <= 20s").into());
    }
    if parsed.read_buffer.0 == 0 {
        return Err(format!("input '{NAME}': read_buffer must not be 0").into());
    }
    // Reject broken codec config before any file is touched.
    codecs::create(cfg, common, &parsed.path)
        .map_err(|e| format!("input '{NAME}' path='{}': {e}", parsed.path))?;

    Ok(Box::new(FileInput {
        cfg: parsed,
        raw: cfg.clone(),
        common: common.clone(),
    }))
}

/// One resolved path ready to be watched.
struct WatchEntry {
    path: PathBuf,
    key: String,
    node: Fsnode,
    offset: FilePosition,
}

#[async_trait]
impl Input for FileInput {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(
        self: Box<Self>,
        token: CancellationToken,
        out: flume::Sender<Event>,
    ) -> crate::Result<()> {
        let mut cfg = self.cfg.clone();
        if cfg.mode == ReadMode::Read {
            cfg.start_end = false;
        }

        let mut db = if cfg.seek_file.is_empty() {
            if cfg.mode == ReadMode::Tail && !cfg.start_end {
                warn!(
                    message = "seek file not set, forcing start from end",
                    input = NAME,
                    path = %cfg.path,
                );
                cfg.start_end = true;
            }
            None
        } else {
            Some(Checkpointer::open(&cfg.seek_file)?)
        };

        let entries = resolve_matches(&token, &cfg, db.as_ref()).await?;

        if let Some(db) = &mut db {
            let keep: HashSet<&str> = entries.iter().map(|e| e.key.as_str()).collect();
            db.retain(|path| keep.contains(path));
            for entry in &entries {
                db.set(entry.key.clone(), SeekRecord::new(&entry.node, entry.offset));
            }
            db.save()?;
        }

        let watched = entries.len();
        if watched == 0 {
            warn!(message = "no files matched", input = NAME, path = %cfg.path);
        }

        let mut tasks: JoinSet<crate::Result<()>> = JoinSet::new();

        let stat_tx = match db {
            Some(db) => {
                let (tx, rx) = flume::bounded(10 * entries.len().max(1));
                let committer =
                    Committer::new(db, entries.len().max(1) as u64, 2 * cfg.interval);
                let committer_token = token.clone();
                tasks.spawn(async move {
                    committer
                        .run(committer_token, rx)
                        .await
                        .map_err(crate::Error::from)
                });
                Some(tx)
            }
            None => None,
        };

        for entry in entries {
            let task = WatchTask {
                token: token.clone(),
                cfg: cfg.clone(),
                raw: self.raw.clone(),
                common: self.common.clone(),
                out: out.clone(),
                stat_tx: stat_tx.clone(),
            };
            tasks.spawn(task.run(entry));
        }
        // In tail mode an agent with nothing to watch still stays up until
        // shutdown; holding the checkpoint sender keeps the committer up
        // with it.
        if watched == 0 && cfg.mode == ReadMode::Tail {
            token.cancelled().await;
        }
        // The committer sees its channel close once the last watcher drops
        // its sender.
        drop(stat_tx);
        drop(out);

        let mut first_error: Option<crate::Error> = None;
        while let Some(result) = tasks.join_next().await {
            let result = result.unwrap_or_else(|e| Err(format!("watcher panicked: {e}").into()));
            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                }
                token.cancel();
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Glob-expand the configured path, resolve symlinks, drop duplicates and
/// directories, and work out each file's starting cursor.
async fn resolve_matches(
    token: &CancellationToken,
    cfg: &FileConfig,
    db: Option<&Checkpointer>,
) -> crate::Result<Vec<WatchEntry>> {
    let mut entries = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let matches = glob::glob(&cfg.path).map_err(|e| format!("glob expand failed: {e}"))?;
    for entry in matches {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                error!(message = "glob entry failed", input = NAME, error = %e);
                continue;
            }
        };
        let resolved = match resolve_path(token, &path).await {
            Ok(resolved) => resolved,
            Err(e) => {
                error!(
                    message = "eval symlink failed",
                    input = NAME,
                    file = %path.display(),
                    error = %e,
                );
                continue;
            }
        };
        let metadata = match tokio::fs::metadata(&resolved).await {
            Ok(metadata) => metadata,
            Err(e) => {
                error!(
                    message = "stat failed",
                    input = NAME,
                    file = %resolved.display(),
                    error = %e,
                );
                continue;
            }
        };
        if metadata.is_dir() {
            warn!(message = "dir skipping", input = NAME, file = %resolved.display());
            continue;
        }
        let key = resolved.to_string_lossy().into_owned();
        if !seen.insert(key.clone()) {
            continue;
        }
        let node = Fsnode::from(&metadata);
        let offset = initial_offset(cfg, db, &key, &node);
        entries.push(WatchEntry {
            path: resolved,
            key,
            node,
            offset,
        });
    }
    Ok(entries)
}

/// The starting cursor for one file: a persisted offset when it still names
/// the same inode, otherwise 0 for a file that was replaced while we were
/// down, end-of-file for a first sighting under `start_end`, 0 otherwise.
fn initial_offset(
    cfg: &FileConfig,
    db: Option<&Checkpointer>,
    key: &str,
    node: &Fsnode,
) -> FilePosition {
    match db.and_then(|db| db.get(key)) {
        Some(record) if record.inode == node.ino => record.offset,
        Some(_) => 0,
        None if cfg.start_end => node.size,
        None => 0,
    }
}

/// Retry a few times when the path is momentarily absent (the agent may
/// start mid-rotation), then resolve symlinks.
async fn resolve_path(token: &CancellationToken, path: &Path) -> std::io::Result<PathBuf> {
    for _ in 0..RESOLVE_ATTEMPTS {
        if tokio::fs::metadata(path).await.is_ok() {
            break;
        }
        tokio::select! {
            _ = token.cancelled() => return Ok(path.to_path_buf()),
            _ = tokio::time::sleep(RESOLVE_DELAY) => {}
        }
    }
    tokio::fs::canonicalize(path).await
}

enum ReadEnd {
    Eof,
    Cancelled,
    /// The read failed and the handle was dropped; the tail loop reopens on
    /// its next tick.
    Failed,
    /// The event channel went away under us, which only happens when the
    /// rest of the pipeline died.
    Disconnected,
}

struct WatchTask {
    token: CancellationToken,
    cfg: FileConfig,
    raw: ConfigRaw,
    common: Common,
    out: flume::Sender<Event>,
    stat_tx: Option<flume::Sender<CheckpointEvent>>,
}

impl WatchTask {
    async fn run(self, entry: WatchEntry) -> crate::Result<()> {
        let mut codec = match codecs::create(&self.raw, &self.common, &entry.key) {
            Ok(codec) => codec,
            Err(e) => {
                error!(
                    message = "codec init failed",
                    input = NAME,
                    file = %entry.key,
                    error = %e,
                );
                return Err(e);
            }
        };

        // The path was resolved at discovery time but may have changed
        // since; a directory here means the watcher cannot continue.
        let metadata = match tokio::fs::metadata(&entry.path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                error!(message = "stat failed", input = NAME, file = %entry.key, error = %e);
                return Err(e.into());
            }
        };
        if metadata.is_dir() {
            error!(message = "not a file", input = NAME, file = %entry.key);
            return Err(format!("'{}' is a directory, not a file", entry.key).into());
        }

        let mut watcher = FileWatcher::new(
            entry.path.clone(),
            entry.node,
            entry.offset,
            self.cfg.read_buffer.0,
        );
        match watcher.check().await {
            Ok(flags) => {
                if flags.truncated {
                    debug!(message = "reopen truncated", input = NAME, file = %entry.key);
                } else if flags.recreated {
                    debug!(message = "reopen recreated", input = NAME, file = %entry.key);
                }
            }
            Err(e) => {
                error!(message = "open failed", input = NAME, file = %entry.key, error = %e);
                return Err(e.into());
            }
        }

        match self.read_until_eof(&mut watcher, &mut codec, &entry.key).await {
            ReadEnd::Cancelled => return Ok(()),
            ReadEnd::Disconnected => return Err("event channel closed".into()),
            ReadEnd::Eof | ReadEnd::Failed => {}
        }

        if self.cfg.mode == ReadMode::Read {
            debug!(message = "read pass finished", input = NAME, file = %entry.key);
            return Ok(());
        }

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    debug!(message = "file watch shutdown", input = NAME, file = %entry.key);
                    return Ok(());
                }
                _ = tokio::time::sleep(self.cfg.interval) => {}
            }

            if watcher.is_open() {
                match watcher.size().await {
                    Ok(size) if size > watcher.offset() => {
                        match self.read_until_eof(&mut watcher, &mut codec, &entry.key).await {
                            ReadEnd::Cancelled => return Ok(()),
                            ReadEnd::Disconnected => return Err("event channel closed".into()),
                            ReadEnd::Eof | ReadEnd::Failed => {}
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(message = "fstat failed", input = NAME, file = %entry.key, error = %e);
                        watcher.close();
                    }
                }
            }

            match watcher.check().await {
                Ok(flags) => {
                    if flags.truncated || flags.recreated {
                        if flags.truncated {
                            debug!(message = "reopen truncated", input = NAME, file = %entry.key);
                        } else {
                            debug!(message = "reopen recreated", input = NAME, file = %entry.key);
                        }
                        match self.read_until_eof(&mut watcher, &mut codec, &entry.key).await {
                            ReadEnd::Cancelled => return Ok(()),
                            ReadEnd::Disconnected => return Err("event channel closed".into()),
                            ReadEnd::Eof | ReadEnd::Failed => {}
                        }
                    }
                }
                Err(e) => {
                    error!(message = "open failed", input = NAME, file = %entry.key, error = %e);
                }
            }
        }
    }

    /// Drain the file to EOF: read lines, feed the codec, forward events
    /// (blocking sends are the backpressure), checkpoint every
    /// [`CHECKPOINT_LINES`] lines plus once at the end if anything was read.
    async fn read_until_eof(
        &self,
        watcher: &mut FileWatcher,
        codec: &mut Box<dyn Codec>,
        key: &str,
    ) -> ReadEnd {
        if self.token.is_cancelled() {
            return ReadEnd::Cancelled;
        }
        let timestamp = Utc::now();
        let mut processed: u64 = 0;
        let outcome = loop {
            let parsed = match watcher.read_line().await {
                Ok(Some(line)) => {
                    processed += 1;
                    codec.parse(timestamp, line)
                }
                Ok(None) => break ReadEnd::Eof,
                Err(e) => {
                    error!(message = "read failed", input = NAME, file = %key, error = %e);
                    watcher.close();
                    break ReadEnd::Failed;
                }
            };
            match parsed {
                Ok(Some(event)) => {
                    if self.out.send_async(event).await.is_err() {
                        break ReadEnd::Disconnected;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(message = "parse failed", input = NAME, file = %key, error = %e);
                }
            }
            if processed >= CHECKPOINT_LINES {
                self.send_checkpoint(watcher, key).await;
                processed = 0;
                if self.token.is_cancelled() {
                    break ReadEnd::Cancelled;
                }
            }
        };
        if processed > 0 {
            self.send_checkpoint(watcher, key).await;
        }
        outcome
    }

    async fn send_checkpoint(&self, watcher: &FileWatcher, key: &str) {
        if let Some(stat_tx) = &self.stat_tx {
            let event = CheckpointEvent {
                path: key.to_string(),
                record: SeekRecord::new(watcher.node(), watcher.offset()),
            };
            if stat_tx.send_async(event).await.is_err() {
                debug!(message = "checkpoint channel closed", input = NAME, file = %key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::config::{ByteSize, Common, ConfigRaw};

    use super::ReadMode;

    fn common() -> Common {
        Common {
            hostname: "localhost".to_string(),
        }
    }

    #[test]
    fn defaults() {
        let raw: ConfigRaw =
            serde_yaml::from_str("{type: file, path: '/var/log/*.log'}").unwrap();
        let cfg: super::FileConfig = raw.decode().unwrap();
        assert_eq!(cfg.read_buffer, ByteSize(65536));
        assert_eq!(cfg.interval, Duration::from_secs(1));
        assert_eq!(cfg.mode, ReadMode::Tail);
        assert!(!cfg.start_end);
        assert!(cfg.seek_file.is_empty());
        super::new(&raw, &common()).unwrap();
    }

    #[test]
    fn full_config() {
        let raw: ConfigRaw = serde_yaml::from_str(
            "{type: file, path: '/var/log/*.log', read_buffer: 12k, interval: 5s, \
             start_end: true, seek_file: /var/lib/logship/seek, mode: read}",
        )
        .unwrap();
        let cfg: super::FileConfig = raw.decode().unwrap();
        assert_eq!(cfg.read_buffer, ByteSize(12288));
        assert_eq!(cfg.interval, Duration::from_secs(5));
        assert_eq!(cfg.mode, ReadMode::Read);
        assert!(cfg.start_end);
        assert_eq!(cfg.seek_file, "/var/lib/logship/seek");
    }

    #[test]
    fn rejects_missing_path_and_silly_intervals() {
        let raw: ConfigRaw = serde_yaml::from_str("{type: file}").unwrap();
        assert!(super::new(&raw, &common()).is_err());

        let raw: ConfigRaw =
            serde_yaml::from_str("{type: file, path: x, interval: 30s}").unwrap();
        let err = super::new(&raw, &common()).unwrap_err().to_string();
        assert!(err.contains("interval"));
    }

    #[test]
    fn rejects_unknown_keys() {
        let raw: ConfigRaw =
            serde_yaml::from_str("{type: file, path: x, follow: true}").unwrap();
        assert!(super::new(&raw, &common()).is_err());
    }

    #[test]
    fn rejects_unknown_codec() {
        let raw: ConfigRaw =
            serde_yaml::from_str("{type: file, path: x, codec: msgpack}").unwrap();
        let err = super::new(&raw, &common()).unwrap_err().to_string();
        assert!(err.contains("'msgpack' codec does not exist"));
    }
}
