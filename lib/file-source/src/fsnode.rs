use std::fs::Metadata;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Filesystem identity plus the sizes the tailer cares about. Two nodes name
/// the same file when `dev` and `ino` agree; an inode of 0 means no prior
/// knowledge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fsnode {
    pub dev: u64,
    pub ino: u64,
    pub nlink: u64,
    pub size: u64,
}

impl Fsnode {
    pub fn same(&self, other: &Fsnode) -> bool {
        self.dev == other.dev && self.ino == other.ino
    }

    pub fn is_unknown(&self) -> bool {
        self.ino == 0
    }
}

impl From<&Metadata> for Fsnode {
    fn from(metadata: &Metadata) -> Self {
        Fsnode {
            dev: metadata.dev(),
            ino: metadata.ino(),
            nlink: metadata.nlink(),
            size: metadata.len(),
        }
    }
}

/// Stat the path without following a trailing symlink.
pub async fn lstat(path: &Path) -> io::Result<Fsnode> {
    tokio::fs::symlink_metadata(path)
        .await
        .map(|metadata| Fsnode::from(&metadata))
}

/// Stat the path, following symlinks.
pub async fn stat(path: &Path) -> io::Result<Fsnode> {
    tokio::fs::metadata(path)
        .await
        .map(|metadata| Fsnode::from(&metadata))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{lstat, stat, Fsnode};

    #[tokio::test]
    async fn stat_reports_size_and_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"hello\n").unwrap();

        let node = stat(&path).await.unwrap();
        assert_eq!(node.size, 6);
        assert_eq!(node.nlink, 1);
        assert!(!node.is_unknown());
        assert!(node.same(&stat(&path).await.unwrap()));

        let other_path = dir.path().join("b.log");
        std::fs::File::create(&other_path).unwrap();
        let other = stat(&other_path).await.unwrap();
        assert!(!node.same(&other));
    }

    #[tokio::test]
    async fn lstat_does_not_follow_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        let link = dir.path().join("link");
        std::fs::write(&target, b"x").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let direct = lstat(&target).await.unwrap();
        let through = stat(&link).await.unwrap();
        let raw = lstat(&link).await.unwrap();
        assert!(direct.same(&through));
        assert!(!direct.same(&raw));
    }

    #[test]
    fn unknown_default() {
        assert!(Fsnode::default().is_unknown());
    }
}
