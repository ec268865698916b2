mod common;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use file_source::Checkpointer;

use common::{assert_no_events, collect, field, message, start_input};

fn append(path: &Path, data: &[u8]) {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    f.write_all(data).unwrap();
    f.sync_all().unwrap();
}

const QUIET: Duration = Duration::from_millis(400);
/// Long enough for the orchestrator to finish discovery and take its
/// starting cursors before a test mutates the files.
const STARTED: Duration = Duration::from_millis(500);

fn tail_config(dir: &Path, seek: bool) -> String {
    let mut config = format!(
        "{{type: file, path: '{}/*.log', interval: 100ms",
        dir.display()
    );
    if seek {
        config.push_str(&format!(", seek_file: {}/seek.db", dir.display()));
    }
    config.push('}');
    config
}

#[tokio::test]
async fn tails_two_files_through_a_symlink() {
    let dir = tempfile::tempdir().unwrap();
    let f1 = dir.path().join("f1.log");
    let f2 = dir.path().join("f2");
    std::fs::File::create(&f1).unwrap();
    std::fs::File::create(&f2).unwrap();
    std::os::unix::fs::symlink(&f2, dir.path().join("f2.log")).unwrap();

    let input = start_input(&tail_config(dir.path(), true));

    append(&f1, b"test 1 1\n");
    let events = collect(&input.events, 1).await;
    assert_eq!(message(&events[0]), "test 1 1");
    assert!(field(&events[0], "path").ends_with("f1.log"));
    assert_eq!(field(&events[0], "host"), "localhost");
    assert_eq!(field(&events[0], "type"), "file");

    // The symlinked file is watched under its resolved path.
    append(&f2, b"test 2 1\n");
    let events = collect(&input.events, 1).await;
    assert_eq!(message(&events[0]), "test 2 1");
    assert!(field(&events[0], "path").ends_with("f2"));

    input.shutdown().await;

    // Offsets for both resolved paths were committed on the way down.
    let db = Checkpointer::open(dir.path().join("seek.db")).unwrap();
    let f1_key = std::fs::canonicalize(&f1).unwrap();
    let f2_key = std::fs::canonicalize(&f2).unwrap();
    assert_eq!(db.get(&f1_key.to_string_lossy()).unwrap().offset, 9);
    assert_eq!(db.get(&f2_key.to_string_lossy()).unwrap().offset, 9);
}

#[tokio::test]
async fn partial_lines_wait_for_their_terminator() {
    let dir = tempfile::tempdir().unwrap();
    let f = dir.path().join("f.log");
    std::fs::File::create(&f).unwrap();

    let input = start_input(&tail_config(dir.path(), true));

    append(&f, b"a\nb");
    let events = collect(&input.events, 1).await;
    assert_eq!(message(&events[0]), "a");
    assert_no_events(&input.events, QUIET).await;

    append(&f, b"\n");
    let events = collect(&input.events, 1).await;
    assert_eq!(message(&events[0]), "b");

    input.shutdown().await;
}

#[tokio::test]
async fn truncation_rewinds_to_byte_zero() {
    let dir = tempfile::tempdir().unwrap();
    let f = dir.path().join("f.log");
    std::fs::File::create(&f).unwrap();

    let input = start_input(&tail_config(dir.path(), true));

    append(&f, b"0123456789\nprevious 2\n");
    let events = collect(&input.events, 2).await;
    assert_eq!(message(&events[0]), "0123456789");

    // Same inode, smaller size: a truncate, not a rotation.
    std::fs::write(&f, b"x\n").unwrap();
    let events = collect(&input.events, 1).await;
    assert_eq!(message(&events[0]), "x");
    assert_no_events(&input.events, QUIET).await;

    input.shutdown().await;
}

#[tokio::test]
async fn rename_rotation_is_picked_up() {
    let dir = tempfile::tempdir().unwrap();
    let f = dir.path().join("f.log");
    std::fs::File::create(&f).unwrap();

    let input = start_input(&tail_config(dir.path(), true));

    append(&f, b"old 1\nold 2\n");
    collect(&input.events, 2).await;

    // Replace the file behind the path with a new inode.
    let replacement = dir.path().join("f.log.new");
    std::fs::write(&replacement, b"y\n").unwrap();
    std::fs::rename(&replacement, &f).unwrap();

    let events = collect(&input.events, 1).await;
    assert_eq!(message(&events[0]), "y");
    assert_no_events(&input.events, QUIET).await;

    input.shutdown().await;

    // The committed cursor covers only the new file's bytes.
    let db = Checkpointer::open(dir.path().join("seek.db")).unwrap();
    let key = std::fs::canonicalize(&f).unwrap();
    assert_eq!(db.get(&key.to_string_lossy()).unwrap().offset, 2);
}

#[tokio::test]
async fn restart_resumes_from_the_committed_offset() {
    let dir = tempfile::tempdir().unwrap();
    let f = dir.path().join("f.log");
    std::fs::File::create(&f).unwrap();
    let config = tail_config(dir.path(), true);

    let input = start_input(&config);
    append(&f, b"a\nb\n");
    let events = collect(&input.events, 2).await;
    assert_eq!(message(&events[0]), "a");
    assert_eq!(message(&events[1]), "b");
    input.shutdown().await;

    // Written while the agent was down.
    append(&f, b"c\n");

    let input = start_input(&config);
    let events = collect(&input.events, 1).await;
    assert_eq!(message(&events[0]), "c");
    assert_no_events(&input.events, QUIET).await;
    input.shutdown().await;
}

#[tokio::test]
async fn no_seek_db_forces_start_from_end() {
    let dir = tempfile::tempdir().unwrap();
    let f = dir.path().join("f.log");
    std::fs::write(&f, b"before the agent started\n").unwrap();

    let input = start_input(&tail_config(dir.path(), false));
    tokio::time::sleep(STARTED).await;

    append(&f, b"after\n");
    let events = collect(&input.events, 1).await;
    assert_eq!(message(&events[0]), "after");
    assert_no_events(&input.events, QUIET).await;

    input.shutdown().await;
}

#[tokio::test]
async fn read_mode_stops_at_eof() {
    let dir = tempfile::tempdir().unwrap();
    let f = dir.path().join("f.log");
    std::fs::write(&f, b"one\ntwo\n").unwrap();

    let input = start_input(&format!(
        "{{type: file, path: '{}/*.log', interval: 100ms, mode: read}}",
        dir.path().display()
    ));

    let events = collect(&input.events, 2).await;
    assert_eq!(message(&events[0]), "one");
    assert_eq!(message(&events[1]), "two");

    // The input finishes on its own, no cancellation needed.
    tokio::time::timeout(Duration::from_secs(5), input.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn stale_seek_records_are_pruned_on_save() {
    let dir = tempfile::tempdir().unwrap();
    let seek = dir.path().join("seek.db");
    {
        let mut db = Checkpointer::open(&seek).unwrap();
        db.set("/nowhere/gone.log", file_source::SeekRecord::default());
        db.save().unwrap();
        db.close();
    }

    let f = dir.path().join("f.log");
    std::fs::File::create(&f).unwrap();
    let input = start_input(&tail_config(dir.path(), true));
    tokio::time::sleep(STARTED).await;
    input.shutdown().await;

    let db = Checkpointer::open(&seek).unwrap();
    assert!(!db.is_present("/nowhere/gone.log"));
    let key = std::fs::canonicalize(&f).unwrap();
    assert!(db.is_present(&key.to_string_lossy()));
}
