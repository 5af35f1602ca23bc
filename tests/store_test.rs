//! Storage engine tests for the filesystem and in-memory stores.

use widget_consumer::Error;
use widget_consumer::projection::{Instruction, Instructions, Record};
use widget_consumer::store::{
    AttributeStore, FsObjectStore, MemoryAttributeStore, ObjectStore, WriteMode,
};

// ---------------------------------------------------------------------------
// Filesystem object store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fs_write_creates_parent_directories() {
    let root = tempfile::tempdir().unwrap();
    let store = FsObjectStore::new(root.path());

    store.write("widgets/john-doe/w-1", b"{\"a\":1}").await.unwrap();

    let body = std::fs::read(root.path().join("widgets/john-doe/w-1")).unwrap();
    assert_eq!(body, b"{\"a\":1}");
}

#[tokio::test]
async fn fs_write_overwrites() {
    let root = tempfile::tempdir().unwrap();
    let store = FsObjectStore::new(root.path());

    store.write("widgets/a/w-1", b"old").await.unwrap();
    store.write("widgets/a/w-1", b"new").await.unwrap();

    assert_eq!(std::fs::read(root.path().join("widgets/a/w-1")).unwrap(), b"new");
    // No temporary files left behind.
    let entries = std::fs::read_dir(root.path().join("widgets/a")).unwrap().count();
    assert_eq!(entries, 1);
}

#[tokio::test]
async fn fs_remove_twice_succeeds() {
    let root = tempfile::tempdir().unwrap();
    let store = FsObjectStore::new(root.path());
    store.write("widgets/a/w-1", b"x").await.unwrap();

    store.remove("widgets/a/w-1").await.unwrap();
    store.remove("widgets/a/w-1").await.unwrap();
    store.remove("widgets/never/existed").await.unwrap();

    assert!(!root.path().join("widgets/a/w-1").exists());
}

#[tokio::test]
async fn fs_rejects_paths_escaping_root() {
    let root = tempfile::tempdir().unwrap();
    let store = FsObjectStore::new(root.path().join("inner"));

    for path in ["../outside", "/etc/passwd", "widgets/../../x", ""] {
        let err = store.write(path, b"x").await.unwrap_err();
        assert!(matches!(err, Error::Backend(_)), "{path}: got {err:?}");
    }
}

// ---------------------------------------------------------------------------
// Memory attribute store
// ---------------------------------------------------------------------------

fn record(pairs: &[(&str, &str)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn memory_put_if_absent_guards_existing_rows() {
    let store = MemoryAttributeStore::new();
    let row = record(&[("id", "w-1")]);

    store.put_record("w-1", &row, WriteMode::IfAbsent).await.unwrap();
    let err = store
        .put_record("w-1", &row, WriteMode::IfAbsent)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));

    store.put_record("w-1", &row, WriteMode::Overwrite).await.unwrap();
    assert_eq!(store.writes(), 2);
}

#[tokio::test]
async fn memory_apply_update_sets_and_deletes() {
    let store = MemoryAttributeStore::new();
    store
        .put_record(
            "w-1",
            &record(&[("id", "w-1"), ("label", "x"), ("size", "10")]),
            WriteMode::Overwrite,
        )
        .await
        .unwrap();

    let mut instructions = Instructions::new();
    instructions.insert("label".into(), Instruction::Delete);
    instructions.insert("color".into(), Instruction::Set("blue".into()));
    store.apply_update("w-1", &instructions).await.unwrap();

    assert_eq!(
        store.get("w-1").await.unwrap(),
        record(&[("id", "w-1"), ("size", "10"), ("color", "blue")])
    );
}

#[tokio::test]
async fn memory_remove_missing_row_succeeds() {
    let store = MemoryAttributeStore::new();
    store.remove_record("nope").await.unwrap();
    store.remove_record("nope").await.unwrap();
    assert!(!store.exists("nope").await.unwrap());
}
