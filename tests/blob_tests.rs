use channelfold::{BlobStore, BlobStoreError, FsBlobStore};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_put_get_round_trip() {
    let root = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let store = FsBlobStore::new(root.path());

    let source = scratch.path().join("upload.bin");
    fs::write(&source, b"snapshot bytes").unwrap();
    store.put("bucket", "object.json.zip", &source).unwrap();

    let destination = scratch.path().join("download.bin");
    store.get("bucket", "object.json.zip", &destination).unwrap();
    assert_eq!(fs::read(&destination).unwrap(), b"snapshot bytes");
}

#[test]
fn test_list_reports_objects_of_bucket() {
    let root = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let store = FsBlobStore::new(root.path());
    let source = scratch.path().join("upload.bin");
    fs::write(&source, b"12345").unwrap();

    store.put("bucket", "a", &source).unwrap();
    store.put("bucket", "b", &source).unwrap();
    store.put("other", "c", &source).unwrap();

    let mut objects = store.list("bucket").unwrap();
    objects.sort_by(|x, y| x.name.cmp(&y.name));
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0].name, "a");
    assert_eq!(objects[0].size, 5);
    assert_eq!(objects[1].name, "b");
}

#[test]
fn test_missing_bucket_lists_empty() {
    let root = tempdir().unwrap();
    let store = FsBlobStore::new(root.path());
    assert!(store.list("nothing-here").unwrap().is_empty());
}

#[test]
fn test_get_of_missing_object_is_not_found() {
    let root = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let store = FsBlobStore::new(root.path());

    let err = store
        .get("bucket", "missing", &scratch.path().join("out"))
        .unwrap_err();
    assert!(matches!(err, BlobStoreError::NotFound { ref name, .. } if name == "missing"));
}

#[test]
fn test_delete_and_delete_prefix() {
    let root = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let store = FsBlobStore::new(root.path());
    let source = scratch.path().join("upload.bin");
    fs::write(&source, b"x").unwrap();

    for name in ["snap-1", "snap-2", "keep"] {
        store.put("bucket", name, &source).unwrap();
    }

    store.delete("bucket", "keep").unwrap();
    store.delete("bucket", "keep").unwrap();

    let mut deleted = store.delete_prefix("bucket", "snap-").unwrap();
    deleted.sort();
    assert_eq!(deleted, vec!["snap-1", "snap-2"]);
    assert!(store.list("bucket").unwrap().is_empty());
}
