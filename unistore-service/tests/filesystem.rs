use std::io::Read;

use unistore_service::stream::{collect, from_bytes};
use unistore_service::{Storage, StorageConfig};

async fn storage() -> (Storage, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig::FileSystem {
        path: dir.path().to_path_buf(),
    };
    (Storage::new(config).await.unwrap(), dir)
}

#[tokio::test]
async fn round_trip() {
    let (storage, dir) = storage().await;

    let object = storage
        .put("/notes/today.md", from_bytes("# hello"))
        .await
        .unwrap();
    assert_eq!(object.path.as_str(), "notes/today.md");
    assert_eq!(object.size, 7);
    assert!(dir.path().join("notes/today.md").is_file());

    let mut file = storage.get("notes/today.md").await.unwrap();
    let mut contents = String::new();
    file.read_to_string(&mut contents).unwrap();
    assert_eq!(contents, "# hello");

    let streamed = collect(storage.get_stream("notes/today.md").await.unwrap())
        .await
        .unwrap();
    assert_eq!(streamed.as_ref(), b"# hello");
}

#[tokio::test]
async fn overwrite_replaces_contents() {
    let (storage, _dir) = storage().await;
    storage.put("k.txt", from_bytes("first")).await.unwrap();
    storage.put("k.txt", from_bytes("2nd")).await.unwrap();

    let contents = collect(storage.get_stream("k.txt").await.unwrap())
        .await
        .unwrap();
    assert_eq!(contents.as_ref(), b"2nd");
}

#[tokio::test]
async fn list_by_prefix() {
    let (storage, _dir) = storage().await;
    for key in ["photos/2024/a.jpg", "photos/2024/b.jpg", "photos/2023/c.jpg", "docs/d.txt"] {
        storage.put(key, from_bytes("x")).await.unwrap();
    }

    let keys = |objects: Vec<unistore_service::Object>| {
        let mut keys: Vec<_> = objects.into_iter().map(|o| o.path.into_string()).collect();
        keys.sort();
        keys
    };

    assert_eq!(
        keys(storage.list("photos/2024/").await.unwrap()),
        ["photos/2024/a.jpg", "photos/2024/b.jpg"]
    );
    assert_eq!(
        keys(storage.list("photos").await.unwrap()),
        ["photos/2023/c.jpg", "photos/2024/a.jpg", "photos/2024/b.jpg"]
    );
    assert_eq!(keys(storage.list("").await.unwrap()).len(), 4);
    assert!(storage.list("missing/").await.unwrap().is_empty());
}

#[tokio::test]
async fn list_below_a_file_is_empty() {
    let (storage, _dir) = storage().await;
    storage.put("report", from_bytes("x")).await.unwrap();

    assert!(storage.list("report/2024").await.unwrap().is_empty());
    assert!(storage.list("report/2024/").await.unwrap().is_empty());
    assert_eq!(storage.list("report").await.unwrap().len(), 1);
}

#[tokio::test]
async fn delete_then_get_is_not_found() {
    let (storage, _dir) = storage().await;
    storage.put("gone.bin", from_bytes(vec![1, 2, 3])).await.unwrap();
    storage.delete("gone.bin").await.unwrap();

    assert!(storage.get("gone.bin").await.unwrap_err().is_not_found());
    assert!(storage.delete("gone.bin").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn all_path_forms_address_the_same_key() {
    let (storage, _dir) = storage().await;
    storage.put("dir\\file.txt", from_bytes("same")).await.unwrap();

    for path in [
        "dir/file.txt",
        "/dir/file.txt",
        "https://bucket.example.com/dir/file.txt",
        "//bucket.example.com/dir/file.txt",
    ] {
        let contents = collect(storage.get_stream(path).await.unwrap())
            .await
            .unwrap();
        assert_eq!(contents.as_ref(), b"same", "reading {path}");
    }
}

#[tokio::test]
async fn urls_and_endpoint() {
    let (storage, dir) = storage().await;
    storage.put("a b.txt", from_bytes("x")).await.unwrap();

    let url = storage.get_url("a b.txt").await.unwrap();
    assert!(url.starts_with("file://"), "{url}");
    assert!(url.ends_with("/a%20b.txt"), "{url}");
    assert_eq!(storage.endpoint(), dir.path().display().to_string());
    assert_eq!(storage.backend_name(), "local-fs");
}
