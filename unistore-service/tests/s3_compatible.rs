use std::io::Read;

use unistore_service::config::{S3Config, S3Provider, secret};
use unistore_service::stream::{collect, from_bytes};
use unistore_service::{Storage, StorageConfig};
use unistore_test::s3::FakeS3;

async fn storage(s3: &FakeS3) -> Storage {
    let mut config = S3Config::new(S3Provider::Minio, "test-bucket");
    config.endpoint = Some(s3.endpoint());
    config.access_key_id = Some(secret("minioadmin"));
    config.secret_access_key = Some(secret("minioadmin"));
    Storage::new(StorageConfig::S3Compatible(config))
        .await
        .unwrap()
}

#[tokio::test]
async fn put_get_keeps_content_type() {
    let s3 = FakeS3::start("test-bucket");
    let storage = storage(&s3).await;
    assert_eq!(storage.backend_name(), "s3-compatible");

    let object = storage
        .put("https://cdn.example.com/img/logo.png", from_bytes(vec![3u8; 24]))
        .await
        .unwrap();
    assert_eq!(object.path.as_str(), "img/logo.png");
    assert_eq!(object.size, 24);

    let (content_type, contents) = s3.object("img/logo.png").unwrap();
    assert_eq!(content_type, "image/png");
    assert_eq!(contents, vec![3u8; 24]);

    let streamed = collect(storage.get_stream("/img/logo.png").await.unwrap())
        .await
        .unwrap();
    assert_eq!(streamed.as_ref(), &[3u8; 24]);

    let mut file = storage.get("img\\logo.png").await.unwrap();
    let mut read = Vec::new();
    file.read_to_end(&mut read).unwrap();
    assert_eq!(read, vec![3u8; 24]);
}

#[tokio::test]
async fn missing_objects_are_not_found() {
    let s3 = FakeS3::start("test-bucket");
    let storage = storage(&s3).await;

    assert!(storage.get("nope.txt").await.unwrap_err().is_not_found());
    assert!(matches!(storage.get_stream("nope.txt").await, Err(e) if e.is_not_found()));
}

#[tokio::test]
async fn lists_recursively_by_prefix() {
    let s3 = FakeS3::start("test-bucket");
    for key in [
        "photos/2024/a.jpg",
        "photos/2024/b.jpg",
        "photos/2024/trip/c.jpg",
        "photos/2024-d.jpg",
        "photos/2023/e.jpg",
        "docs/f.txt",
    ] {
        s3.insert_object(key, b"image");
    }
    // A directory marker, as created by some S3 consoles.
    s3.insert_object("photos/2024/", b"");
    let storage = storage(&s3).await;

    let objects = storage.list("photos/2024/").await.unwrap();
    let mut keys: Vec<_> = objects.iter().map(|o| o.path.as_str()).collect();
    keys.sort();
    assert_eq!(
        keys,
        ["photos/2024-d.jpg", "photos/2024/a.jpg", "photos/2024/b.jpg", "photos/2024/trip/c.jpg"]
    );
    assert!(objects.iter().all(|o| o.size == 5));
    assert!(objects.iter().all(|o| o.last_modified.is_some()));

    assert_eq!(storage.list("").await.unwrap().len(), 6);
    assert!(storage.list("videos/").await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_then_get_is_not_found() {
    let s3 = FakeS3::start("test-bucket");
    let storage = storage(&s3).await;

    storage.put("tmp/a.bin", from_bytes(vec![1, 2, 3])).await.unwrap();
    storage.delete("/tmp/a.bin").await.unwrap();

    assert!(s3.object("tmp/a.bin").is_none());
    assert!(storage.get("tmp/a.bin").await.unwrap_err().is_not_found());
}
