use unistore_service::config::GcsConfig;
use unistore_service::stream::{collect, from_bytes};
use unistore_service::{Storage, StorageConfig};
use unistore_test::gcs::FakeGcs;

async fn storage(gcs: &FakeGcs) -> Storage {
    let mut config = GcsConfig::new("test-bucket");
    config.endpoint = Some(gcs.endpoint());
    Storage::new(StorageConfig::Gcs(config)).await.unwrap()
}

#[tokio::test]
async fn put_and_get() {
    let gcs = FakeGcs::start("test-bucket");
    let storage = storage(&gcs).await;

    let object = storage
        .put("https://storage.googleapis.com/img/logo.png", from_bytes(vec![0u8; 16]))
        .await
        .unwrap();
    assert_eq!(object.path.as_str(), "img/logo.png");
    assert_eq!(object.size, 16);

    let (content_type, contents) = gcs.object("img/logo.png").unwrap();
    assert_eq!(content_type, "image/png");
    assert_eq!(contents.len(), 16);

    let read = collect(storage.get_stream("img/logo.png").await.unwrap())
        .await
        .unwrap();
    assert_eq!(read.len(), 16);
}

#[tokio::test]
async fn follows_list_pages() {
    let gcs = FakeGcs::start("test-bucket");
    for name in ["logs/1", "logs/2", "logs/3", "logs/4", "logs/5", "other"] {
        gcs.insert_object(name, b"entry");
    }
    let storage = storage(&gcs).await;

    let objects = storage.list("logs/").await.unwrap();
    let keys: Vec<_> = objects.iter().map(|o| o.path.as_str()).collect();
    assert_eq!(keys, ["logs/1", "logs/2", "logs/3", "logs/4", "logs/5"]);
    assert!(objects.iter().all(|o| o.size == 5));
    assert_eq!(gcs.list_requests(), 3);
}

#[tokio::test]
async fn delete_and_missing() {
    let gcs = FakeGcs::start("test-bucket");
    gcs.insert_object("dir/x", b"x");
    let storage = storage(&gcs).await;

    storage.delete("/dir/x").await.unwrap();
    assert!(gcs.object("dir/x").is_none());
    assert!(storage.get("dir/x").await.unwrap_err().is_not_found());
    assert!(storage.delete("dir/x").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn public_urls() {
    let gcs = FakeGcs::start("test-bucket");
    let storage = storage(&gcs).await;

    assert_eq!(
        storage.get_url("dir/a.txt").await.unwrap(),
        "https://storage.googleapis.com/test-bucket/dir/a.txt"
    );
    assert_eq!(storage.endpoint(), gcs.endpoint());
}
