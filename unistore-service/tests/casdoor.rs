use unistore_service::config::CasdoorConfig;
use unistore_service::stream::{collect, from_bytes};
use unistore_service::{Storage, StorageConfig, StorageError};
use unistore_test::casdoor::FakeCasdoor;

const CLIENT_ID: &str = "client";
const CLIENT_SECRET: &str = "s3cret";
const PROVIDER: &str = "provider_storage";

fn config(casdoor: &FakeCasdoor, secret: &str) -> CasdoorConfig {
    CasdoorConfig::new(
        casdoor.endpoint(),
        CLIENT_ID,
        secret,
        "built-in",
        "app-built-in",
        PROVIDER,
    )
}

async fn storage(casdoor: &FakeCasdoor) -> Storage {
    Storage::new(StorageConfig::Casdoor(config(casdoor, CLIENT_SECRET)))
        .await
        .unwrap()
}

#[tokio::test]
async fn rejects_bad_credentials() {
    let casdoor = FakeCasdoor::start(CLIENT_ID, CLIENT_SECRET, PROVIDER);
    let err = Storage::new(StorageConfig::Casdoor(config(&casdoor, "nope")))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Auth(_)), "{err:?}");
}

#[tokio::test]
async fn put_get_and_url() {
    let casdoor = FakeCasdoor::start(CLIENT_ID, CLIENT_SECRET, PROVIDER);
    let storage = storage(&casdoor).await;

    let object = storage
        .put("/avatars/alice.txt", from_bytes("hi"))
        .await
        .unwrap();
    assert_eq!(object.path.as_str(), "avatars/alice.txt");
    assert_eq!(casdoor.file("avatars/alice.txt").unwrap(), b"hi");

    let contents = collect(storage.get_stream("avatars/alice.txt").await.unwrap())
        .await
        .unwrap();
    assert_eq!(contents.as_ref(), b"hi");

    assert_eq!(
        storage.get_url("avatars/alice.txt").await.unwrap(),
        casdoor.file_url("avatars/alice.txt")
    );
}

#[tokio::test]
async fn lists_resources_by_prefix() {
    let casdoor = FakeCasdoor::start(CLIENT_ID, CLIENT_SECRET, PROVIDER);
    casdoor.insert_file("avatars/a.png", b"a");
    casdoor.insert_file("avatars/b.png", b"bb");
    casdoor.insert_file("docs/c.pdf", b"ccc");
    let storage = storage(&casdoor).await;

    let objects = storage.list("avatars").await.unwrap();
    let keys: Vec<_> = objects.iter().map(|o| o.path.as_str()).collect();
    assert_eq!(keys, ["avatars/a.png", "avatars/b.png"]);
    assert_eq!(objects[1].size, 2);
    assert!(objects[0].last_modified.is_some());
}

#[tokio::test]
async fn delete_and_missing() {
    let casdoor = FakeCasdoor::start(CLIENT_ID, CLIENT_SECRET, PROVIDER);
    casdoor.insert_file("old.txt", b"x");
    let storage = storage(&casdoor).await;

    storage.delete("old.txt").await.unwrap();
    assert!(casdoor.file("old.txt").is_none());
    assert!(storage.delete("old.txt").await.unwrap_err().is_not_found());
    assert!(storage.get("old.txt").await.unwrap_err().is_not_found());
}
