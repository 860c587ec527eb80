use json_docstore::{DocStore, FlushPolicy};
use serde_json::{json, Value};

#[tokio::test]
async fn sync_is_the_default() {
    let dir = tempfile::tempdir().unwrap();
    let store = DocStore::open(dir.path()).await.unwrap();
    assert_eq!(store.backend().policy(), FlushPolicy::Sync);
    assert!(FlushPolicy::Sync.syncs());
    assert!(!FlushPolicy::Buffered.syncs());
}

#[tokio::test]
async fn sync_commit_persists() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = DocStore::open_with_policy(dir.path(), FlushPolicy::Sync)
            .await
            .unwrap();
        store.write("orders", &json!([{ "id": 1 }])).await.unwrap();
    }
    let store = DocStore::open(dir.path()).await.unwrap();
    let v: Value = store.read("orders").await.unwrap();
    assert_eq!(v, json!([{ "id": 1 }]));
}

#[tokio::test]
async fn buffered_commit_persists() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = DocStore::builder(dir.path())
            .policy(FlushPolicy::Buffered)
            .build()
            .await
            .unwrap();
        assert_eq!(store.backend().policy(), FlushPolicy::Buffered);
        store
            .update("favorites", |mut v: Vec<u32>| {
                v.push(9);
                Some(v)
            })
            .await
            .unwrap();
    }
    let store = DocStore::open(dir.path()).await.unwrap();
    let v: Vec<u32> = store.read("favorites").await.unwrap();
    assert_eq!(v, vec![9]);
}
