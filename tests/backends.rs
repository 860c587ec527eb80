use json_docstore::{DocStore, DocStoreBuilder, FlushPolicy, MemoryBackend, MemoryStore, StorageBackend};
use serde_json::{json, Value};

async fn memory_store() -> MemoryStore {
    DocStoreBuilder::with_backend(MemoryBackend::new())
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn memory_read_write_update() {
    let store = memory_store().await;
    let empty: Value = store.read("products").await.unwrap();
    assert_eq!(empty, json!([]));
    assert!(store.list().await.unwrap().is_empty());

    store.write("products", &json!([{ "sku": "b-1" }])).await.unwrap();
    let v: Value = store
        .update("products", |mut v: Value| {
            v.as_array_mut()?.push(json!({ "sku": "b-2" }));
            Some(v)
        })
        .await
        .unwrap();
    assert_eq!(v, json!([{ "sku": "b-1" }, { "sku": "b-2" }]));
    assert_eq!(store.list().await.unwrap(), vec!["products".to_string()]);
}

#[tokio::test]
async fn memory_stores_pretty_bytes() {
    let store = memory_store().await;
    store.write("users", &json!([{ "id": 1 }])).await.unwrap();
    let raw = store.backend().raw("users").unwrap();
    let text = String::from_utf8(raw).unwrap();
    assert!(text.contains("\n  {"));
}

#[tokio::test]
async fn memory_sweeps_on_build() {
    let backend = MemoryBackend::new();
    backend
        .write_staged(&json_docstore::persist::stage_for("orders"), b"[")
        .await
        .unwrap();
    let store = DocStoreBuilder::with_backend(backend).build().await.unwrap();
    assert!(store.backend().staged().await.unwrap().is_empty());
}

#[tokio::test]
async fn list_is_sorted() {
    let store = memory_store().await;
    for key in ["users", "brands", "orders", "chats"] {
        store.write(key, &json!([])).await.unwrap();
    }
    assert_eq!(
        store.list().await.unwrap(),
        vec!["brands", "chats", "orders", "users"]
    );
}

#[tokio::test]
async fn memory_and_files_agree() {
    let dir = tempfile::tempdir().unwrap();
    let files = DocStore::open_with_policy(dir.path(), FlushPolicy::Buffered)
        .await
        .unwrap();
    let memory = memory_store().await;

    let doc = json!({ "open": true, "members": [1, 2, 3] });
    files.write("chat-1", &doc).await.unwrap();
    memory.write("chat-1", &doc).await.unwrap();

    assert_eq!(
        std::fs::read(files.path_of("chat-1")).unwrap(),
        memory.backend().raw("chat-1").unwrap()
    );
}
