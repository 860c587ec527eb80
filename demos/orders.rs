use json_docstore::{DocStore, Error, FlushPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Order {
    id: u32,
    user: String,
    total: u32,
}

fn add_order(order: Order) -> impl FnOnce(Vec<Order>) -> Option<Vec<Order>> {
    move |mut orders| {
        orders.push(order);
        Some(orders)
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let root = std::env::temp_dir().join("json_docstore_demo");
    let store = DocStore::builder(&root)
        .policy(FlushPolicy::Buffered)
        .lock_timeout(Some(Duration::from_secs(5)))
        .build()
        .await?;

    // read of a document nobody wrote yet
    let orders: Vec<Order> = store.read("orders").await?;
    println!("orders at start: {}", orders.len());

    // a burst of checkouts landing at the same time
    let tasks: Vec<_> = (1..=8)
        .map(|id| {
            let store = store.clone();
            tokio::spawn(async move {
                let order = Order {
                    id,
                    user: format!("user-{}", id % 3),
                    total: 100 * id,
                };
                store.update("orders", add_order(order)).await
            })
        })
        .collect();
    for t in tasks {
        t.await.expect("checkout task panicked")?;
    }

    let orders: Vec<Order> = store.read("orders").await?;
    println!("orders after burst: {}", orders.len());
    println!("documents: {:?}", store.list().await?);
    println!("file: {}", store.path_of("orders").display());

    // a mutator that gives nothing back is refused
    match store.update("orders", |_: Vec<Order>| None).await {
        Err(e) => println!("refused: {e}"),
        Ok(_) => unreachable!(),
    }

    let _ = std::fs::remove_dir_all(&root);
    Ok(())
}
