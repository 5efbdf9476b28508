//! Registering the same username twice is rejected the second time,
//! deterministically, with exactly one account surviving cluster-wide.

use std::sync::Arc;

use chat_client::ChatClient;
use chat_common::Error;

use crate::harness::{addresses, spawn_cluster};

#[tokio::test]
async fn duplicate_register_is_rejected_and_leaves_one_account() {
    let nodes = spawn_cluster(3).await;
    let client = Arc::new(ChatClient::new(addresses(&nodes)));

    client.register("carol", vec![9]).await.unwrap();

    let second = client.register("carol", vec![9]).await;
    assert!(matches!(second, Err(Error::PreconditionFailed(_))));

    let page = client.list_accounts("carol", 1, 10).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.total, 1);
}
