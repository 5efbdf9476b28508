//! State survives every node stopping and restarting, proving the log and
//! state machine are actually durable rather than only replicated in
//! memory.

use std::sync::Arc;
use std::time::Duration;

use chat_client::ChatClient;

use crate::harness::{addresses, spawn_cluster};

#[tokio::test]
async fn state_survives_a_full_cluster_restart() {
    let nodes = spawn_cluster(3).await;
    let client = Arc::new(ChatClient::new(addresses(&nodes)));

    client.register("alice", vec![1]).await.unwrap();
    client.register("bob", vec![2]).await.unwrap();
    client.send_message("alice", "bob", "persist-me").await.unwrap();

    for node in &nodes {
        node.kill();
    }

    // Every node reopens the same data directory it was using before, so
    // this exercises `FileLogStore::open`'s replay path, not a fresh log.
    for node in &nodes {
        node.start();
    }

    tokio::time::sleep(Duration::from_millis(800)).await;

    let messages = client.get_messages("bob", 10).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "persist-me");
}
