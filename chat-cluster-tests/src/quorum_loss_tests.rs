//! Once a 3-node cluster loses quorum, writes never silently succeed —
//! they time out or get rejected — and the cluster recovers cleanly once a
//! majority is restored.

use std::sync::Arc;
use std::time::Duration;

use chat_client::{ChatClient, RetryPolicy};
use chat_common::Error;

use crate::harness::{addresses, spawn_cluster};

#[tokio::test]
async fn a_minority_partition_never_accepts_writes() {
    let nodes = spawn_cluster(3).await;
    let client = Arc::new(ChatClient::with_policy(
        addresses(&nodes),
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(200),
        },
    ));

    client.register("alice", vec![1]).await.unwrap();

    nodes[1].kill();
    nodes[2].kill();

    let result = client.register("carol", vec![3]).await;
    assert!(
        matches!(result, Err(Error::Timeout) | Err(Error::NoLeader) | Err(Error::NotLeader(_))),
        "a write against a minority must never report success, got {result:?}"
    );

    nodes[1].start();
    nodes[2].start();
    tokio::time::sleep(Duration::from_millis(800)).await;

    client.register("carol", vec![3]).await.unwrap();
    let page = client.list_accounts("%", 1, 10).await.unwrap();
    let mut usernames: Vec<String> = page.items.into_iter().map(|a| a.username).collect();
    usernames.sort();
    assert_eq!(usernames, vec!["alice".to_string(), "carol".to_string()]);
}
