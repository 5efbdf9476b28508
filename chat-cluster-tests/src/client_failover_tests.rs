//! A client configured with every cluster address keeps working after the
//! address it happened to be using goes away, needing at most one
//! redirect-and-reconnect.

use std::sync::Arc;
use std::time::Duration;

use chat_client::ChatClient;

use crate::harness::{addresses, find_leader, spawn_cluster};

#[tokio::test]
async fn client_fails_over_when_its_current_server_disappears() {
    let nodes = spawn_cluster(3).await;
    let client = Arc::new(ChatClient::new(addresses(&nodes)));

    client.register("dave", vec![1]).await.unwrap();

    let leader = find_leader(&nodes, Duration::from_secs(2))
        .await
        .expect("a leader exists");
    nodes[leader].kill();

    tokio::time::sleep(Duration::from_secs(1)).await;

    // The retry/redirect machinery inside `ChatClient::register` should
    // absorb the now-dead address transparently.
    client.register("erin", vec![2]).await.unwrap();

    let page = client.list_accounts("%", 1, 10).await.unwrap();
    let mut usernames: Vec<String> = page.items.into_iter().map(|a| a.username).collect();
    usernames.sort();
    assert_eq!(usernames, vec!["dave".to_string(), "erin".to_string()]);
}
