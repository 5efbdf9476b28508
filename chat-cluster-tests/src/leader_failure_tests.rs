//! A 3-node cluster survives the current leader being killed mid-session,
//! with the client failing over transparently.

use std::sync::Arc;
use std::time::Duration;

use chat_client::ChatClient;

use crate::harness::{addresses, find_leader, spawn_cluster};

#[tokio::test]
async fn leader_crash_mid_session_is_transparent_to_clients() {
    let nodes = spawn_cluster(3).await;
    let client = Arc::new(ChatClient::new(addresses(&nodes)));

    client.register("alice", vec![1]).await.unwrap();
    client.register("bob", vec![2]).await.unwrap();

    client.send_message("alice", "bob", "hello-1").await.unwrap();

    let leader = find_leader(&nodes, Duration::from_secs(2))
        .await
        .expect("a leader exists before the crash");
    nodes[leader].kill();

    // Give the remaining majority time to elect a new leader and for the
    // client's own retry/redirect loop to find it.
    tokio::time::sleep(Duration::from_secs(1)).await;

    client.send_message("alice", "bob", "hello-2").await.unwrap();

    let messages = client.get_messages("bob", 10).await.unwrap();
    let mut contents: Vec<String> = messages.iter().map(|m| m.content.clone()).collect();
    contents.sort();

    assert_eq!(contents, vec!["hello-1".to_string(), "hello-2".to_string()]);

    let unread = client.login("bob", vec![2]).await.unwrap();
    assert_eq!(unread, 2);
}
