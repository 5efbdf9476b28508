//! Live message feed: a background task owns the actual gRPC stream and
//! reconnects with backoff whenever it drops, so callers just hold an
//! `UnboundedReceiver` and never see a connection blip.

use std::sync::Arc;

use chat_common::MessageRecord;
use chat_grpc::StreamMessagesRequest;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tonic::Request;

use crate::ChatClient;

/// A live feed of messages delivered to one account. Dropping this stops
/// the background reconnect task.
pub struct MessageStream {
    receiver: UnboundedReceiver<MessageRecord>,
    task: JoinHandle<()>,
}

impl MessageStream {
    pub async fn recv(&mut self) -> Option<MessageRecord> {
        self.receiver.recv().await
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) fn spawn(client: Arc<ChatClient>, username: String) -> MessageStream {
    let (tx, rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let address = client.current_address().await;

            let mut conn = match client.connect(&address).await {
                Ok(conn) => conn,
                Err(_) => {
                    client.rotate_address().await;
                    tokio::time::sleep(client.policy.backoff_for(attempt)).await;
                    continue;
                }
            };

            let request = Request::new(StreamMessagesRequest {
                username: username.clone(),
            });

            let mut inbound = match conn.stream_messages(request).await {
                Ok(response) => response.into_inner(),
                Err(_) => {
                    client.rotate_address().await;
                    tokio::time::sleep(client.policy.backoff_for(attempt)).await;
                    continue;
                }
            };

            // Connected: a working stream resets the backoff counter so a
            // later drop doesn't inherit a long wait from an earlier outage.
            attempt = 0;

            loop {
                match inbound.message().await {
                    Ok(Some(record)) => {
                        if tx.send(record.into()).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => break,
                }
            }

            tokio::time::sleep(client.policy.backoff_for(1)).await;
        }
    });

    MessageStream { receiver: rx, task }
}
