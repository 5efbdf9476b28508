use std::collections::HashMap;
use std::sync::Mutex;

use chat_common::MessageRecord;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Fans out newly-delivered messages to any `StreamMessages` calls currently
/// open for their recipient.
/// A plain `std::sync::Mutex` is enough here: the critical section is a
/// HashMap lookup and a handful of `send`s on unbounded channels, never I/O.
#[derive(Default)]
pub struct Subscriptions {
    by_recipient: Mutex<HashMap<String, Vec<UnboundedSender<MessageRecord>>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new stream for `username`, returning the receiving half
    /// the gRPC handler turns into a `Streaming` response body. Dropping the
    /// receiver (client disconnects) makes the matching sender start
    /// returning errors, which `notify` treats as "unsubscribe".
    pub fn subscribe(&self, username: &str) -> UnboundedReceiver<MessageRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.by_recipient
            .lock()
            .unwrap()
            .entry(username.to_string())
            .or_default()
            .push(tx);

        rx
    }

    /// Called by the apply loop right after a `SendMessage` command commits.
    /// Drops any subscriber whose receiver has gone away instead of letting
    /// the list grow unbounded with dead senders.
    pub fn notify(&self, record: &MessageRecord) {
        let mut guard = self.by_recipient.lock().unwrap();

        if let Some(senders) = guard.get_mut(&record.recipient) {
            senders.retain(|tx| tx.send(record.clone()).is_ok());

            if senders.is_empty() {
                guard.remove(&record.recipient);
            }
        }
    }
}
