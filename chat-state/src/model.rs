use chat_common::MessageRecord;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct Account {
    pub username: String,
    pub password_hash: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: u64,
    pub sender: String,
    pub recipient: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

/// What applying a command actually changed, handed back to the RPC layer
/// so it can fill in the gRPC response fields (unread counts, new message
/// ids, how many rows a bulk delete touched) and to the Streaming Notifier
/// so it knows which recipient to wake and with what payload.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Registered,
    LoggedIn { unread_count: u64 },
    LoggedOut,
    AccountDeleted,
    MessageSent { record: MessageRecord },
    MessagesDeleted { count: u32 },
    MessagesMarkedRead { count: u32 },
    ServerPromoted { server_id: u64 },
}
