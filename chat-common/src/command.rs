use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A replicated write, serialized into the Raft log payload. Every node
/// applies these in log order; the state machine (`chat-state`) owns the
/// actual mutation logic, this type only carries the arguments across the
/// wire and through the log.
///
/// `Register`, `Login`, and `SendMessage` carry a `timestamp` captured once
/// by the leader at propose time, rather than letting apply call
/// `Utc::now()`: apply must be a pure function of the command, or replaying
/// the log on a restarted node (or applying it on a follower at a different
/// wall-clock moment) would produce different `created_at`/`last_login`/
/// `timestamp` values on each replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::large_enum_variant)]
pub enum Command {
    Register {
        username: String,
        password_hash: Vec<u8>,
        timestamp: DateTime<Utc>,
    },
    Login {
        username: String,
        password_hash: Vec<u8>,
        timestamp: DateTime<Utc>,
    },
    Logout {
        username: String,
    },
    DeleteAccount {
        username: String,
    },
    SendMessage {
        sender: String,
        recipient: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    DeleteMessages {
        username: String,
        ids: Vec<u64>,
    },
    MarkAsRead {
        username: String,
        ids: Vec<u64>,
    },
    /// Membership change turning a caught-up non-voting replica into a
    /// full voting member, committed through the log like any other
    /// command so every node agrees on when the change takes effect.
    PromoteServer {
        server_id: u64,
    },
}

impl Command {
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| crate::Error::invalid(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| crate::Error::invalid(e.to_string()))
    }
}
