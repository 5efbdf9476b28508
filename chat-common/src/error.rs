use thiserror::Error;

use crate::NotLeaderInfo;

/// Error kinds surfaced to RPC clients, mirroring the taxonomy the Chat RPC
/// Front-End and Client Runtime agree on. `TransportError` never crosses the
/// wire: the client runtime folds it into `NoLeader` or `Timeout` once its
/// retry budget is exhausted.
#[derive(Debug, Error, Clone)]
pub enum Error {
    #[error("not the leader, try {0:?}")]
    NotLeader(NotLeaderInfo),

    #[error("no leader is currently known")]
    NoLeader,

    #[error("the cluster did not commit the request in time")]
    Timeout,

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("transport error: {0}")]
    TransportError(String),
}

impl Error {
    pub fn not_leader(leader_id: Option<u64>, leader_address: Option<String>) -> Self {
        Error::NotLeader(NotLeaderInfo {
            leader_id,
            leader_address,
        })
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::PreconditionFailed(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

pub type Result<A> = std::result::Result<A, Error>;
