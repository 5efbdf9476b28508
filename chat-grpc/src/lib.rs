use chat_common::{AccountInfo, Error, MessageRecord, NotLeaderInfo};
use chrono::{TimeZone, Utc};

pub mod generated {
    include!(concat!(env!("OUT_DIR"), "/chat.rs"));
}

pub use generated::{
    chat_service_client, chat_service_server, raft_service_client, raft_service_server,
    AccountInfo as AccountInfoProto, AddServerRequest, AddServerResponse, AppendEntriesArgs,
    AppendEntriesReply, DeleteAccountRequest, DeleteAccountResponse, DeleteMessagesRequest,
    DeleteMessagesResponse, GetMessagesRequest, GetMessagesResponse, ListAccountsRequest,
    ListAccountsResponse, LogEntryProto, LoginRequest, LoginResponse, LogoutRequest,
    LogoutResponse, MarkAsReadRequest, MarkAsReadResponse, MessageRecord as MessageRecordProto,
    NotLeaderInfo as NotLeaderInfoProto, PromoteServerRequest, PromoteServerResponse,
    RegisterRequest, RegisterResponse, RequestVoteArgs, RequestVoteReply, SendMessageRequest,
    SendMessageResponse, StreamMessagesRequest,
};

impl From<NotLeaderInfo> for NotLeaderInfoProto {
    fn from(value: NotLeaderInfo) -> Self {
        Self {
            leader_id: value.leader_id,
            leader_address: value.leader_address,
        }
    }
}

impl From<NotLeaderInfoProto> for NotLeaderInfo {
    fn from(value: NotLeaderInfoProto) -> Self {
        Self {
            leader_id: value.leader_id,
            leader_address: value.leader_address,
        }
    }
}

impl From<AccountInfo> for AccountInfoProto {
    fn from(value: AccountInfo) -> Self {
        Self {
            username: value.username,
            created_at: value.created_at.timestamp(),
            last_login: value.last_login.map(|t| t.timestamp()).unwrap_or(0),
        }
    }
}

impl From<AccountInfoProto> for AccountInfo {
    fn from(value: AccountInfoProto) -> Self {
        Self {
            username: value.username,
            created_at: Utc
                .timestamp_opt(value.created_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
            last_login: if value.last_login == 0 {
                None
            } else {
                Utc.timestamp_opt(value.last_login, 0).single()
            },
        }
    }
}

impl From<MessageRecord> for MessageRecordProto {
    fn from(value: MessageRecord) -> Self {
        Self {
            id: value.id,
            sender: value.sender,
            recipient: value.recipient,
            content: value.content,
            timestamp: value.timestamp.timestamp(),
            read: value.read,
        }
    }
}

impl From<MessageRecordProto> for MessageRecord {
    fn from(value: MessageRecordProto) -> Self {
        Self {
            id: value.id,
            sender: value.sender,
            recipient: value.recipient,
            content: value.content,
            timestamp: Utc
                .timestamp_opt(value.timestamp, 0)
                .single()
                .unwrap_or_else(Utc::now),
            read: value.read,
        }
    }
}

/// Maps a domain error to the `tonic::Status` sent over the wire. Only
/// `NotLeader` carries structured detail (via the response message's
/// `not_leader` field set by the caller); everything else collapses to a
/// status code plus message text.
pub fn error_to_status(err: Error) -> tonic::Status {
    match err {
        Error::NotLeader(info) => {
            tonic::Status::failed_precondition(format!("not the leader, try {info:?}"))
        }
        Error::NoLeader => tonic::Status::unavailable("no leader is currently known"),
        Error::Timeout => tonic::Status::deadline_exceeded("request did not commit in time"),
        Error::PreconditionFailed(msg) => tonic::Status::failed_precondition(msg),
        Error::InvalidArgument(msg) => tonic::Status::invalid_argument(msg),
        Error::TransportError(msg) => tonic::Status::unavailable(msg),
    }
}
