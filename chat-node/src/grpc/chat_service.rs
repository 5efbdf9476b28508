use std::pin::Pin;
use std::sync::Arc;

use chat_common::{Command, Error};
use chat_grpc::chat_service_server::ChatService;
use chat_grpc::{
    DeleteAccountRequest, DeleteAccountResponse, DeleteMessagesRequest, DeleteMessagesResponse,
    GetMessagesRequest, GetMessagesResponse, ListAccountsRequest, ListAccountsResponse,
    LoginRequest, LoginResponse, LogoutRequest, LogoutResponse, MarkAsReadRequest,
    MarkAsReadResponse, MessageRecordProto, NotLeaderInfoProto, RegisterRequest, RegisterResponse,
    SendMessageRequest, SendMessageResponse, StreamMessagesRequest,
};
use chat_state::CommandOutcome;
use chrono::Utc;
use futures::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status};

use crate::node::Node;

pub struct ChatServiceImpl {
    node: Arc<Node>,
}

impl ChatServiceImpl {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

/// Only `Error::NotLeader` carries a redirect hint; every other error is
/// reported through the response's `message` field, with `not_leader` left
/// unset.
fn not_leader_field(err: &Error) -> Option<NotLeaderInfoProto> {
    match err {
        Error::NotLeader(info) => Some(info.clone().into()),
        _ => None,
    }
}

#[tonic::async_trait]
impl ChatService for ChatServiceImpl {
    async fn register(&self, request: Request<RegisterRequest>) -> Result<Response<RegisterResponse>, Status> {
        let req = request.into_inner();

        let command = Command::Register {
            username: req.username,
            password_hash: req.password_hash,
            timestamp: Utc::now(),
        };

        let response = match self.node.propose(command).await {
            Ok(_) => RegisterResponse {
                success: true,
                message: String::new(),
                not_leader: None,
            },
            Err(err) => RegisterResponse {
                success: false,
                message: err.to_string(),
                not_leader: not_leader_field(&err),
            },
        };

        Ok(Response::new(response))
    }

    async fn login(&self, request: Request<LoginRequest>) -> Result<Response<LoginResponse>, Status> {
        let req = request.into_inner();

        // Credential verification is read-only and served locally regardless
        // of leadership: a follower unable to reach the leader can still
        // tell a caller their password is right. Only the leader
        // additionally proposes a Login command to persist
        // `last_login`; a follower's view of that field simply lags until
        // the command replicates down to it.
        if !self.node.account_exists(&req.username).await {
            return Ok(Response::new(LoginResponse {
                success: false,
                message: format!("no such account '{}'", req.username),
                unread_count: 0,
                not_leader: None,
            }));
        }

        if !self.node.verify_password(&req.username, &req.password_hash).await {
            return Ok(Response::new(LoginResponse {
                success: false,
                message: "incorrect password".to_string(),
                unread_count: 0,
                not_leader: None,
            }));
        }

        if !self.node.is_leader() {
            let unread_count = self.node.unread_count(&req.username).await;
            return Ok(Response::new(LoginResponse {
                success: true,
                message: String::new(),
                unread_count,
                not_leader: None,
            }));
        }

        let command = Command::Login {
            username: req.username,
            password_hash: req.password_hash,
            timestamp: Utc::now(),
        };

        let response = match self.node.propose(command).await {
            Ok(CommandOutcome::LoggedIn { unread_count }) => LoginResponse {
                success: true,
                message: String::new(),
                unread_count,
                not_leader: None,
            },
            Ok(_) => unreachable!("Login always yields LoggedIn"),
            Err(err) => LoginResponse {
                success: false,
                message: err.to_string(),
                unread_count: 0,
                not_leader: not_leader_field(&err),
            },
        };

        Ok(Response::new(response))
    }

    async fn logout(&self, request: Request<LogoutRequest>) -> Result<Response<LogoutResponse>, Status> {
        let req = request.into_inner();

        let command = Command::Logout {
            username: req.username,
        };

        let response = match self.node.propose(command).await {
            Ok(_) => LogoutResponse {
                success: true,
                message: String::new(),
                not_leader: None,
            },
            Err(err) => LogoutResponse {
                success: false,
                message: err.to_string(),
                not_leader: not_leader_field(&err),
            },
        };

        Ok(Response::new(response))
    }

    async fn delete_account(
        &self,
        request: Request<DeleteAccountRequest>,
    ) -> Result<Response<DeleteAccountResponse>, Status> {
        let req = request.into_inner();

        let command = Command::DeleteAccount {
            username: req.username,
        };

        let response = match self.node.propose(command).await {
            Ok(_) => DeleteAccountResponse {
                success: true,
                message: String::new(),
                not_leader: None,
            },
            Err(err) => DeleteAccountResponse {
                success: false,
                message: err.to_string(),
                not_leader: not_leader_field(&err),
            },
        };

        Ok(Response::new(response))
    }

    async fn list_accounts(
        &self,
        request: Request<ListAccountsRequest>,
    ) -> Result<Response<ListAccountsResponse>, Status> {
        let req = request.into_inner();

        let page = self
            .node
            .list_accounts(&req.pattern, req.page.max(1), req.per_page.max(1))
            .await;

        Ok(Response::new(ListAccountsResponse {
            accounts: page.items.into_iter().map(Into::into).collect(),
            page: page.page,
            per_page: page.per_page,
            total: page.total,
        }))
    }

    async fn send_message(
        &self,
        request: Request<SendMessageRequest>,
    ) -> Result<Response<SendMessageResponse>, Status> {
        let req = request.into_inner();

        let command = Command::SendMessage {
            sender: req.sender,
            recipient: req.recipient,
            content: req.content,
            timestamp: Utc::now(),
        };

        let response = match self.node.propose(command).await {
            Ok(CommandOutcome::MessageSent { record }) => SendMessageResponse {
                success: true,
                message: String::new(),
                id: record.id,
                not_leader: None,
            },
            Ok(_) => unreachable!("SendMessage always yields MessageSent"),
            Err(err) => SendMessageResponse {
                success: false,
                message: err.to_string(),
                id: 0,
                not_leader: not_leader_field(&err),
            },
        };

        Ok(Response::new(response))
    }

    async fn get_messages(
        &self,
        request: Request<GetMessagesRequest>,
    ) -> Result<Response<GetMessagesResponse>, Status> {
        let req = request.into_inner();

        let messages = self.node.get_messages(&req.username, req.count).await;

        Ok(Response::new(GetMessagesResponse {
            messages: messages.into_iter().map(Into::into).collect(),
        }))
    }

    async fn delete_messages(
        &self,
        request: Request<DeleteMessagesRequest>,
    ) -> Result<Response<DeleteMessagesResponse>, Status> {
        let req = request.into_inner();

        let command = Command::DeleteMessages {
            username: req.username,
            ids: req.ids,
        };

        let response = match self.node.propose(command).await {
            Ok(CommandOutcome::MessagesDeleted { count }) => DeleteMessagesResponse {
                success: true,
                message: String::new(),
                deleted_count: count,
                not_leader: None,
            },
            Ok(_) => unreachable!("DeleteMessages always yields MessagesDeleted"),
            Err(err) => DeleteMessagesResponse {
                success: false,
                message: err.to_string(),
                deleted_count: 0,
                not_leader: not_leader_field(&err),
            },
        };

        Ok(Response::new(response))
    }

    async fn mark_as_read(
        &self,
        request: Request<MarkAsReadRequest>,
    ) -> Result<Response<MarkAsReadResponse>, Status> {
        let req = request.into_inner();

        let command = Command::MarkAsRead {
            username: req.username,
            ids: req.ids,
        };

        let response = match self.node.propose(command).await {
            Ok(CommandOutcome::MessagesMarkedRead { count }) => MarkAsReadResponse {
                success: true,
                message: String::new(),
                marked_count: count,
                not_leader: None,
            },
            Ok(_) => unreachable!("MarkAsRead always yields MessagesMarkedRead"),
            Err(err) => MarkAsReadResponse {
                success: false,
                message: err.to_string(),
                marked_count: 0,
                not_leader: not_leader_field(&err),
            },
        };

        Ok(Response::new(response))
    }

    type StreamMessagesStream = Pin<Box<dyn Stream<Item = Result<MessageRecordProto, Status>> + Send + 'static>>;

    async fn stream_messages(
        &self,
        request: Request<StreamMessagesRequest>,
    ) -> Result<Response<Self::StreamMessagesStream>, Status> {
        let req = request.into_inner();

        let rx = self.node.subscriptions.subscribe(&req.username);
        let stream = UnboundedReceiverStream::new(rx).map(|record| Ok(record.into()));

        Ok(Response::new(Box::pin(stream)))
    }
}
