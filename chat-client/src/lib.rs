//! Client runtime: talks to a chat cluster through an ordered list of known
//! server addresses, following `NotLeader` redirects and failing over to the
//! next address on a transport error, since which address is "the right
//! endpoint" changes over time as leadership moves.

mod retry;
mod stream;

use std::sync::Arc;
use std::time::Duration;

use chat_common::{AccountInfo, EndPoint, Error, MessageRecord, Page, Result};
use chat_grpc::chat_service_client::ChatServiceClient;
use chat_grpc::{
    DeleteAccountRequest, DeleteAccountResponse, DeleteMessagesRequest, DeleteMessagesResponse,
    GetMessagesRequest, ListAccountsRequest, LoginRequest, LoginResponse, LogoutRequest,
    LogoutResponse, MarkAsReadRequest, MarkAsReadResponse, RegisterRequest, RegisterResponse,
    SendMessageRequest, SendMessageResponse,
};
use tokio::sync::Mutex;
use tonic::transport::Channel;

pub use stream::MessageStream;

/// How the runtime behaves when a call doesn't immediately succeed.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub(crate) fn backoff_for(&self, attempt: u32) -> Duration {
        let scale = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        (self.base_backoff * scale).min(self.max_backoff)
    }
}

/// A cluster client. Holds the addresses it currently believes might be the
/// leader, most-likely-first; a successful `NotLeader` redirect reorders the
/// list instead of discarding it, so the client remembers the cluster shape
/// across calls instead of learning it from scratch every time.
pub struct ChatClient {
    addresses: Mutex<Vec<EndPoint>>,
    policy: RetryPolicy,
}

impl ChatClient {
    pub fn new(addresses: Vec<EndPoint>) -> Self {
        Self::with_policy(addresses, RetryPolicy::default())
    }

    pub fn with_policy(addresses: Vec<EndPoint>, policy: RetryPolicy) -> Self {
        assert!(!addresses.is_empty(), "a client needs at least one server address");
        Self {
            addresses: Mutex::new(addresses),
            policy,
        }
    }

    async fn current_address(&self) -> EndPoint {
        self.addresses.lock().await[0].clone()
    }

    /// A transport failure against the current address: try the next one
    /// next time instead of hammering the same unreachable node.
    async fn rotate_address(&self) {
        let mut addresses = self.addresses.lock().await;
        addresses.rotate_left(1);
    }

    /// A `NotLeader` redirect told us who the leader actually is: believe it
    /// and try there first.
    async fn apply_redirect(&self, leader_address: Option<String>) {
        let Some(leader_address) = leader_address else {
            return;
        };

        let Ok(endpoint) = leader_address.parse::<EndPoint>() else {
            return;
        };

        let mut addresses = self.addresses.lock().await;
        addresses.retain(|a| a.to_string() != endpoint.to_string());
        addresses.insert(0, endpoint);
    }

    async fn connect(&self, address: &EndPoint) -> Result<ChatServiceClient<Channel>> {
        ChatServiceClient::connect(format!("http://{address}"))
            .await
            .map_err(|e| Error::TransportError(e.to_string()))
    }

    pub async fn register(&self, username: impl Into<String>, password_hash: Vec<u8>) -> Result<()> {
        let username = username.into();
        let resp: RegisterResponse = retry::call(self, |mut client| {
            let req = RegisterRequest {
                username: username.clone(),
                password_hash: password_hash.clone(),
            };
            async move { client.register(req).await }
        })
        .await?;
        let _ = resp;
        Ok(())
    }

    pub async fn login(&self, username: impl Into<String>, password_hash: Vec<u8>) -> Result<u64> {
        let username = username.into();
        let resp: LoginResponse = retry::call(self, |mut client| {
            let req = LoginRequest {
                username: username.clone(),
                password_hash: password_hash.clone(),
            };
            async move { client.login(req).await }
        })
        .await?;
        Ok(resp.unread_count)
    }

    pub async fn logout(&self, username: impl Into<String>) -> Result<()> {
        let username = username.into();
        let _resp: LogoutResponse = retry::call(self, |mut client| {
            let req = LogoutRequest {
                username: username.clone(),
            };
            async move { client.logout(req).await }
        })
        .await?;
        Ok(())
    }

    pub async fn delete_account(&self, username: impl Into<String>) -> Result<()> {
        let username = username.into();
        let _resp: DeleteAccountResponse = retry::call(self, |mut client| {
            let req = DeleteAccountRequest {
                username: username.clone(),
            };
            async move { client.delete_account(req).await }
        })
        .await?;
        Ok(())
    }

    pub async fn send_message(
        &self,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<u64> {
        let sender = sender.into();
        let recipient = recipient.into();
        let content = content.into();

        let resp: SendMessageResponse = retry::call(self, |mut client| {
            let req = SendMessageRequest {
                sender: sender.clone(),
                recipient: recipient.clone(),
                content: content.clone(),
            };
            async move { client.send_message(req).await }
        })
        .await?;

        Ok(resp.id)
    }

    pub async fn delete_messages(&self, username: impl Into<String>, ids: Vec<u64>) -> Result<u32> {
        let username = username.into();
        let resp: DeleteMessagesResponse = retry::call(self, |mut client| {
            let req = DeleteMessagesRequest {
                username: username.clone(),
                ids: ids.clone(),
            };
            async move { client.delete_messages(req).await }
        })
        .await?;
        Ok(resp.deleted_count)
    }

    pub async fn mark_as_read(&self, username: impl Into<String>, ids: Vec<u64>) -> Result<u32> {
        let username = username.into();
        let resp: MarkAsReadResponse = retry::call(self, |mut client| {
            let req = MarkAsReadRequest {
                username: username.clone(),
                ids: ids.clone(),
            };
            async move { client.mark_as_read(req).await }
        })
        .await?;
        Ok(resp.marked_count)
    }

    /// Reads never need a redirect: any caught-up replica can serve them,
    /// so only transport failures cause a failover here.
    pub async fn list_accounts(&self, pattern: impl Into<String>, page: u32, per_page: u32) -> Result<Page<AccountInfo>> {
        let pattern = pattern.into();
        let resp = retry::call_read(self, |mut client| {
            let req = ListAccountsRequest {
                pattern: pattern.clone(),
                page,
                per_page,
            };
            async move { client.list_accounts(req).await }
        })
        .await?;

        Ok(Page {
            items: resp.accounts.into_iter().map(Into::into).collect(),
            page: resp.page,
            per_page: resp.per_page,
            total: resp.total,
        })
    }

    pub async fn get_messages(&self, username: impl Into<String>, count: u32) -> Result<Vec<MessageRecord>> {
        let username = username.into();
        let resp = retry::call_read(self, |mut client| {
            let req = GetMessagesRequest {
                username: username.clone(),
                count,
            };
            async move { client.get_messages(req).await }
        })
        .await?;

        Ok(resp.messages.into_iter().map(Into::into).collect())
    }

    /// Opens a live feed of messages delivered to `username`, reconnecting
    /// with backoff if the stream drops or the current address goes away.
    pub fn stream_messages(self: &Arc<Self>, username: impl Into<String>) -> MessageStream {
        stream::spawn(self.clone(), username.into())
    }
}
