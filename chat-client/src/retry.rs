//! The shared retry/failover driver behind every `ChatClient` RPC method.
//!
//! Two concerns are layered here: a transport-level retry (the address we
//! dialed didn't answer, or the call itself errored at the gRPC layer) and a
//! redirect-level retry (the node answered just fine but told us, via the
//! response's own `not_leader` field, that someone else is leader). The
//! first rotates through the known address list; the second jumps straight
//! to the address the node named.

use std::future::Future;

use chat_common::{Error, NotLeaderInfo, Result};
use chat_grpc::{
    chat_service_client::ChatServiceClient, DeleteAccountResponse, DeleteMessagesResponse,
    LoginResponse, LogoutResponse, MarkAsReadResponse, RegisterResponse, SendMessageResponse,
};
use tonic::transport::Channel;

use crate::ChatClient;

/// A write-RPC response that can tell the caller it landed on the wrong
/// node instead of applying the command.
pub(crate) trait RedirectAware {
    fn success(&self) -> bool;
    fn message(&self) -> &str;
    fn not_leader(&self) -> Option<&NotLeaderInfo>;
}

macro_rules! impl_redirect_aware {
    ($ty:ty) => {
        impl RedirectAware for $ty {
            fn success(&self) -> bool {
                self.success
            }

            fn message(&self) -> &str {
                &self.message
            }

            fn not_leader(&self) -> Option<&NotLeaderInfo> {
                self.not_leader.as_ref()
            }
        }
    };
}

impl_redirect_aware!(RegisterResponse);
impl_redirect_aware!(LoginResponse);
impl_redirect_aware!(LogoutResponse);
impl_redirect_aware!(DeleteAccountResponse);
impl_redirect_aware!(SendMessageResponse);
impl_redirect_aware!(DeleteMessagesResponse);
impl_redirect_aware!(MarkAsReadResponse);

/// Drives a single write RPC across however many attempts the client's
/// `RetryPolicy` allows, following leader redirects and rotating addresses
/// on transport failure.
pub(crate) async fn call<Resp, F, Fut>(client: &ChatClient, mut f: F) -> Result<Resp>
where
    Resp: RedirectAware,
    F: FnMut(ChatServiceClient<Channel>) -> Fut,
    Fut: Future<Output = std::result::Result<tonic::Response<Resp>, tonic::Status>>,
{
    let mut last_err = Error::NoLeader;

    for attempt in 1..=client.policy.max_attempts {
        let address = client.current_address().await;

        let conn = match client.connect(&address).await {
            Ok(conn) => conn,
            Err(e) => {
                last_err = e;
                client.rotate_address().await;
                tokio::time::sleep(client.policy.backoff_for(attempt)).await;
                continue;
            }
        };

        match f(conn).await {
            Ok(response) => {
                let body = response.into_inner();

                if body.success() {
                    return Ok(body);
                }

                if let Some(info) = body.not_leader() {
                    client.apply_redirect(info.leader_address.clone()).await;
                    last_err = Error::NotLeader(info.clone());
                    continue;
                }

                return Err(Error::precondition(body.message().to_string()));
            }
            Err(status) => {
                last_err = Error::TransportError(status.to_string());
                client.rotate_address().await;
                tokio::time::sleep(client.policy.backoff_for(attempt)).await;
            }
        }
    }

    Err(match last_err {
        Error::NotLeader(_) | Error::TransportError(_) => Error::Timeout,
        other => other,
    })
}

/// Drives a read RPC, which has no leader-redirect concept: any replica can
/// answer, so only transport failures trigger a retry.
pub(crate) async fn call_read<Resp, F, Fut>(client: &ChatClient, mut f: F) -> Result<Resp>
where
    F: FnMut(ChatServiceClient<Channel>) -> Fut,
    Fut: Future<Output = std::result::Result<tonic::Response<Resp>, tonic::Status>>,
{
    let mut last_err = Error::NoLeader;

    for attempt in 1..=client.policy.max_attempts {
        let address = client.current_address().await;

        let conn = match client.connect(&address).await {
            Ok(conn) => conn,
            Err(e) => {
                last_err = e;
                client.rotate_address().await;
                tokio::time::sleep(client.policy.backoff_for(attempt)).await;
                continue;
            }
        };

        match f(conn).await {
            Ok(response) => return Ok(response.into_inner()),
            Err(status) => {
                last_err = Error::TransportError(status.to_string());
                client.rotate_address().await;
                tokio::time::sleep(client.policy.backoff_for(attempt)).await;
            }
        }
    }

    Err(match last_err {
        Error::TransportError(_) | Error::NoLeader => Error::Timeout,
        other => other,
    })
}
