use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

use chat_common::EndPoint;
use chat_consensus::{AppendEntries, EntriesReplicated, RaftSender, RequestVote, VoteCasted};
use chat_grpc::raft_service_client::RaftServiceClient;
use chat_grpc::{AppendEntriesArgs, LogEntryProto, RequestVoteArgs};
use tracing::warn;

use crate::node::Node;

/// Outbound half of the Raft transport: turns a `request_vote`/
/// `replicate_entries` call from the state machine into a real gRPC call to
/// the target peer, run on its own spawned task so the node lock that
/// triggered it (an election timeout, a heartbeat tick) is never held across
/// the network round trip. The reply, once it arrives, is fed back into the
/// node through `Node::on_vote_received`/`Node::on_entries_appended`, which
/// re-acquire the lock themselves.
///
/// Never on the receiving side of an RPC, so `vote_casted` and
/// `entries_replicated` are unreachable here; see [`ReplyCapture`] for that.
#[derive(Clone)]
pub struct ClusterTransport {
    node: Arc<Node>,
    peers: HashMap<u64, EndPoint>,
}

impl ClusterTransport {
    pub fn new(node: Arc<Node>, peers: HashMap<u64, EndPoint>) -> Self {
        Self { node, peers }
    }

    fn address_of(&self, target: u64) -> Option<EndPoint> {
        self.peers.get(&target).cloned()
    }
}

impl RaftSender for ClusterTransport {
    type Id = u64;

    fn request_vote(&self, target: u64, req: RequestVote<u64>) {
        let Some(address) = self.address_of(target) else {
            warn!(target, "no known address for peer, skipping RequestVote");
            return;
        };

        let node = self.node.clone();
        tokio::spawn(async move {
            let result: eyre::Result<_> = async {
                let mut client = RaftServiceClient::connect(format!("http://{address}")).await?;
                let reply = client
                    .request_vote(RequestVoteArgs {
                        term: req.term,
                        candidate_id: req.candidate_id,
                        last_log_index: req.last_log_index,
                        last_log_term: req.last_log_term,
                    })
                    .await?;
                Ok(reply.into_inner())
            }
            .await;

            match result {
                Ok(reply) => {
                    node.on_vote_received(target, reply.term, reply.vote_granted)
                        .await;
                }
                Err(err) => warn!(target, %err, "RequestVote RPC failed"),
            }
        });
    }

    fn vote_casted(&self, _target: u64, _resp: VoteCasted<u64>) {
        unreachable!("ClusterTransport only drives outbound calls")
    }

    fn entries_replicated(&self, _target: u64, _resp: EntriesReplicated<u64>) {
        unreachable!("ClusterTransport only drives outbound calls")
    }

    fn replicate_entries(&self, target: u64, req: AppendEntries<u64>) {
        let Some(address) = self.address_of(target) else {
            warn!(target, "no known address for peer, skipping AppendEntries");
            return;
        };

        let node = self.node.clone();
        tokio::spawn(async move {
            let entries = req
                .entries
                .iter()
                .map(|e| LogEntryProto {
                    index: e.index,
                    term: e.term,
                    command: e.payload.to_vec(),
                })
                .collect();

            let result: eyre::Result<_> = async {
                let mut client = RaftServiceClient::connect(format!("http://{address}")).await?;
                let reply = client
                    .append_entries(AppendEntriesArgs {
                        term: req.term,
                        leader_id: req.leader_id,
                        prev_log_index: req.prev_log_index,
                        prev_log_term: req.prev_log_term,
                        leader_commit: req.leader_commit,
                        entries,
                    })
                    .await?;
                Ok(reply.into_inner())
            }
            .await;

            match result {
                Ok(reply) => {
                    node.on_entries_appended(target, reply.term, reply.success, reply.match_index)
                        .await;
                }
                Err(err) => warn!(target, %err, "AppendEntries RPC failed"),
            }
        });
    }
}

/// Inbound half: handed to `handle_request_vote`/`handle_append_entries`
/// while servicing an incoming RPC. Captures the single reply those methods
/// produce so the gRPC handler can turn it straight into the RPC response,
/// instead of it being sent somewhere over the network.
#[derive(Default)]
pub struct ReplyCapture {
    vote: Cell<Option<VoteCasted<u64>>>,
    append: Cell<Option<EntriesReplicated<u64>>>,
}

impl ReplyCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_vote(&self) -> Option<VoteCasted<u64>> {
        self.vote.take()
    }

    pub fn take_append(&self) -> Option<EntriesReplicated<u64>> {
        self.append.take()
    }
}

impl RaftSender for ReplyCapture {
    type Id = u64;

    fn request_vote(&self, _target: u64, _req: RequestVote<u64>) {
        unreachable!("ReplyCapture only answers the in-flight RPC")
    }

    fn vote_casted(&self, _target: u64, resp: VoteCasted<u64>) {
        self.vote.set(Some(resp));
    }

    fn entries_replicated(&self, _target: u64, resp: EntriesReplicated<u64>) {
        self.append.set(Some(resp));
    }

    fn replicate_entries(&self, _target: u64, _req: AppendEntries<u64>) {
        unreachable!("ReplyCapture only answers the in-flight RPC")
    }
}
