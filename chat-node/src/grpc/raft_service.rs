use std::sync::Arc;

use chat_common::{Command, EndPoint};
use chat_consensus::{AppendEntries, Entry, RequestVote};
use chat_grpc::raft_service_server::RaftService;
use chat_grpc::{
    AddServerRequest, AddServerResponse, AppendEntriesArgs, AppendEntriesReply, NotLeaderInfoProto,
    PromoteServerRequest, PromoteServerResponse, RequestVoteArgs, RequestVoteReply,
};
use tonic::{Request, Response, Status};

use crate::node::Node;
use crate::transport::ReplyCapture;

pub struct RaftServiceImpl {
    node: Arc<Node>,
}

impl RaftServiceImpl {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

#[tonic::async_trait]
impl RaftService for RaftServiceImpl {
    async fn request_vote(
        &self,
        request: Request<RequestVoteArgs>,
    ) -> Result<Response<RequestVoteReply>, Status> {
        let args = request.into_inner();

        let reply = self.node.handle_request_vote(RequestVote {
            term: args.term,
            candidate_id: args.candidate_id,
            last_log_index: args.last_log_index,
            last_log_term: args.last_log_term,
        });

        Ok(Response::new(RequestVoteReply {
            term: reply.term,
            vote_granted: reply.granted,
        }))
    }

    async fn append_entries(
        &self,
        request: Request<AppendEntriesArgs>,
    ) -> Result<Response<AppendEntriesReply>, Status> {
        let args = request.into_inner();

        let entries = args
            .entries
            .into_iter()
            .map(|e| Entry {
                index: e.index,
                term: e.term,
                payload: e.command.into(),
            })
            .collect();

        let reply = self.node.handle_append_entries(AppendEntries {
            term: args.term,
            leader_id: args.leader_id,
            prev_log_index: args.prev_log_index,
            prev_log_term: args.prev_log_term,
            leader_commit: args.leader_commit,
            entries,
        });

        Ok(Response::new(AppendEntriesReply {
            term: reply.term,
            success: reply.success,
            match_index: reply.match_index,
        }))
    }

    async fn add_server(
        &self,
        request: Request<AddServerRequest>,
    ) -> Result<Response<AddServerResponse>, Status> {
        let req = request.into_inner();

        let address: EndPoint = match req.server_address.parse() {
            Ok(address) => address,
            Err(err) => {
                return Ok(Response::new(AddServerResponse {
                    success: false,
                    message: err,
                    not_leader: None,
                }))
            }
        };

        let response = match self.node.add_server(req.server_id, address) {
            Ok(()) => AddServerResponse {
                success: true,
                message: String::new(),
                not_leader: None,
            },
            Err(err) => AddServerResponse {
                success: false,
                message: err.to_string(),
                not_leader: not_leader_field(&err),
            },
        };

        Ok(Response::new(response))
    }

    async fn promote_server(
        &self,
        request: Request<PromoteServerRequest>,
    ) -> Result<Response<PromoteServerResponse>, Status> {
        let req = request.into_inner();

        if !self.node.is_caught_up(req.server_id) {
            return Ok(Response::new(PromoteServerResponse {
                success: false,
                message: format!("server {} has not caught up with the log yet", req.server_id),
                not_leader: None,
            }));
        }

        let command = Command::PromoteServer {
            server_id: req.server_id,
        };

        let response = match self.node.propose(command).await {
            Ok(_) => PromoteServerResponse {
                success: true,
                message: String::new(),
                not_leader: None,
            },
            Err(err) => PromoteServerResponse {
                success: false,
                message: err.to_string(),
                not_leader: not_leader_field(&err),
            },
        };

        Ok(Response::new(response))
    }
}

fn not_leader_field(err: &chat_common::Error) -> Option<NotLeaderInfoProto> {
    match err {
        chat_common::Error::NotLeader(info) => Some(info.clone().into()),
        _ => None,
    }
}
