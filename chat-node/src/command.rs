use bytes::BytesMut;
use chat_common::{Command, Error, NotLeaderInfo, Result};
use chat_consensus::{CommandDispatch, RaftCommand, RejectReason, UserCommand};
use chat_state::CommandOutcome;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

/// A write submitted through `Node::propose`, carried through the Raft log
/// as opaque bytes and handed back to us once committed. Wraps the domain
/// command together with the reply channel the waiting RPC handler holds,
/// so `chat-consensus` never needs to know anything about gRPC.
pub struct NodeCommand {
    pub command: Command,
    pub reply: Option<oneshot::Sender<Result<CommandOutcome>>>,
}

impl NodeCommand {
    pub fn new(command: Command, reply: oneshot::Sender<Result<CommandOutcome>>) -> Self {
        Self {
            command,
            reply: Some(reply),
        }
    }
}

impl RaftCommand for NodeCommand {
    fn write(&self, buffer: &mut BytesMut) {
        // Every command handled here is a write; `to_bytes` only fails on a
        // serialization bug, which would be a programming error, not a
        // runtime condition to recover from.
        let bytes = self
            .command
            .to_bytes()
            .expect("chat_common::Command always serializes");
        buffer.extend_from_slice(&bytes);
    }
}

impl UserCommand for NodeCommand {
    fn is_read(&self) -> bool {
        false
    }

    fn reject(self, reason: RejectReason) {
        let RejectReason::NotLeader = reason;

        if let Some(reply) = self.reply {
            let _ = reply.send(Err(Error::NotLeader(NotLeaderInfo::default())));
        }
    }
}

/// Feeds committed, locally-proposed commands to the apply loop. Called
/// under the node's consensus lock, so it must never block: it only ever
/// pushes onto an unbounded channel.
#[derive(Clone)]
pub struct NodeDispatcher {
    tx: UnboundedSender<NodeCommand>,
}

impl NodeDispatcher {
    pub fn new(tx: UnboundedSender<NodeCommand>) -> Self {
        Self { tx }
    }
}

impl CommandDispatch for NodeDispatcher {
    type Command = NodeCommand;

    fn dispatch(&self, cmd: NodeCommand) {
        // The receiving end only drops if the node is shutting down, in
        // which case there is nobody left to reply to anyway.
        let _ = self.tx.send(cmd);
    }
}
