use std::sync::Arc;
use std::time::Duration;

use chat_common::Command;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;

use crate::command::NodeCommand;
use crate::node::Node;

/// Drives committed entries into the state machine. Two sources feed it:
/// commands this node itself proposed as leader, delivered through
/// `apply_tx` the instant `chat-consensus` calls `dispatch`; and commands
/// committed on a follower, which never go through `dispatch` at all and so
/// are picked up by polling `commit_index` against how far the database has
/// applied. Running both through the same loop keeps `Database::apply`'s
/// single-writer invariant intact without needing a third lock.
pub async fn run_apply_loop(node: Arc<Node>, mut apply_rx: UnboundedReceiver<NodeCommand>) {
    loop {
        tokio::select! {
            received = apply_rx.recv() => {
                match received {
                    Some(node_cmd) => apply_dispatched(&node, node_cmd).await,
                    None => break,
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }

        catch_up(&node).await;
    }
}

async fn apply_dispatched(node: &Arc<Node>, node_cmd: NodeCommand) {
    let index = node.last_applied().await + 1;
    let result = node.apply_one(index, node_cmd.command).await;

    if let Some(reply) = node_cmd.reply {
        let _ = reply.send(result);
    }
}

/// Applies any entries the log already has durably stored beyond what the
/// database has applied, up to the current commit index. A no-op on a
/// healthy leader (those entries arrive via `apply_dispatched` first) and
/// the only path that ever applies anything on a follower.
async fn catch_up(node: &Arc<Node>) {
    let last_applied = node.last_applied().await;
    let commit_index = node.commit_index();

    if commit_index <= last_applied {
        return;
    }

    for entry in node.read_entries_after(last_applied, 1024) {
        if entry.index > commit_index {
            break;
        }

        let command = match Command::from_bytes(&entry.payload) {
            Ok(command) => command,
            Err(err) => {
                warn!(index = entry.index, %err, "dropping unreadable log entry");
                continue;
            }
        };

        // `Database::apply` rejects an index at or below its own watermark,
        // so this is harmless if `apply_dispatched` already applied it.
        let _ = node.apply_one(entry.index, command).await;
    }
}
