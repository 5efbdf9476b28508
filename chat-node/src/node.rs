use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chat_common::{AccountInfo, Command, EndPoint, Error, MessageRecord, NotLeaderInfo, Page, Result};
use chat_consensus::{
    AppendEntries, EntriesAppended, EntriesReplicated, RaftSM, RequestVote, State, TimeRange,
    VoteCasted, VoteReceived,
};
use chat_log::{FileLogStore, Metadata, MetadataStore};
use chat_state::{CommandOutcome, Database};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::apply;
use crate::command::{NodeCommand, NodeDispatcher};
use crate::options::Options;
use crate::subscription::Subscriptions;
use crate::transport::{ClusterTransport, ReplyCapture};

/// Everything the Raft state machine needs that is held behind the single
/// coarse "node lock": the state machine itself, its log
/// and term/vote metadata, and the address book used to answer `NotLeader`
/// with a usable redirect. Never held across network I/O; the one exception
/// — `storage`'s fsync happening inline inside `handle_command`/
/// `handle_append_entries` — is a known deviation from the no-I/O-under-lock
/// rule, noted in the design ledger rather than fixed in this pass.
struct ConsensusState {
    sm: RaftSM<u64, NodeCommand>,
    storage: FileLogStore,
    metadata_store: MetadataStore,
    dispatcher: NodeDispatcher,
    peers: HashMap<u64, EndPoint>,
}

/// A running cluster member: consensus state, the replicated chat database,
/// and the subscription table for `StreamMessages`, all wired together and
/// owned behind one `main`.
pub struct Node {
    pub id: u64,
    pub bind_address: EndPoint,
    options: Options,
    time_range: TimeRange,
    consensus: Mutex<ConsensusState>,
    db: tokio::sync::Mutex<Database>,
    pub subscriptions: Subscriptions,
}

impl Node {
    pub async fn bootstrap(options: Options) -> eyre::Result<std::sync::Arc<Node>> {
        std::fs::create_dir_all(&options.data_directory)?;

        let metadata_store = MetadataStore::new(Path::new(&options.data_directory).join("metadata.json"));
        let metadata = metadata_store.load()?;

        let storage = FileLogStore::open(Path::new(&options.data_directory).join("log.jsonl"))?;

        let peers = options.peer_map();
        let peer_ids: Vec<u64> = peers.keys().copied().collect();
        let time_range = TimeRange::new(options.election_timeout_min_ms, options.election_timeout_max_ms);

        let mut sm = RaftSM::new(options.id, peer_ids, &time_range, Instant::now());
        sm.term = metadata.current_term;
        sm.voted_for = metadata.voted_for;
        // The log is the only durable record of what has happened; anything
        // that made it to disk is treated as committed, rather than tracking
        // a separate commit-index watermark across restarts.
        sm.commit_index = storage.last_entry_or_default().index;

        let (apply_tx, apply_rx) = mpsc::unbounded_channel();
        let dispatcher = NodeDispatcher::new(apply_tx);

        let bind_address: EndPoint = options.bind_address.parse().map_err(|e: String| eyre::eyre!(e))?;

        let node = std::sync::Arc::new(Node {
            id: options.id,
            bind_address,
            options: options.clone(),
            time_range,
            consensus: Mutex::new(ConsensusState {
                sm,
                storage,
                metadata_store,
                dispatcher,
                peers,
            }),
            db: tokio::sync::Mutex::new(Database::new()),
            subscriptions: Subscriptions::new(),
        });

        tokio::spawn(apply::run_apply_loop(node.clone(), apply_rx));
        tokio::spawn(run_ticker(node.clone()));

        Ok(node)
    }

    fn transport(self: &std::sync::Arc<Self>) -> ClusterTransport {
        let peers = self.consensus.lock().unwrap().peers.clone();
        ClusterTransport::new(self.clone(), peers)
    }

    pub async fn tick(self: &std::sync::Arc<Self>) {
        let transport = self.transport();
        let mut guard = self.consensus.lock().unwrap();
        let before = (guard.sm.term, guard.sm.voted_for);

        let ConsensusState { sm, storage, .. } = &mut *guard;
        sm.handle_tick(&self.time_range, storage, &transport, Instant::now());

        self.persist_if_changed(&mut guard, before);
    }

    pub async fn on_vote_received(self: &std::sync::Arc<Self>, from: u64, term: u64, granted: bool) {
        let transport = self.transport();
        let mut guard = self.consensus.lock().unwrap();
        let before = (guard.sm.term, guard.sm.voted_for);

        let ConsensusState { sm, storage, .. } = &mut *guard;
        sm.handle_vote_received(
            &self.time_range,
            storage,
            &transport,
            Instant::now(),
            VoteReceived {
                node_id: from,
                term,
                granted,
            },
        );

        self.persist_if_changed(&mut guard, before);
    }

    pub async fn on_entries_appended(self: &std::sync::Arc<Self>, from: u64, term: u64, success: bool, match_index: u64) {
        let mut guard = self.consensus.lock().unwrap();

        let ConsensusState {
            sm,
            storage,
            dispatcher,
            ..
        } = &mut *guard;

        sm.handle_entries_appended(
            storage,
            dispatcher,
            EntriesAppended {
                node_id: from,
                term,
                success,
                match_index,
            },
        );
    }

    fn persist_if_changed(&self, guard: &mut std::sync::MutexGuard<'_, ConsensusState>, before: (u64, Option<u64>)) {
        let after = (guard.sm.term, guard.sm.voted_for);
        if before != after {
            let metadata = Metadata {
                current_term: after.0,
                voted_for: after.1,
            };
            if let Err(err) = guard.metadata_store.save(&metadata) {
                tracing::error!(%err, "failed to persist raft metadata");
            }
        }
    }

    /// Submits a write for replication. Rejects immediately with a redirect
    /// hint if this node does not currently believe itself to be leader,
    /// rather than letting the command sit in the log only to be rejected
    /// deeper down.
    pub async fn propose(self: &std::sync::Arc<Self>, command: Command) -> Result<CommandOutcome> {
        let rx = {
            let mut guard = self.consensus.lock().unwrap();

            if guard.sm.state != State::Leader {
                return Err(self.not_leader_error(&guard));
            }

            let (tx, rx) = oneshot::channel();
            let node_cmd = NodeCommand::new(command, tx);

            let ConsensusState {
                sm,
                storage,
                dispatcher,
                ..
            } = &mut *guard;
            sm.handle_command(storage, dispatcher, node_cmd);

            rx
        };

        match tokio::time::timeout(Duration::from_millis(self.options.propose_timeout_ms), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NoLeader),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Services an incoming `RequestVote` RPC entirely synchronously: the
    /// reply is known the instant the state machine decides, so there is
    /// nothing to await.
    pub fn handle_request_vote(&self, args: RequestVote<u64>) -> VoteCasted<u64> {
        let capture = ReplyCapture::new();
        let mut guard = self.consensus.lock().unwrap();
        let before = (guard.sm.term, guard.sm.voted_for);

        let ConsensusState { sm, storage, .. } = &mut *guard;
        sm.handle_request_vote(&capture, storage, args);

        self.persist_if_changed(&mut guard, before);
        capture.take_vote().expect("handle_request_vote always replies")
    }

    pub fn handle_append_entries(&self, args: AppendEntries<u64>) -> EntriesReplicated<u64> {
        let capture = ReplyCapture::new();
        let mut guard = self.consensus.lock().unwrap();
        let before = (guard.sm.term, guard.sm.voted_for);

        let ConsensusState { sm, storage, .. } = &mut *guard;
        sm.handle_append_entries(&capture, storage, Instant::now(), args);

        self.persist_if_changed(&mut guard, before);
        capture
            .take_append()
            .expect("handle_append_entries always replies")
    }

    fn not_leader_error(&self, guard: &ConsensusState) -> Error {
        let leader_id = guard.sm.leader_id;
        let leader_address = leader_id.and_then(|id| guard.peers.get(&id)).map(|e| e.to_string());
        Error::not_leader(leader_id, leader_address)
    }

    pub fn leader_hint(&self) -> NotLeaderInfo {
        let guard = self.consensus.lock().unwrap();
        NotLeaderInfo {
            leader_id: guard.sm.leader_id,
            leader_address: guard
                .sm
                .leader_id
                .and_then(|id| guard.peers.get(&id))
                .map(|e| e.to_string()),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.consensus.lock().unwrap().sm.state == State::Leader
    }

    /// Registers a new non-voting replica with the leader so it starts
    /// receiving `AppendEntries` right away, mirroring the two-phase
    /// membership change from `add_server.py`: catch up as a non-voter
    /// first, promote once caught up. Leader-only; followers reject so the
    /// caller retries against whoever the redirect points them at.
    pub fn add_server(&self, server_id: u64, address: EndPoint) -> Result<()> {
        let mut guard = self.consensus.lock().unwrap();

        if guard.sm.state != State::Leader {
            return Err(self.not_leader_error(&guard));
        }

        guard.sm.add_non_voting_replica(server_id);
        guard.peers.insert(server_id, address);
        Ok(())
    }

    pub fn is_caught_up(&self, server_id: u64) -> bool {
        let guard = self.consensus.lock().unwrap();
        let last_index = guard.storage.last_entry_or_default().index;
        guard.sm.is_caught_up(&server_id, last_index)
    }

    pub fn promote_replica(&self, server_id: u64) {
        self.consensus.lock().unwrap().sm.promote_replica(&server_id);
    }

    pub(crate) fn commit_index(&self) -> u64 {
        self.consensus.lock().unwrap().sm.commit_index
    }

    pub(crate) fn read_entries_after(&self, index: u64, max_count: usize) -> Vec<chat_consensus::Entry> {
        use chat_consensus::PersistentStorage;
        self.consensus
            .lock()
            .unwrap()
            .storage
            .read_entries(index, max_count)
            .collect()
            .unwrap_or_default()
    }

    // ---- read-only query passthroughs, servable by any caught-up replica --

    pub async fn account_exists(&self, username: &str) -> bool {
        self.db.lock().await.account_exists(username)
    }

    pub async fn verify_password(&self, username: &str, password_hash: &[u8]) -> bool {
        self.db.lock().await.verify_password(username, password_hash)
    }

    pub async fn list_accounts(&self, pattern: &str, page: u32, per_page: u32) -> Page<AccountInfo> {
        self.db.lock().await.list_accounts(pattern, page, per_page)
    }

    pub async fn get_messages(&self, username: &str, count: u32) -> Vec<MessageRecord> {
        self.db.lock().await.get_messages(username, count)
    }

    pub async fn unread_count(&self, username: &str) -> u64 {
        self.db.lock().await.unread_count(username)
    }

    pub(crate) async fn apply_one(&self, index: u64, command: Command) -> Result<CommandOutcome> {
        let outcome = {
            let mut db = self.db.lock().await;
            db.apply(index, command)?
        };

        match &outcome {
            CommandOutcome::MessageSent { record } => self.subscriptions.notify(record),
            CommandOutcome::ServerPromoted { server_id } => self.promote_replica(*server_id),
            _ => {}
        }

        Ok(outcome)
    }

    pub(crate) async fn last_applied(&self) -> u64 {
        self.db.lock().await.last_applied
    }
}

async fn run_ticker(node: std::sync::Arc<Node>) {
    let period = Duration::from_millis(node.options.heartbeat_period_ms);
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;
        node.tick().await;
    }
}

pub fn log_startup(node: &Node) {
    info!(id = node.id, address = %node.bind_address, "chat node starting");
    debug!(
        election_timeout_min_ms = node.options.election_timeout_min_ms,
        election_timeout_max_ms = node.options.election_timeout_max_ms,
        "raft timing configured"
    );
}
