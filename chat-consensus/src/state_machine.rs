use std::cmp::min;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

use bytes::BytesMut;

use crate::entry::EntryId;
use crate::msg::{
    AppendEntries, EntriesAppended, EntriesReplicated, RequestVote, VoteCasted, VoteReceived,
};
use crate::{
    CommandDispatch, PersistentStorage, RaftSender, RejectReason, Replica, State, TimeRange,
    UserCommand,
};

/// The Raft state machine for a single node, driven by whichever transport
/// (gRPC, an in-process channel in tests) feeds it events. Held behind a
/// single coarse lock by the owning node: every `handle_*` call runs to
/// completion before the lock is released, so none of these methods do I/O
/// themselves — `storage` and `sender` are expected to be cheap/non-blocking
/// handles, with actual disk and network work happening behind them.
pub struct RaftSM<NodeId, Command> {
    pub id: NodeId,
    pub term: u64,
    pub state: State,
    pub commit_index: u64,
    pub voted_for: Option<NodeId>,
    /// Best known leader for the current term; `None` while this node is a
    /// candidate or has not yet heard from a leader in the term it just
    /// adopted. Used to build the redirect hint on a `NotLeader` rejection.
    pub leader_id: Option<NodeId>,
    pub tally: HashSet<NodeId>,
    pub time: Instant,
    pub election_timeout: Duration,
    pub inflights: VecDeque<(u64, Command)>,
    pub buffer: BytesMut,
    pub replicas: HashMap<NodeId, Replica<NodeId>>,
}

impl<NodeId, Command> RaftSM<NodeId, Command>
where
    NodeId: Clone + Ord + Hash,
    Command: UserCommand,
{
    pub fn new(id: NodeId, seeds: Vec<NodeId>, time_range: &TimeRange, now: Instant) -> Self {
        let mut replicas = HashMap::new();
        for seed_id in seeds {
            replicas.insert(seed_id.clone(), Replica::new(seed_id));
        }

        let state = if replicas.is_empty() {
            State::Leader
        } else {
            State::Follower
        };

        let leader_id = if state == State::Leader {
            Some(id.clone())
        } else {
            None
        };

        Self {
            id,
            term: 0,
            state,
            commit_index: 0,
            voted_for: None,
            leader_id,
            tally: HashSet::new(),
            time: now,
            election_timeout: time_range.new_timeout(),
            inflights: VecDeque::new(),
            buffer: BytesMut::new(),
            replicas,
        }
    }

    fn voting_replica_count(&self) -> usize {
        self.replicas.values().filter(|r| r.voting).count()
    }

    pub fn handle_request_vote<S, P>(&mut self, sender: &S, storage: &P, args: RequestVote<NodeId>)
    where
        S: RaftSender<Id = NodeId>,
        P: PersistentStorage,
    {
        if args.term < self.term {
            sender.vote_casted(
                args.candidate_id,
                VoteCasted {
                    node_id: self.id.clone(),
                    term: self.term,
                    granted: false,
                },
            );

            return;
        }

        let last_entry_id = storage.last_entry().unwrap_or_default();
        let candidate_up_to_date = args.last_log_term > last_entry_id.term
            || (args.last_log_term == last_entry_id.term && args.last_log_index >= last_entry_id.index);

        let granted;
        if self.term < args.term || self.voted_for.is_none() {
            if self.term < args.term {
                self.leader_id = None;
            }
            self.term = args.term;

            granted = candidate_up_to_date;
            if granted {
                self.voted_for = Some(args.candidate_id.clone());
                self.state = State::Follower;
            }
        } else {
            granted = self.voted_for == Some(args.candidate_id.clone()) && candidate_up_to_date;
        }

        sender.vote_casted(
            args.candidate_id,
            VoteCasted {
                node_id: self.id.clone(),
                term: self.term,
                granted,
            },
        )
    }

    pub fn handle_append_entries<S, P>(
        &mut self,
        sender: &S,
        storage: &mut P,
        now: Instant,
        args: AppendEntries<NodeId>,
    ) where
        S: RaftSender<Id = NodeId>,
        P: PersistentStorage,
    {
        if self.term > args.term {
            sender.entries_replicated(
                args.leader_id,
                EntriesReplicated {
                    node_id: self.id.clone(),
                    term: self.term,
                    success: false,
                    match_index: storage.last_entry_or_default().index,
                },
            );

            return;
        }

        if self.term < args.term {
            self.voted_for = None;
            self.term = args.term;
        }

        self.time = now;
        self.state = State::Follower;
        self.leader_id = Some(args.leader_id.clone());

        if !storage.contains_entry(&EntryId::new(args.prev_log_index, args.prev_log_term)) {
            sender.entries_replicated(
                args.leader_id,
                EntriesReplicated {
                    node_id: self.id.clone(),
                    term: self.term,
                    success: false,
                    match_index: storage.last_entry_or_default().index,
                },
            );

            return;
        }

        let last_entry_index = args
            .entries
            .last()
            .map(|e| e.index)
            .unwrap_or(args.prev_log_index);

        if args.entries.is_empty() {
            sender.entries_replicated(
                args.leader_id,
                EntriesReplicated {
                    node_id: self.id.clone(),
                    term: self.term,
                    success: true,
                    match_index: last_entry_index,
                },
            );

            if args.leader_commit > self.commit_index {
                self.commit_index = min(args.leader_commit, last_entry_index);
            }

            return;
        }

        // Reconcile the leader's entries against what is already on disk,
        // per §4.3.3(d): walk them in index order, no-op on anything that
        // already agrees with the leader, and truncate the suffix from the
        // first index where the two logs disagree before appending the
        // rest. A blind append here would duplicate a retransmitted batch
        // (ack lost, leader resends from a `next_index` it never advanced).
        let mut to_append = Vec::with_capacity(args.entries.len());
        let mut diverged = false;

        for entry in args.entries {
            if !diverged {
                let existing = storage.previous_entry_or_default(entry.index + 1);

                if existing.index == entry.index {
                    if existing.term == entry.term {
                        continue;
                    }

                    storage.remove_entries(&EntryId::new(entry.index, entry.term));
                    diverged = true;
                }
            }

            to_append.push(entry);
        }

        if !to_append.is_empty() {
            storage.append_entries(to_append);
        }

        if args.leader_commit > self.commit_index {
            self.commit_index = min(args.leader_commit, last_entry_index);
        }

        sender.entries_replicated(
            args.leader_id,
            EntriesReplicated {
                node_id: self.id.clone(),
                term: self.term,
                success: true,
                match_index: last_entry_index,
            },
        );
    }

    pub fn handle_vote_received<P, S>(
        &mut self,
        time_range: &TimeRange,
        storage: &P,
        sender: &S,
        now: Instant,
        args: VoteReceived<NodeId>,
    ) where
        P: PersistentStorage,
        S: RaftSender<Id = NodeId>,
    {
        if self.term > args.term || self.state == State::Leader {
            return;
        }

        if self.term < args.term {
            self.term = args.term;
            self.state = State::Follower;
            self.leader_id = None;
            self.time = now;
            self.election_timeout = time_range.new_timeout();

            return;
        }

        if args.granted {
            self.tally.insert(args.node_id);

            if self.tally.len() + 1 >= (self.voting_replica_count() + 1) / 2 + 1 {
                self.state = State::Leader;
                self.leader_id = Some(self.id.clone());

                let last_index = storage.last_entry().map(|e| e.index).unwrap_or_default();
                for replica in self.replicas.values_mut() {
                    replica.next_index = last_index + 1;
                    replica.match_index = 0;
                }

                self.replicate_entries(storage, sender);
            }
        }
    }

    pub fn handle_entries_appended<D, P>(
        &mut self,
        storage: &P,
        dispatcher: &D,
        args: EntriesAppended<NodeId>,
    ) where
        D: CommandDispatch<Command = Command>,
        P: PersistentStorage,
    {
        if self.state != State::Leader {
            return;
        }

        if let Some(replica) = self.replicas.get_mut(&args.node_id) {
            if args.success {
                replica.match_index = args.match_index;
                replica.next_index = args.match_index + 1;

                // N is committed once a strict majority of voting members
                // (the leader counts as one) have replicated it, not once
                // every voting member has — a single down follower must
                // never pin the commit index at its stale match_index.
                // Sorting every voting replica's match_index alongside the
                // leader's own last-log index (descending) and taking the
                // value at the majority-sized prefix's end gives the
                // highest N that a majority has reached.
                let mut match_indices: Vec<u64> = self
                    .replicas
                    .values()
                    .filter(|r| r.voting)
                    .map(|r| r.match_index)
                    .collect();
                match_indices.push(storage.last_entry().map(|e| e.index).unwrap_or(0));
                match_indices.sort_unstable_by(|a, b| b.cmp(a));

                let majority = match_indices.len() / 2 + 1;
                let candidate = match_indices[majority - 1];

                // A leader may only conclude an entry is committed by
                // counting replicas if that entry was created in its own
                // term; an entry inherited from a previous leader can still
                // be replaced until an entry of the current term is
                // itself committed (Raft's figure-8 safety rule).
                if candidate > self.commit_index {
                    let entry_term = storage.previous_entry_or_default(candidate + 1).term;
                    if entry_term == self.term {
                        self.commit_index = candidate;
                    }
                }

                while let Some((index, cmd)) = self.inflights.pop_front() {
                    if index <= self.commit_index {
                        dispatcher.dispatch(cmd);
                    } else {
                        self.inflights.push_front((index, cmd));
                        break;
                    }
                }
            } else {
                replica.next_index = replica.next_index.saturating_sub(1).max(args.match_index);
            }
        }
    }

    pub fn handle_command<D, P>(&mut self, storage: &mut P, dispatcher: &D, cmd: Command)
    where
        P: PersistentStorage,
        D: CommandDispatch<Command = Command>,
    {
        if !cmd.is_read() && self.state != State::Leader {
            cmd.reject(RejectReason::NotLeader);
            return;
        }

        cmd.write(&mut self.buffer);
        let index = storage.append_entry(self.term, self.buffer.split().freeze());

        if self.replicas.is_empty() {
            // No peers to form a quorum with: this node's own log is the
            // whole cluster, so the entry is committed the instant it is
            // durable.
            self.commit_index = index;
            dispatcher.dispatch(cmd);
        } else {
            self.inflights.push_back((index, cmd));
        }
    }

    pub fn handle_tick<P, S>(&mut self, time_range: &TimeRange, storage: &P, sender: &S, now: Instant)
    where
        P: PersistentStorage,
        S: RaftSender<Id = NodeId>,
    {
        if self.replicas.is_empty() {
            return;
        }

        if self.state == State::Leader {
            self.replicate_entries(storage, sender);
        } else if now.duration_since(self.time) >= self.election_timeout {
            self.state = State::Candidate;
            self.term += 1;
            self.voted_for = Some(self.id.clone());
            self.leader_id = None;
            self.election_timeout = time_range.new_timeout();
            self.time = now;
            self.tally.clear();

            let last_entry = storage.last_entry_or_default();
            for replica in self.replicas.values().filter(|r| r.voting) {
                sender.request_vote(
                    replica.id.clone(),
                    RequestVote {
                        term: self.term,
                        candidate_id: self.id.clone(),
                        last_log_index: last_entry.index,
                        last_log_term: last_entry.term,
                    },
                );
            }
        }
    }

    pub fn replicate_entries<P, S>(&self, storage: &P, sender: &S)
    where
        P: PersistentStorage,
        S: RaftSender<Id = NodeId>,
    {
        for replica in self.replicas.values() {
            let prev_entry = storage.previous_entry_or_default(replica.next_index);

            let entries = storage.read_entries(prev_entry.index, 500);

            match entries.collect() {
                Err(_) => {
                    // TODO - surface this through a log so a persistent storage
                    // fault on the leader doesn't fail silently.
                    break;
                }

                Ok(entries) => {
                    sender.replicate_entries(
                        replica.id.clone(),
                        AppendEntries {
                            term: self.term,
                            leader_id: self.id.clone(),
                            prev_log_index: prev_entry.index,
                            prev_log_term: prev_entry.term,
                            leader_commit: self.commit_index,
                            entries,
                        },
                    );
                }
            }
        }
    }

    /// Leader-side entry point for `AddServer`: starts replicating to a new
    /// peer immediately as a non-voting member, without going through the
    /// log. It only becomes part of quorum once the cluster commits a
    /// `PromoteServer` command naming it, via [`Self::promote_replica`].
    pub fn add_non_voting_replica(&mut self, id: NodeId) {
        self.replicas
            .entry(id.clone())
            .or_insert_with(|| Replica::new_non_voting(id));
    }

    /// Applied by every node when a committed `PromoteServer` command
    /// reaches the apply loop, flipping a caught-up replica into a voting
    /// member so it counts toward future quorums.
    pub fn promote_replica(&mut self, id: &NodeId) {
        if let Some(replica) = self.replicas.get_mut(id) {
            replica.voting = true;
        }
    }

    pub fn is_caught_up(&self, id: &NodeId, log_last_index: u64) -> bool {
        self.replicas
            .get(id)
            .map(|r| r.match_index >= log_last_index)
            .unwrap_or(false)
    }
}
