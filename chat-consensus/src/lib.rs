use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use rand::{thread_rng, Rng};

pub use entry::{Entry, EntryId};
pub use msg::{
    AppendEntries, EntriesAppended, EntriesReplicated, RequestVote, VoteCasted, VoteReceived,
};
pub use state_machine::RaftSM;

mod entry;
mod msg;
mod state_machine;

#[cfg(test)]
mod tests;

/// Serializes a command into the log-entry payload. Implemented by whatever
/// concrete command type a node uses; `chat-node` wraps `chat_common::Command`
/// together with a reply channel to satisfy this and `UserCommand` below.
pub trait RaftCommand {
    fn write(&self, buffer: &mut BytesMut);
}

pub trait CommandDispatch {
    type Command: UserCommand;

    fn dispatch(&self, cmd: Self::Command);
}

pub trait UserCommand: RaftCommand {
    fn is_read(&self) -> bool;

    fn reject(self, reason: RejectReason);
}

/// Why `handle_command` refused to accept a write, surfaced back to the
/// caller through `UserCommand::reject`.
#[derive(Debug, Clone, Copy)]
pub enum RejectReason {
    NotLeader,
}

pub trait RaftSender {
    type Id: Ord;

    fn request_vote(&self, target: Self::Id, req: RequestVote<Self::Id>);
    fn vote_casted(&self, target: Self::Id, resp: VoteCasted<Self::Id>);
    fn entries_replicated(&self, target: Self::Id, resp: EntriesReplicated<Self::Id>);
    fn replicate_entries(&self, target: Self::Id, req: AppendEntries<Self::Id>);
}

pub trait PersistentStorage {
    fn append_entries(&mut self, entries: Vec<Entry>);
    fn read_entries(&self, index: u64, max_count: usize) -> Box<dyn IterateEntries + '_>;
    fn remove_entries(&mut self, from: &EntryId);
    fn last_entry(&self) -> Option<EntryId>;
    fn previous_entry(&self, index: u64) -> Option<EntryId>;
    fn contains_entry(&self, entry_id: &EntryId) -> bool;

    fn append_entry(&mut self, term: u64, payload: Bytes) -> u64 {
        let index = self.next_index();

        self.append_entries(vec![Entry {
            index,
            term,
            payload,
        }]);

        index
    }

    fn last_entry_or_default(&self) -> EntryId {
        self.last_entry().unwrap_or_default()
    }

    /// Requires `&mut self` so only one caller can be deciding the next
    /// index at a time; the log append path and the election path must
    /// never race on this value. Indices are 1-based: an
    /// empty log's first entry lands at index 1, leaving 0 free as the
    /// "before the log" sentinel `EntryId::default()` already uses.
    fn next_index(&mut self) -> u64 {
        self.last_entry().map(|e| e.index + 1).unwrap_or(1)
    }

    fn previous_entry_or_default(&self, index: u64) -> EntryId {
        self.previous_entry(index).unwrap_or_else(|| EntryId::new(0, 0))
    }
}

pub trait IterateEntries {
    fn next_entry(&mut self) -> io::Result<Option<Entry>>;

    fn collect(mut self: Box<Self>) -> io::Result<Vec<Entry>> {
        let mut entries = Vec::new();

        while let Some(entry) = self.next_entry()? {
            entries.push(entry);
        }

        Ok(entries)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Candidate,
    Follower,
    Leader,
}

pub struct TimeRange {
    low: u64,
    high: u64,
}

impl TimeRange {
    pub fn new(low: u64, high: u64) -> Self {
        Self { low, high }
    }

    pub fn new_timeout(&self) -> Duration {
        let mut rng = thread_rng();

        Duration::from_millis(rng.gen_range(self.low..self.high))
    }
}

/// A peer as tracked by the leader. Non-voting replicas (`voting = false`)
/// are caught up via the normal `AppendEntries` path but excluded from vote
/// tallies and commit-index quorum math until a `PromoteServer` command
/// flips them over.
pub struct Replica<Id> {
    pub id: Id,
    pub next_index: u64,
    pub match_index: u64,
    /// When sending entries to a replica, represents the last index of the
    /// batch. If replication succeeds, this value updates `next_index`.
    pub batch_end_index: u64,
    pub voting: bool,
}

impl<Id> Replica<Id> {
    pub fn new(id: Id) -> Self {
        Self {
            id,
            next_index: 0,
            match_index: 0,
            batch_end_index: 0,
            voting: true,
        }
    }

    pub fn new_non_voting(id: Id) -> Self {
        Self {
            voting: false,
            ..Self::new(id)
        }
    }
}
