use std::cell::RefCell;
use std::time::Instant;

use bytes::{Bytes, BytesMut};

use crate::entry::{Entry, EntryId};
use crate::msg::{
    AppendEntries, EntriesAppended, EntriesReplicated, RequestVote, VoteCasted, VoteReceived,
};
use crate::{
    CommandDispatch, IterateEntries, PersistentStorage, RaftCommand, RaftSM, RaftSender,
    RejectReason, State, TimeRange, UserCommand,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct TestCommand(u64);

impl RaftCommand for TestCommand {
    fn write(&self, buffer: &mut BytesMut) {
        buffer.extend_from_slice(&self.0.to_be_bytes());
    }
}

impl UserCommand for TestCommand {
    fn is_read(&self) -> bool {
        false
    }

    fn reject(self, _reason: RejectReason) {}
}

#[derive(Default)]
struct InMemoryLog {
    entries: Vec<Entry>,
}

struct VecIter(std::vec::IntoIter<Entry>);

impl IterateEntries for VecIter {
    fn next_entry(&mut self) -> std::io::Result<Option<Entry>> {
        Ok(self.0.next())
    }
}

impl PersistentStorage for InMemoryLog {
    fn append_entries(&mut self, entries: Vec<Entry>) {
        self.entries.extend(entries);
    }

    fn read_entries(&self, index: u64, max_count: usize) -> Box<dyn IterateEntries + '_> {
        let entries = self
            .entries
            .iter()
            .filter(|e| e.index > index)
            .take(max_count)
            .cloned()
            .collect::<Vec<_>>();

        Box::new(VecIter(entries.into_iter()))
    }

    fn remove_entries(&mut self, from: &EntryId) {
        self.entries.retain(|e| e.index < from.index);
    }

    fn last_entry(&self) -> Option<EntryId> {
        self.entries.last().map(|e| EntryId::new(e.index, e.term))
    }

    fn previous_entry(&self, index: u64) -> Option<EntryId> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.index < index)
            .map(|e| EntryId::new(e.index, e.term))
    }

    fn contains_entry(&self, entry_id: &EntryId) -> bool {
        if entry_id.index == 0 && entry_id.term == 0 {
            return true;
        }

        self.entries
            .iter()
            .any(|e| e.index == entry_id.index && e.term == entry_id.term)
    }
}

#[derive(Default)]
struct RecordingSender {
    sent_votes: RefCell<Vec<(u64, RequestVote<u64>)>>,
    sent_appends: RefCell<Vec<(u64, AppendEntries<u64>)>>,
}

impl RaftSender for RecordingSender {
    type Id = u64;

    fn request_vote(&self, target: u64, req: RequestVote<u64>) {
        self.sent_votes.borrow_mut().push((target, req));
    }

    fn vote_casted(&self, _target: u64, _resp: VoteCasted<u64>) {}

    fn entries_replicated(&self, _target: u64, _resp: EntriesReplicated<u64>) {}

    fn replicate_entries(&self, target: u64, req: AppendEntries<u64>) {
        self.sent_appends.borrow_mut().push((target, req));
    }
}

#[derive(Default)]
struct RecordingDispatcher {
    dispatched: RefCell<Vec<TestCommand>>,
}

impl CommandDispatch for RecordingDispatcher {
    type Command = TestCommand;

    fn dispatch(&self, cmd: TestCommand) {
        self.dispatched.borrow_mut().push(cmd);
    }
}

fn single_node_sm() -> RaftSM<u64, TestCommand> {
    let range = TimeRange::new(150, 300);
    RaftSM::new(1, vec![], &range, Instant::now())
}

#[test]
fn single_node_cluster_is_leader_on_creation() {
    let sm = single_node_sm();
    assert_eq!(sm.state, State::Leader);
}

#[test]
fn single_node_commands_dispatch_immediately() {
    let mut sm = single_node_sm();
    let mut storage = InMemoryLog::default();
    let dispatcher = RecordingDispatcher::default();

    sm.handle_command(&mut storage, &dispatcher, TestCommand(42));

    assert_eq!(dispatcher.dispatched.borrow().as_slice(), &[TestCommand(42)]);
    assert_eq!(storage.entries.len(), 1);
}

#[test]
fn follower_grants_vote_when_log_is_up_to_date() {
    let range = TimeRange::new(150, 300);
    let mut sm: RaftSM<u64, TestCommand> = RaftSM::new(2, vec![1], &range, Instant::now());
    let storage = InMemoryLog::default();
    let sender = RecordingSender::default();

    sm.handle_request_vote(
        &sender,
        &storage,
        RequestVote {
            term: 1,
            candidate_id: 1,
            last_log_index: 0,
            last_log_term: 0,
        },
    );

    assert_eq!(sm.term, 1);
    assert_eq!(sm.voted_for, Some(1));
}

#[test]
fn vote_granted_for_higher_term_even_with_shorter_log() {
    // "At least as up-to-date" compares terms first: a candidate whose last
    // entry is from a strictly newer term wins the comparison even if its
    // log is shorter than the receiver's.
    let range = TimeRange::new(150, 300);
    let mut sm: RaftSM<u64, TestCommand> = RaftSM::new(2, vec![1], &range, Instant::now());
    let storage = InMemoryLog {
        entries: vec![Entry {
            index: 10,
            term: 1,
            payload: Bytes::new(),
        }],
    };
    let sender = RecordingSender::default();

    sm.handle_request_vote(
        &sender,
        &storage,
        RequestVote {
            term: 2,
            candidate_id: 1,
            last_log_index: 3,
            last_log_term: 2,
        },
    );

    assert_eq!(sm.voted_for, Some(1));
}

#[test]
fn stale_term_request_vote_is_refused() {
    let range = TimeRange::new(150, 300);
    let mut sm: RaftSM<u64, TestCommand> = RaftSM::new(2, vec![1], &range, Instant::now());
    sm.term = 5;
    let storage = InMemoryLog::default();
    let sender = RecordingSender::default();

    sm.handle_request_vote(
        &sender,
        &storage,
        RequestVote {
            term: 1,
            candidate_id: 1,
            last_log_index: 0,
            last_log_term: 0,
        },
    );

    assert_eq!(sm.term, 5);
    assert!(sm.voted_for.is_none());
}

#[test]
fn follower_appends_leader_entries_and_advances_commit_index() {
    let range = TimeRange::new(150, 300);
    let mut sm: RaftSM<u64, TestCommand> = RaftSM::new(2, vec![1], &range, Instant::now());
    let mut storage = InMemoryLog::default();
    let sender = RecordingSender::default();

    sm.handle_append_entries(
        &sender,
        &mut storage,
        Instant::now(),
        AppendEntries {
            term: 1,
            leader_id: 1,
            prev_log_index: 0,
            prev_log_term: 0,
            leader_commit: 1,
            entries: vec![Entry {
                index: 1,
                term: 1,
                payload: Bytes::new(),
            }],
        },
    );

    assert_eq!(storage.entries.len(), 1);
    assert_eq!(sm.commit_index, 1);
    assert_eq!(sm.state, State::Follower);
}

#[test]
fn follower_rejects_append_entries_with_unknown_prev_entry() {
    let range = TimeRange::new(150, 300);
    let mut sm: RaftSM<u64, TestCommand> = RaftSM::new(2, vec![1], &range, Instant::now());
    let mut storage = InMemoryLog::default();
    let sender = RecordingSender::default();

    sm.handle_append_entries(
        &sender,
        &mut storage,
        Instant::now(),
        AppendEntries {
            term: 1,
            leader_id: 1,
            prev_log_index: 5,
            prev_log_term: 1,
            leader_commit: 5,
            entries: vec![],
        },
    );

    assert!(storage.entries.is_empty());
    assert_eq!(sm.commit_index, 0);
}

#[test]
fn candidate_becomes_leader_after_majority_vote() {
    let range = TimeRange::new(150, 300);
    let mut sm: RaftSM<u64, TestCommand> = RaftSM::new(1, vec![2, 3], &range, Instant::now());
    sm.state = State::Candidate;
    sm.term = 1;
    let storage = InMemoryLog::default();
    let sender = RecordingSender::default();

    sm.handle_vote_received(
        &range,
        &storage,
        &sender,
        Instant::now(),
        VoteReceived {
            node_id: 2,
            term: 1,
            granted: true,
        },
    );

    assert_eq!(sm.state, State::Leader);
}

#[test]
fn non_voting_replica_does_not_count_toward_quorum() {
    let range = TimeRange::new(150, 300);
    let mut sm: RaftSM<u64, TestCommand> = RaftSM::new(1, vec![2], &range, Instant::now());
    sm.add_non_voting_replica(3);
    sm.state = State::Candidate;
    sm.term = 1;
    let storage = InMemoryLog::default();
    let sender = RecordingSender::default();

    // Only one voting peer (2) besides ourselves: a single granted vote is
    // already a majority of (1 leader + 1 voting peer), so we become leader
    // without needing anything from the non-voting replica.
    sm.handle_vote_received(
        &range,
        &storage,
        &sender,
        Instant::now(),
        VoteReceived {
            node_id: 2,
            term: 1,
            granted: true,
        },
    );

    assert_eq!(sm.state, State::Leader);
}

#[test]
fn promoted_replica_is_reflected_in_state() {
    let range = TimeRange::new(150, 300);
    let mut sm: RaftSM<u64, TestCommand> = RaftSM::new(1, vec![2], &range, Instant::now());
    sm.add_non_voting_replica(3);

    assert!(!sm.replicas.get(&3).unwrap().voting);

    sm.promote_replica(&3);

    assert!(sm.replicas.get(&3).unwrap().voting);
}

#[test]
fn pending_write_is_rejected_when_not_leader() {
    let range = TimeRange::new(150, 300);
    let mut sm: RaftSM<u64, TestCommand> = RaftSM::new(2, vec![1], &range, Instant::now());
    let mut storage = InMemoryLog::default();
    let dispatcher = RecordingDispatcher::default();

    sm.handle_command(&mut storage, &dispatcher, TestCommand(7));

    assert!(dispatcher.dispatched.borrow().is_empty());
    assert!(storage.entries.is_empty());
}

#[test]
fn commit_index_advances_on_majority_even_with_one_stalled_replica() {
    // Three voting members total (this leader plus peers 2 and 3). Peer 3 is
    // down and stuck at match_index 0; peer 2 has replicated through index 3.
    // A strict majority (leader + peer 2) has index 3, so commit_index must
    // advance to 3 even though the minimum match_index across all replicas
    // is still 0.
    let range = TimeRange::new(150, 300);
    let mut sm: RaftSM<u64, TestCommand> = RaftSM::new(1, vec![2, 3], &range, Instant::now());
    sm.state = State::Leader;
    sm.term = 1;
    let storage = InMemoryLog {
        entries: vec![
            Entry { index: 1, term: 1, payload: Bytes::new() },
            Entry { index: 2, term: 1, payload: Bytes::new() },
            Entry { index: 3, term: 1, payload: Bytes::new() },
        ],
    };
    let dispatcher = RecordingDispatcher::default();

    sm.handle_entries_appended(
        &storage,
        &dispatcher,
        EntriesAppended {
            node_id: 2,
            term: 1,
            success: true,
            match_index: 3,
        },
    );

    assert_eq!(sm.commit_index, 3);
}

#[test]
fn append_entries_truncation_keeps_the_agreed_prefix() {
    // Follower already has entries 1 and 2 from term 1. The leader sends a
    // conflicting entry at index 2 (now term 2) plus a new entry at index 3.
    // Entry 1, the agreed common point, must survive the truncation.
    let range = TimeRange::new(150, 300);
    let mut sm: RaftSM<u64, TestCommand> = RaftSM::new(2, vec![1], &range, Instant::now());
    let mut storage = InMemoryLog {
        entries: vec![
            Entry { index: 1, term: 1, payload: Bytes::new() },
            Entry { index: 2, term: 1, payload: Bytes::new() },
        ],
    };
    let sender = RecordingSender::default();

    sm.handle_append_entries(
        &sender,
        &mut storage,
        Instant::now(),
        AppendEntries {
            term: 2,
            leader_id: 1,
            prev_log_index: 1,
            prev_log_term: 1,
            leader_commit: 3,
            entries: vec![
                Entry { index: 2, term: 2, payload: Bytes::new() },
                Entry { index: 3, term: 2, payload: Bytes::new() },
            ],
        },
    );

    assert_eq!(
        storage.entries,
        vec![
            Entry { index: 1, term: 1, payload: Bytes::new() },
            Entry { index: 2, term: 2, payload: Bytes::new() },
            Entry { index: 3, term: 2, payload: Bytes::new() },
        ]
    );
}

#[test]
fn append_entries_retransmission_does_not_duplicate_matching_entries() {
    // The follower already has the exact entries the leader resends (ack
    // lost, leader retried from a `next_index` it never advanced). The
    // batch must be a no-op, not a second copy of the same indices.
    let range = TimeRange::new(150, 300);
    let mut sm: RaftSM<u64, TestCommand> = RaftSM::new(2, vec![1], &range, Instant::now());
    let mut storage = InMemoryLog {
        entries: vec![
            Entry { index: 1, term: 1, payload: Bytes::new() },
            Entry { index: 2, term: 1, payload: Bytes::new() },
        ],
    };
    let sender = RecordingSender::default();

    sm.handle_append_entries(
        &sender,
        &mut storage,
        Instant::now(),
        AppendEntries {
            term: 1,
            leader_id: 1,
            prev_log_index: 0,
            prev_log_term: 0,
            leader_commit: 2,
            entries: vec![
                Entry { index: 1, term: 1, payload: Bytes::new() },
                Entry { index: 2, term: 1, payload: Bytes::new() },
            ],
        },
    );

    assert_eq!(
        storage.entries,
        vec![
            Entry { index: 1, term: 1, payload: Bytes::new() },
            Entry { index: 2, term: 1, payload: Bytes::new() },
        ]
    );
}

// Property tests over `PersistentStorage`'s own invariants (I2, I3), using
// the same `arb_entry`/`arb_entries` generator shape as `geth-consensus`'s
// own storage property tests.
mod storage_properties {
    use bytes::Bytes;
    use proptest::collection::vec;
    use proptest::prelude::{any, Strategy};
    use proptest::{prop_compose, proptest};

    use super::InMemoryLog;
    use crate::entry::{Entry, EntryId};
    use crate::PersistentStorage;

    prop_compose! {
        fn arb_entry(index_range: impl Strategy<Value = u64>)(
            index in index_range,
            term in 1u64..=100,
            payload in vec(any::<u8>(), 0..=10),
        ) -> Entry {
            Entry {
                index,
                term,
                payload: Bytes::from(payload),
            }
        }
    }

    prop_compose! {
        fn arb_entries(index_range: impl Strategy<Value = u64>)(
            mut entries in vec(arb_entry(index_range), 0..=50),
        ) -> Vec<Entry> {
            entries.sort_by(|a: &Entry, b| (a.index, a.term).cmp(&(b.index, b.term)));
            entries.dedup_by_key(|e| e.index);
            entries
        }
    }

    proptest! {
        #[test]
        fn append_then_contains_every_entry(entries in arb_entries(1u64..=100)) {
            let mut storage = InMemoryLog::default();
            storage.append_entries(entries.clone());

            for entry in &entries {
                assert!(storage.contains_entry(&EntryId::new(entry.index, entry.term)));
            }
        }

        #[test]
        fn contains_entry_is_false_for_an_index_never_appended(
            entries in arb_entries(1u64..=100),
            probe_index in 101u64..=200,
            probe_term in 200u64..=300,
        ) {
            let mut storage = InMemoryLog::default();
            storage.append_entries(entries);

            assert!(!storage.contains_entry(&EntryId::new(probe_index, probe_term)));
        }

        // I2: truncating the suffix from `from` never disturbs an entry
        // whose index is strictly below it.
        #[test]
        fn remove_entries_never_touches_entries_before_the_cut(
            entries in arb_entries(1u64..=100),
            cut in 1u64..=100,
        ) {
            let mut storage = InMemoryLog::default();
            storage.append_entries(entries.clone());
            storage.remove_entries(&EntryId::new(cut, 0));

            for entry in entries.iter().filter(|e| e.index < cut) {
                assert!(storage.contains_entry(&EntryId::new(entry.index, entry.term)));
            }
            assert!(storage.entries.iter().all(|e| e.index < cut));
        }
    }

    #[test]
    fn empty_storage_contains_the_zero_sentinel() {
        let storage = InMemoryLog::default();
        assert!(storage.contains_entry(&EntryId::new(0, 0)));
    }
}
