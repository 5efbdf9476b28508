use std::io;

use chat_consensus::{Entry, EntryId, IterateEntries, PersistentStorage};

/// Ephemeral log store with no disk backing, used by tests and by the
/// `chat-cluster-tests` harness where spinning up real files per node
/// would slow the suite down for no benefit.
#[derive(Default)]
pub struct InMemoryLogStore {
    entries: Vec<Entry>,
}

struct VecIter(std::vec::IntoIter<Entry>);

impl IterateEntries for VecIter {
    fn next_entry(&mut self) -> io::Result<Option<Entry>> {
        Ok(self.0.next())
    }
}

impl PersistentStorage for InMemoryLogStore {
    fn append_entries(&mut self, entries: Vec<Entry>) {
        self.entries.extend(entries);
    }

    fn read_entries(&self, index: u64, max_count: usize) -> Box<dyn IterateEntries + '_> {
        let slice = self
            .entries
            .iter()
            .filter(|e| e.index > index)
            .take(max_count)
            .cloned()
            .collect::<Vec<_>>();

        Box::new(VecIter(slice.into_iter()))
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
