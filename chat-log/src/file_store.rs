use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chat_consensus::{Entry, EntryId, IterateEntries, PersistentStorage};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct EntryLine {
    index: u64,
    term: u64,
    payload: Vec<u8>,
}

impl From<&Entry> for EntryLine {
    fn from(e: &Entry) -> Self {
        Self {
            index: e.index,
            term: e.term,
            payload: e.payload.to_vec(),
        }
    }
}

impl From<EntryLine> for Entry {
    fn from(line: EntryLine) -> Self {
        Entry {
            index: line.index,
            term: line.term,
            payload: line.payload.into(),
        }
    }
}

/// Append-only, JSON-lines-backed Raft log. Every append is followed by an
/// fsync so a crash never loses an entry the node has already acknowledged
/// to the leader. The whole log is also kept in memory, a tradeoff that is
/// fine at chat-demo scale and keeps reads lock-free relative to disk I/O.
pub struct FileLogStore {
    path: PathBuf,
    file: Mutex<File>,
    entries: Vec<Entry>,
}

impl FileLogStore {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let entries = read_existing_entries(&path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            entries,
        })
    }

    /// Rewrites the whole log file from the in-memory entries. Used after a
    /// truncation (`remove_entries`), which an append-only file can't
    /// express any other way.
    fn rewrite(&self) -> io::Result<()> {
        let tmp_path = {
            let mut p = self.path.clone();
            let name = p
                .file_name()
                .map(|n| format!("{}.tmp", n.to_string_lossy()))
                .unwrap_or_else(|| "log.tmp".to_string());
            p.set_file_name(name);
            p
        };

        {
            let mut tmp = File::create(&tmp_path)?;
            for entry in &self.entries {
                write_line(&mut tmp, entry)?;
            }
            tmp.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        let mut guard = self.file.lock().unwrap();
        *guard = OpenOptions::new().create(true).append(true).open(&self.path)?;

        Ok(())
    }
}

fn write_line(file: &mut File, entry: &Entry) -> io::Result<()> {
    let line = EntryLine::from(entry);
    let mut bytes = serde_json::to_vec(&line).map_err(to_io_err)?;
    bytes.push(b'\n');
    file.write_all(&bytes)?;
    file.sync_all()
}

fn to_io_err(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

fn read_existing_entries(path: &Path) -> io::Result<Vec<Entry>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let decoded: EntryLine = serde_json::from_str(&line).map_err(to_io_err)?;
        entries.push(Entry::from(decoded));
    }

    Ok(entries)
}

struct VecIter(std::vec::IntoIter<Entry>);

impl IterateEntries for VecIter {
    fn next_entry(&mut self) -> io::Result<Option<Entry>> {
        Ok(self.0.next())
    }
}

impl PersistentStorage for FileLogStore {
    fn append_entries(&mut self, entries: Vec<Entry>) {
        let mut guard = self.file.lock().unwrap();
        for entry in &entries {
            // Best effort: an I/O failure here leaves this node unable to
            // serve as leader or follower for this entry; panicking is the
            // honest behavior since the caller has nowhere safe to keep
            // going without risking data loss across the cluster.
            write_line(&mut guard, entry).expect("log append must be durable");
        }
        drop(guard);

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
        self.rewrite().expect("log truncation must be durable");
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

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use temp_testdir::TempDir;

    #[test]
    fn entries_survive_reopen() {
        let dir = TempDir::default();
        let path = dir.join("log.jsonl");

        {
            let mut store = FileLogStore::open(&path).unwrap();
            store.append_entries(vec![Entry {
                index: 1,
                term: 1,
                payload: Bytes::from_static(b"hello"),
            }]);
        }

        let store = FileLogStore::open(&path).unwrap();
        assert_eq!(store.last_entry(), Some(EntryId::new(1, 1)));
    }

    #[test]
    fn remove_entries_truncates_and_persists() {
        let dir = TempDir::default();
        let path = dir.join("log.jsonl");
        let mut store = FileLogStore::open(&path).unwrap();

        store.append_entries(vec![
            Entry {
                index: 1,
                term: 1,
                payload: Bytes::new(),
            },
            Entry {
                index: 2,
                term: 1,
                payload: Bytes::new(),
            },
        ]);

        store.remove_entries(&EntryId::new(2, 1));

        assert_eq!(store.last_entry(), Some(EntryId::new(1, 1)));

        let reopened = FileLogStore::open(&path).unwrap();
        assert_eq!(reopened.last_entry(), Some(EntryId::new(1, 1)));
    }
}
