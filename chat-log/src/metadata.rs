use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The small pieces of Raft state that must survive a restart alongside the
/// log itself: the current term and who we voted for in it. Anything else
/// (commit index, replica progress) is safe to rebuild from the log and
/// from talking to peers again.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Metadata {
    pub current_term: u64,
    pub voted_for: Option<u64>,
}

pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> io::Result<Metadata> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Metadata::default()),
            Err(e) => Err(e),
        }
    }

    /// Writes to a temp file in the same directory and renames it over the
    /// real path, so a crash mid-write never leaves a half-written,
    /// unparseable metadata file behind.
    pub fn save(&self, metadata: &Metadata) -> io::Result<()> {
        let bytes = serde_json::to_vec(metadata)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let tmp_path = tmp_path_for(&self.path);
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            use std::io::Write;
            tmp.write_all(&bytes)?;
            tmp.sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;

        if let Some(dir) = self.path.parent() {
            fsync_dir(dir)?;
        }

        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = tmp
        .file_name()
        .map(|n| format!("{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| "metadata.tmp".to_string());
    tmp.set_file_name(file_name);
    tmp
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> io::Result<()> {
    let dir_file = fs::File::open(dir)?;
    dir_file.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_testdir::TempDir;

    #[test]
    fn missing_file_yields_default_metadata() {
        let dir = TempDir::default();
        let store = MetadataStore::new(dir.join("metadata.json"));

        assert_eq!(store.load().unwrap(), Metadata::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::default();
        let store = MetadataStore::new(dir.join("metadata.json"));

        let metadata = Metadata {
            current_term: 7,
            voted_for: Some(3),
        };

        store.save(&metadata).unwrap();

        assert_eq!(store.load().unwrap(), metadata);
    }
}
