use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::{ClinicStore, StoreError, StoreSnapshot};

const SNAPSHOT_FILE: &str = "clinic.json";

/// Manages storage and retrieval of store snapshots on disk.
///
/// Clones share one write lock, so saves never interleave on the temp file.
#[derive(Debug, Clone)]
pub struct PersistenceManager {
    base_path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl PersistenceManager {
    pub fn new(base_path: impl AsRef<Path>) -> io::Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(PersistenceManager {
            base_path,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.base_path.join(SNAPSHOT_FILE)
    }

    /// Save a snapshot to disk
    pub fn save(&self, snapshot: &StoreSnapshot) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_snapshot(snapshot)
    }

    /// Snapshot the store and save it. The snapshot is taken under the write
    /// lock, so a later save always carries the later state.
    pub fn save_store(&self, store: &ClinicStore) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_snapshot(&store.snapshot())
    }

    fn write_snapshot(&self, snapshot: &StoreSnapshot) -> Result<(), StoreError> {
        let path = self.snapshot_path();
        let serialized = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| StoreError::Persistence(format!("Serialization failed: {}", e)))?;

        // Write to a temporary file first
        let temp_path = path.with_extension("tmp");
        let mut file = File::create(&temp_path)
            .map_err(|e| StoreError::Persistence(format!("Failed to create file: {}", e)))?;

        file.write_all(&serialized)
            .map_err(|e| StoreError::Persistence(format!("Failed to write data: {}", e)))?;

        file.sync_all()
            .map_err(|e| StoreError::Persistence(format!("Failed to sync data: {}", e)))?;

        // Rename temp file to final name (atomic operation on most filesystems)
        fs::rename(&temp_path, &path)
            .map_err(|e| StoreError::Persistence(format!("Failed to rename file: {}", e)))?;

        tracing::debug!(path = %path.display(), bytes = serialized.len(), "snapshot saved");
        Ok(())
    }

    /// Load the last saved snapshot, `None` when nothing was saved yet
    pub fn load(&self) -> Result<Option<StoreSnapshot>, StoreError> {
        let path = self.snapshot_path();

        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Persistence(format!("Failed to open snapshot file: {}", e))),
        };

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .map_err(|e| StoreError::Persistence(format!("Failed to read snapshot file: {}", e)))?;

        let snapshot: StoreSnapshot = serde_json::from_slice(&buffer)
            .map_err(|e| StoreError::Persistence(format!("Failed to deserialize snapshot: {}", e)))?;

        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewClient;
    use std::thread;

    #[test]
    fn test_snapshot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = PersistenceManager::new(dir.path().join("data")).unwrap();
        assert_eq!(persistence.load().unwrap(), None);

        let store = ClinicStore::new();
        store
            .create_client(NewClient {
                name: "Carla".to_string(),
                phone: "555".to_string(),
                email: Some("carla@example.com".to_string()),
                notes: None,
            })
            .unwrap();
        persistence.save(&store.snapshot()).unwrap();

        let restored = ClinicStore::from_snapshot(persistence.load().unwrap().unwrap());
        assert_eq!(restored.snapshot(), store.snapshot());
        assert!(!persistence.snapshot_path().with_extension("tmp").exists());

        let next = restored
            .create_client(NewClient {
                name: "Davi".to_string(),
                phone: "556".to_string(),
                email: None,
                notes: None,
            })
            .unwrap();
        assert_eq!(next.id, 2);
    }

    #[test]
    fn test_corrupt_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = PersistenceManager::new(dir.path()).unwrap();
        fs::write(persistence.snapshot_path(), b"{not json").unwrap();

        assert!(matches!(persistence.load(), Err(StoreError::Persistence(_))));
    }

    #[test]
    fn test_concurrent_saves_keep_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = PersistenceManager::new(dir.path()).unwrap();
        let store = Arc::new(ClinicStore::new());

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let store = Arc::clone(&store);
                let persistence = persistence.clone();
                thread::spawn(move || {
                    for round in 0..25 {
                        store
                            .create_client(NewClient {
                                name: format!("client {}-{}", worker, round),
                                phone: "000".to_string(),
                                email: None,
                                notes: None,
                            })
                            .unwrap();
                        persistence.save_store(&store).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let saved = persistence.load().unwrap().unwrap();
        assert_eq!(saved.clients.len(), 100);
        assert_eq!(saved, store.snapshot());
    }
}
