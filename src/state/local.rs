//! Local file-based state storage backend.
//!
//! All entries live in one JSON document. Every mutation is a
//! read-modify-write of that document, serialized through an internal mutex
//! and committed with a temp file plus rename.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ResourceAddress;
use crate::error::{HcloudError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo};
use super::store::StateStore;
use super::types::{ResourceState, STATE_VERSION, StateDocument};

/// Default state directory name.
pub const STATE_DIR: &str = ".hcloud";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_guard: Mutex<()>,
}

impl LocalStateStore {
    /// Creates a new local state store in `./.hcloud`.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| HcloudError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local state store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(STATE_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            lock_path,
            write_guard: Mutex::new(()),
        }
    }

    /// Path of the JSON state document.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                HcloudError::State(StateError::storage(format!(
                    "Failed to create state directory: {e}"
                )))
            })?;
        }
        Ok(())
    }

    /// Reads the state document, or an empty one if none exists yet.
    async fn load_document(&self) -> Result<StateDocument> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(StateDocument::new());
        }

        let content = fs::read_to_string(&self.state_path).await.map_err(|e| {
            HcloudError::State(StateError::Corrupted {
                message: format!("Failed to read state file: {e}"),
            })
        })?;

        let document: StateDocument = serde_json::from_str(&content).map_err(|e| {
            HcloudError::State(StateError::Corrupted {
                message: format!("Failed to parse state file: {e}"),
            })
        })?;

        if document.version != STATE_VERSION {
            return Err(HcloudError::State(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: document.version,
            }));
        }

        Ok(document)
    }

    /// Writes the state document atomically.
    async fn save_document(&self, document: &StateDocument) -> Result<()> {
        self.ensure_dir().await?;

        debug!("Saving state to: {}", self.state_path.display());

        let content = serde_json::to_string_pretty(document).map_err(|e| {
            HcloudError::State(StateError::serialization(format!(
                "Failed to serialize state: {e}"
            )))
        })?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self.state_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            HcloudError::State(StateError::storage(format!(
                "Failed to create temp state file: {e}"
            )))
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            HcloudError::State(StateError::storage(format!("Failed to write state file: {e}")))
        })?;

        file.sync_all().await.map_err(|e| {
            HcloudError::State(StateError::storage(format!("Failed to sync state file: {e}")))
        })?;

        fs::rename(&temp_path, &self.state_path).await.map_err(|e| {
            HcloudError::State(StateError::storage(format!("Failed to rename state file: {e}")))
        })?;

        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| {
            HcloudError::State(StateError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            })
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            HcloudError::State(StateError::Corrupted {
                message: format!("Failed to parse lock file: {e}"),
            })
        })?;

        Ok(Some(lock_info))
    }

    /// Writes the lock file.
    async fn write_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock_info).map_err(|e| {
            HcloudError::State(StateError::serialization(format!(
                "Failed to serialize lock: {e}"
            )))
        })?;

        let mut file = fs::File::create(&self.lock_path).await.map_err(|e| {
            HcloudError::State(StateError::LockFailed {
                message: format!("Failed to create lock file: {e}"),
            })
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            HcloudError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;

        file.sync_all().await.map_err(|e| {
            HcloudError::State(StateError::LockFailed {
                message: format!("Failed to sync lock file: {e}"),
            })
        })?;

        Ok(())
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path).await.map_err(|e| {
                HcloudError::State(StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn get(&self, address: &ResourceAddress) -> Result<Option<ResourceState>> {
        let document = self.load_document().await?;
        Ok(document.resources.get(address).cloned())
    }

    async fn put(&self, address: &ResourceAddress, state: ResourceState) -> Result<()> {
        let _guard = self.write_guard.lock().await;

        let mut document = self.load_document().await?;
        debug!("Recording state for {address} (id {})", state.id);
        document.set(address.clone(), state);
        self.save_document(&document).await
    }

    async fn delete(&self, address: &ResourceAddress) -> Result<Option<ResourceState>> {
        let _guard = self.write_guard.lock().await;

        let mut document = self.load_document().await?;
        let removed = document.remove(address);
        if removed.is_some() {
            debug!("Removing state for {address}");
            self.save_document(&document).await?;
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<(ResourceAddress, ResourceState)>> {
        let document = self.load_document().await?;
        Ok(document.resources.into_iter().collect())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let _guard = self.write_guard.lock().await;

        let existing = self.read_lock_file().await?;
        LockInfo::ensure_available(existing.as_ref())?;
        if existing.is_some() {
            debug!("Expired lock found, taking over");
        }

        let lock_info = LockInfo::new(holder);
        self.write_lock_file(&lock_info).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let _guard = self.write_guard.lock().await;

        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    async fn is_locked(&self) -> Result<bool> {
        if let Some(lock_info) = self.read_lock_file().await? {
            return Ok(!lock_info.is_expired());
        }
        Ok(false)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
