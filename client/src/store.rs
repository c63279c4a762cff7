//! # Session Store
//!
//! Persists the transcript so a restarted session can pick it up again.
//! Storage is best-effort: [`SessionStore`] logs and swallows every
//! backend failure, and a stored transcript that cannot be parsed counts
//! as no history at all.
//!
//! Transcripts live under a versioned key (`chat-session.v1.<scope>`), so a
//! future change of the stored format simply starts from an empty history.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::state::ChatMessage;

const KEY_PREFIX: &str = "chat-session";
const STORE_VERSION: u32 = 1;

/// Key/value storage for serialized transcripts.
pub trait TranscriptBackend: Send {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn save(&self, key: &str, data: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ─── Backends ───────────────────────────────────────────────────

/// Process-lifetime storage. Clones share the same entries, which lets a
/// new session in the same process restore an earlier one.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl TranscriptBackend for MemoryBackend {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, data: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .insert(key.to_string(), data.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .remove(key);
        Ok(())
    }
}

/// One JSON file per key inside `dir`.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl TranscriptBackend for FileBackend {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, data: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        // Write-then-rename so a crash never leaves a half-written file.
        let tmp = self.dir.join(format!("{}.json.tmp", key));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, self.path(key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ─── Store ──────────────────────────────────────────────────────

pub struct SessionStore {
    backend: Box<dyn TranscriptBackend>,
    key: String,
}

impl SessionStore {
    pub fn new(backend: Box<dyn TranscriptBackend>, scope: &str) -> Self {
        Self {
            backend,
            key: storage_key(scope),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The persisted transcript, or an empty one if there is none or it
    /// cannot be read.
    pub fn load(&self) -> Vec<ChatMessage> {
        let data = match self.backend.load(&self.key) {
            Ok(Some(data)) => data,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Transcript store unavailable, starting empty: {}", e);
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<ChatMessage>>(&data) {
            Ok(messages) => {
                debug!("Restored {} message(s) from {}", messages.len(), self.key);
                messages
            }
            Err(e) => {
                warn!("Discarding corrupt transcript {}: {}", self.key, StoreError::from(e));
                Vec::new()
            }
        }
    }

    pub fn save(&self, messages: &[ChatMessage]) {
        let result = serde_json::to_string(messages)
            .map_err(StoreError::from)
            .and_then(|data| self.backend.save(&self.key, &data));
        if let Err(e) = result {
            warn!("Failed to persist transcript: {}", e);
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.backend.remove(&self.key) {
            warn!("Failed to remove persisted transcript: {}", e);
        }
    }
}

pub fn storage_key(scope: &str) -> String {
    format!("{}.v{}.{}", KEY_PREFIX, STORE_VERSION, scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Role;

    struct BrokenBackend;

    impl TranscriptBackend for BrokenBackend {
        fn load(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("disabled".into()))
        }
        fn save(&self, _key: &str, _data: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("quota exceeded".into()))
        }
        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disabled".into()))
        }
    }

    fn transcript() -> Vec<ChatMessage> {
        vec![
            ChatMessage::new(Role::User, "hi"),
            ChatMessage::new(Role::Assistant, "hello"),
        ]
    }

    #[test]
    fn memory_backend_restores_across_stores() {
        let backend = MemoryBackend::default();
        let messages = transcript();
        SessionStore::new(Box::new(backend.clone()), "tab-1").save(&messages);

        let reloaded = SessionStore::new(Box::new(backend.clone()), "tab-1");
        assert_eq!(reloaded.load(), messages);

        let other_tab = SessionStore::new(Box::new(backend), "tab-2");
        assert!(other_tab.load().is_empty());
    }

    #[test]
    fn file_backend_persists_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(Box::new(FileBackend::new(dir.path())), "default");
        let messages = transcript();
        store.save(&messages);
        assert!(dir.path().join("chat-session.v1.default.json").exists());

        let reopened = SessionStore::new(Box::new(FileBackend::new(dir.path())), "default");
        assert_eq!(reopened.load(), messages);

        reopened.clear();
        reopened.clear();
        assert!(reopened.load().is_empty());
    }

    #[test]
    fn corrupt_data_is_no_history() {
        let backend = MemoryBackend::default();
        backend
            .save(&storage_key("default"), "{not json")
            .unwrap();
        let store = SessionStore::new(Box::new(backend), "default");
        assert!(store.load().is_empty());
    }

    #[test]
    fn unavailable_storage_never_panics() {
        let store = SessionStore::new(Box::new(BrokenBackend), "default");
        assert!(store.load().is_empty());
        store.save(&transcript());
        store.clear();
    }

    #[test]
    fn key_is_versioned_and_scoped() {
        assert_eq!(storage_key("abc"), "chat-session.v1.abc");
    }
}
