//! Locally persisted credentials.
//!
//! The whole list lives under one storage key and is rewritten on every
//! mutation.

use tracing::warn;

use crate::errors::{PanelError, StorageError};
use crate::model::{Credential, CredentialPair};
use crate::storage::KvStorage;

/// Storage key holding the serialized credential list.
pub const CREDENTIALS_KEY: &str = "credentials";

/// Trims keys and drops credentials whose trimmed key is empty.
pub fn sanitize_credentials(credentials: &[Credential]) -> Vec<CredentialPair> {
    credentials
        .iter()
        .filter_map(|c| {
            let key = c.key.trim();
            (!key.is_empty()).then(|| CredentialPair::new(key, c.value.clone()))
        })
        .collect()
}

/// Partial update applied by `CredentialStore::update`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialPatch {
    pub key: Option<String>,
    pub value: Option<String>,
}

impl CredentialPatch {
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.value.is_none()
    }
}

/// Credential list loaded once from storage and written back on every change.
#[derive(Debug)]
pub struct CredentialStore<S> {
    storage: S,
    credentials: Vec<Credential>,
}

impl<S: KvStorage> CredentialStore<S> {
    /// Reads the stored list.
    ///
    /// A missing entry yields an empty store. An entry that does not parse
    /// is logged and replaced by an empty list on the next write.
    pub fn load(storage: S) -> Result<Self, StorageError> {
        let credentials = match storage.get(CREDENTIALS_KEY)? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "ignoring unreadable stored credentials");
                Vec::new()
            }),
            None => Vec::new(),
        };
        Ok(Self {
            storage,
            credentials,
        })
    }

    /// All credentials in insertion order, including ones with blank keys.
    pub fn list(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn get(&self, id: &str) -> Option<&Credential> {
        self.credentials.iter().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Appends a credential with a fresh id and persists the list.
    pub fn add(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Credential, StorageError> {
        let credential = Credential::new(key, value);
        let mut next = self.credentials.clone();
        next.push(credential.clone());
        self.commit(next)?;
        Ok(credential)
    }

    /// Applies `patch` to the credential with `id` and persists the list.
    pub fn update(&mut self, id: &str, patch: CredentialPatch) -> Result<Credential, PanelError> {
        let mut next = self.credentials.clone();
        let credential = next
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| PanelError::CredentialNotFound(id.to_string()))?;
        if let Some(key) = patch.key {
            credential.key = key;
        }
        if let Some(value) = patch.value {
            credential.value = value;
        }
        let updated = credential.clone();
        self.commit(next)?;
        Ok(updated)
    }

    /// Deletes the credential with `id` and persists the list.
    pub fn remove(&mut self, id: &str) -> Result<Credential, PanelError> {
        let position = self
            .credentials
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| PanelError::CredentialNotFound(id.to_string()))?;
        let mut next = self.credentials.clone();
        let removed = next.remove(position);
        self.commit(next)?;
        Ok(removed)
    }

    /// Wire-ready credentials for a run request.
    pub fn sanitized(&self) -> Vec<CredentialPair> {
        sanitize_credentials(&self.credentials)
    }

    /// One-line summary of the keys that would be sent.
    pub fn preview(&self) -> String {
        let sanitized = self.sanitized();
        if sanitized.is_empty() {
            return "No credentials saved.".to_string();
        }
        let keys: Vec<&str> = sanitized.iter().map(|c| c.key.as_str()).collect();
        format!("Saved keys: {}", keys.join(", "))
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn commit(&mut self, next: Vec<Credential>) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&next)?;
        self.storage.set(CREDENTIALS_KEY, &raw)?;
        self.credentials = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileKvStorage, MemoryKvStorage};

    #[test]
    fn sanitize_trims_keys_and_drops_blank_ones() {
        let credentials = vec![
            Credential {
                id: "1".into(),
                key: " A ".into(),
                value: "x".into(),
            },
            Credential {
                id: "2".into(),
                key: "  ".into(),
                value: "y".into(),
            },
        ];
        assert_eq!(
            sanitize_credentials(&credentials),
            vec![CredentialPair::new("A", "x")]
        );
    }

    #[test]
    fn sanitize_keeps_value_whitespace() {
        let credentials = vec![Credential::new("K", "  padded  ")];
        assert_eq!(sanitize_credentials(&credentials)[0].value, "  padded  ");
    }

    #[test]
    fn mutations_are_written_through() {
        let mut store = CredentialStore::load(MemoryKvStorage::new()).expect("load");
        let email = store.add("EMAIL", "a@b.c").expect("add");
        let password = store.add("PASSWORD", "hunter2").expect("add");

        store
            .update(&email.id, CredentialPatch::default().key("GOOGLE_EMAIL"))
            .expect("update");
        store.remove(&password.id).expect("remove");

        let reloaded = CredentialStore::load(store.storage().clone()).expect("reload");
        assert_eq!(reloaded.list().len(), 1);
        assert_eq!(reloaded.list()[0].id, email.id);
        assert_eq!(reloaded.list()[0].key, "GOOGLE_EMAIL");
        assert_eq!(reloaded.list()[0].value, "a@b.c");
    }

    #[test]
    fn unknown_ids_are_reported() {
        let mut store = CredentialStore::load(MemoryKvStorage::new()).expect("load");
        let err = store
            .update("missing", CredentialPatch::default().value("v"))
            .expect_err("missing id");
        assert!(matches!(err, PanelError::CredentialNotFound(id) if id == "missing"));
        assert!(matches!(
            store.remove("missing"),
            Err(PanelError::CredentialNotFound(_))
        ));
    }

    #[test]
    fn unreadable_entry_loads_as_empty() {
        let storage = MemoryKvStorage::with_entry(CREDENTIALS_KEY, "not json");
        let store = CredentialStore::load(storage).expect("load");
        assert!(store.is_empty());
    }

    #[test]
    fn preview_lists_sanitized_keys() {
        let mut store = CredentialStore::load(MemoryKvStorage::new()).expect("load");
        assert_eq!(store.preview(), "No credentials saved.");

        store.add(" A ", "1").expect("add");
        store.add("", "ignored").expect("add");
        store.add("B", "2").expect("add");
        assert_eq!(store.preview(), "Saved keys: A, B");
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("storage.json");

        let mut store = CredentialStore::load(FileKvStorage::new(&path)).expect("load");
        let added = store.add("TOKEN", "abc").expect("add");

        let reopened = CredentialStore::load(FileKvStorage::new(&path)).expect("reopen");
        assert_eq!(reopened.get(&added.id), Some(&added));
    }

    #[test]
    fn corrupt_storage_file_still_accepts_new_credentials() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "garbage").expect("write");

        let mut store = CredentialStore::load(FileKvStorage::new(&path)).expect("load");
        assert!(store.is_empty());
        store.add("TOKEN", "abc").expect("add");

        let reopened = CredentialStore::load(FileKvStorage::new(&path)).expect("reopen");
        assert_eq!(reopened.sanitized(), vec![CredentialPair::new("TOKEN", "abc")]);
    }
}
