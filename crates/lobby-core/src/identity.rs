//! Identity lookup.
//!
//! The hub never stores users itself; it asks an [`IdentityLookup`] for the
//! record behind a claimed ID. [`MemoryIdentityStore`] is the bundled
//! implementation, seeded from code or a JSON file.

use async_trait::async_trait;
use dashmap::DashMap;
use lobby_protocol::{Identity, UserId};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Identity lookup errors.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The backing store could not be reached.
    #[error("Identity store unavailable: {0}")]
    Unavailable(String),

    /// I/O error while loading records.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Records could not be parsed.
    #[error("Invalid identity records: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Source of identity records.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// Fetch the identity for `id`.
    ///
    /// Returns `Ok(None)` if no such user exists.
    async fn get_by_id(&self, id: &UserId) -> Result<Option<Identity>, LookupError>;
}

/// In-memory identity store.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    records: DashMap<UserId, Identity>,
}

impl MemoryIdentityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given identities.
    #[must_use]
    pub fn with_identities(identities: impl IntoIterator<Item = Identity>) -> Self {
        let store = Self::new();
        for identity in identities {
            store.insert(identity);
        }
        store
    }

    /// Parse a JSON array of identity records.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is not an array of identities.
    pub fn from_json(json: &str) -> Result<Self, LookupError> {
        let identities: Vec<Identity> = serde_json::from_str(json)?;
        Ok(Self::with_identities(identities))
    }

    /// Load a JSON array of identity records from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LookupError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let store = Self::from_json(&contents)?;
        info!(path = %path.display(), identities = store.len(), "Loaded identities");
        Ok(store)
    }

    /// Add or replace an identity, returning the previous record.
    pub fn insert(&self, identity: Identity) -> Option<Identity> {
        self.records.insert(identity.id.clone(), identity)
    }

    /// Get the number of identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl IdentityLookup for MemoryIdentityStore {
    async fn get_by_id(&self, id: &UserId) -> Result<Option<Identity>, LookupError> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_found_and_missing() {
        let store = MemoryIdentityStore::with_identities([Identity::new("1", "alice")]);

        let found = store.get_by_id(&UserId::from("1")).await.unwrap();
        assert_eq!(found.unwrap().username, "alice");

        let missing = store.get_by_id(&UserId::from("2")).await.unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_from_json() {
        let store = MemoryIdentityStore::from_json(
            r#"[
                {"id": 1, "username": "alice", "email": "alice@example.com"},
                {"id": "2", "username": "bob"}
            ]"#,
        )
        .unwrap();

        assert_eq!(store.len(), 2);
        let alice = store.records.get(&UserId::from("1")).unwrap();
        assert_eq!(alice.attribute("email").unwrap(), "alice@example.com");
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(matches!(
            MemoryIdentityStore::from_json(r#"{"id": 1}"#),
            Err(LookupError::Parse(_))
        ));
        assert!(matches!(
            MemoryIdentityStore::from_json(r#"[{"username": "no id"}]"#),
            Err(LookupError::Parse(_))
        ));
    }

    #[test]
    fn test_from_missing_file() {
        assert!(matches!(
            MemoryIdentityStore::from_file("/nonexistent/identities.json"),
            Err(LookupError::Io(_))
        ));
    }

    #[test]
    fn test_insert_replaces() {
        let store = MemoryIdentityStore::new();
        assert!(store.is_empty());
        assert!(store.insert(Identity::new("1", "alice")).is_none());
        assert!(store.insert(Identity::new(1u64, "alicia")).is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(store.records.get(&UserId::from("1")).unwrap().username, "alicia");
    }
}
