use std::sync::{Arc, Mutex, PoisonError};

use crate::keystore::{KeyHandle, KeyPolicy, KeyStoreError, SecureKeyStore};

/// Alias of the biometric-gated key that protects the login secret.
pub const CREDENTIAL_KEY_ALIAS: &str = "credential_key";

/// Alias of the ambient key that wraps the vault record on disk.
pub const STORAGE_KEY_ALIAS: &str = "storage_key";

/// Owns the lifecycle of aliased keys in a [`SecureKeyStore`]: lazy
/// creation, idempotent deletion, and regeneration after invalidation.
pub struct KeyManager<S> {
    store: Arc<S>,
    // Serializes get-or-create so a race cannot mint two keys for one alias.
    alias_lock: Mutex<()>,
}

impl<S: SecureKeyStore> KeyManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        KeyManager {
            store,
            alias_lock: Mutex::new(()),
        }
    }

    /// Return the key stored under `alias`, generating one under `policy`
    /// if absent. An invalidated key is returned as-is; invalidation
    /// surfaces when a cipher session is started with it, and the caller
    /// recovers with [`delete`](Self::delete) followed by another call here.
    pub fn get_or_create(&self, alias: &str, policy: KeyPolicy) -> Result<KeyHandle, KeyStoreError> {
        let _guard = self.alias_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(key) = self.store.get_entry(alias)? {
            return Ok(key);
        }
        log::debug!("generating key for alias {alias:?}");
        self.store.generate_key(alias, policy)
    }

    /// Remove the key stored under `alias`. No-op if absent.
    pub fn delete(&self, alias: &str) -> Result<(), KeyStoreError> {
        let _guard = self.alias_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.delete_entry(alias)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::memory::MemoryKeyStore;

    #[test]
    fn test_get_or_create_reuses_existing_key() {
        let manager = KeyManager::new(Arc::new(MemoryKeyStore::new()));

        let first = manager
            .get_or_create(CREDENTIAL_KEY_ALIAS, KeyPolicy::biometric())
            .unwrap();
        let second = manager
            .get_or_create(CREDENTIAL_KEY_ALIAS, KeyPolicy::biometric())
            .unwrap();

        assert_eq!(first.material().unwrap(), second.material().unwrap());
        assert_eq!(manager.store().generate_count(), 1);
    }

    #[test]
    fn test_delete_then_get_or_create_regenerates() {
        let manager = KeyManager::new(Arc::new(MemoryKeyStore::new()));

        let first = manager
            .get_or_create(CREDENTIAL_KEY_ALIAS, KeyPolicy::biometric())
            .unwrap();
        manager.delete(CREDENTIAL_KEY_ALIAS).unwrap();
        let second = manager
            .get_or_create(CREDENTIAL_KEY_ALIAS, KeyPolicy::biometric())
            .unwrap();

        assert_ne!(first.material().unwrap(), second.material().unwrap());
    }

    #[test]
    fn test_delete_missing_alias_is_noop() {
        let manager = KeyManager::new(Arc::new(MemoryKeyStore::new()));
        manager.delete("never_created").unwrap();
    }

    #[test]
    fn test_invalidated_key_is_still_returned() {
        let store = Arc::new(MemoryKeyStore::new());
        let manager = KeyManager::new(Arc::clone(&store));

        manager
            .get_or_create(CREDENTIAL_KEY_ALIAS, KeyPolicy::biometric())
            .unwrap();
        store.record_enrollment_change();

        let key = manager
            .get_or_create(CREDENTIAL_KEY_ALIAS, KeyPolicy::biometric())
            .unwrap();
        assert!(matches!(key.material(), Err(KeyStoreError::Invalidated)));
        // No silent regeneration: recovery is the caller's explicit path.
        assert_eq!(store.generate_count(), 1);
    }
}
