use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use super::{KeyHandle, KeyPolicy, KeyStoreError, SecureKeyStore, KEY_LEN};

struct StoredKey {
    material: Arc<Zeroizing<[u8; KEY_LEN]>>,
    policy: KeyPolicy,
    created_at_generation: u64,
}

/// In-memory key store, used for tests and for simulating enrollment
/// changes without a hardware store.
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<String, StoredKey>>,
    generation: Arc<AtomicU64>,
    generate_count: AtomicUsize,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        MemoryKeyStore {
            keys: Mutex::new(HashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
            generate_count: AtomicUsize::new(0),
        }
    }

    /// Simulate the user enrolling a new biometric: every key created
    /// under `invalidate_on_new_enrollment` becomes unusable.
    pub fn record_enrollment_change(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of keys generated over the store's lifetime.
    pub fn generate_count(&self) -> usize {
        self.generate_count.load(Ordering::Acquire)
    }
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        MemoryKeyStore::new()
    }
}

impl SecureKeyStore for MemoryKeyStore {
    fn get_entry(&self, alias: &str) -> Result<Option<KeyHandle>, KeyStoreError> {
        let keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(keys.get(alias).map(|stored| {
            KeyHandle::new(
                alias.to_string(),
                Arc::clone(&stored.material),
                stored.policy,
                stored.created_at_generation,
                Arc::clone(&self.generation),
            )
        }))
    }

    fn delete_entry(&self, alias: &str) -> Result<(), KeyStoreError> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.remove(alias);
        Ok(())
    }

    fn generate_key(&self, alias: &str, policy: KeyPolicy) -> Result<KeyHandle, KeyStoreError> {
        let mut material = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut *material);

        let material = Arc::new(material);
        let created_at_generation = self.generation.load(Ordering::Acquire);

        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.insert(
            alias.to_string(),
            StoredKey {
                material: Arc::clone(&material),
                policy,
                created_at_generation,
            },
        );
        self.generate_count.fetch_add(1, Ordering::AcqRel);

        Ok(KeyHandle::new(
            alias.to_string(),
            material,
            policy,
            created_at_generation,
            Arc::clone(&self.generation),
        ))
    }

    fn enrollment_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_get_entry() {
        let store = MemoryKeyStore::new();
        assert!(store.get_entry("k").unwrap().is_none());

        let key = store.generate_key("k", KeyPolicy::biometric()).unwrap();
        let fetched = store.get_entry("k").unwrap().unwrap();

        assert_eq!(key.material().unwrap(), fetched.material().unwrap());
        assert_eq!(fetched.alias(), "k");
    }

    #[test]
    fn test_generate_replaces_existing_key() {
        let store = MemoryKeyStore::new();
        let first = store.generate_key("k", KeyPolicy::biometric()).unwrap();
        let second = store.generate_key("k", KeyPolicy::biometric()).unwrap();

        assert_ne!(first.material().unwrap(), second.material().unwrap());
        let fetched = store.get_entry("k").unwrap().unwrap();
        assert_eq!(fetched.material().unwrap(), second.material().unwrap());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = MemoryKeyStore::new();
        store.generate_key("k", KeyPolicy::biometric()).unwrap();

        store.delete_entry("k").unwrap();
        assert!(store.get_entry("k").unwrap().is_none());
        store.delete_entry("k").unwrap();
    }

    #[test]
    fn test_enrollment_change_invalidates_biometric_keys() {
        let store = MemoryKeyStore::new();
        let biometric = store.generate_key("cred", KeyPolicy::biometric()).unwrap();
        let storage = store.generate_key("store", KeyPolicy::storage()).unwrap();

        assert!(biometric.material().is_ok());
        store.record_enrollment_change();

        assert!(matches!(
            biometric.material(),
            Err(KeyStoreError::Invalidated)
        ));
        // The ambient storage key is not tied to enrollment.
        assert!(storage.material().is_ok());
    }

    #[test]
    fn test_key_generated_after_enrollment_change_is_usable() {
        let store = MemoryKeyStore::new();
        store.generate_key("cred", KeyPolicy::biometric()).unwrap();
        store.record_enrollment_change();

        let fresh = store.generate_key("cred", KeyPolicy::biometric()).unwrap();
        assert!(fresh.material().is_ok());
    }
}
