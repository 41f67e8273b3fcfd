pub mod file;
pub mod memory;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use zeroize::Zeroizing;

/// Key size in bytes for AES-256.
pub const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key invalidated by biometric enrollment change")]
    Invalidated,
    #[error("key store unavailable: {0}")]
    Unavailable(#[from] io::Error),
    #[error("key store entry is corrupt")]
    Corrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Aes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    Cbc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Pkcs7,
}

/// Generation policy for a stored key.
///
/// Mirrors the parameter set a hardware key store expects: cipher
/// configuration plus the two flags that tie the key to the user's
/// biometric enrollment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    pub algorithm: KeyAlgorithm,
    pub block_mode: BlockMode,
    pub padding: Padding,
    pub require_user_authentication: bool,
    pub invalidate_on_new_enrollment: bool,
}

impl KeyPolicy {
    /// Policy for the credential key: every use requires a fresh biometric
    /// assertion, and enrolling a new biometric permanently invalidates it.
    pub fn biometric() -> Self {
        KeyPolicy {
            algorithm: KeyAlgorithm::Aes,
            block_mode: BlockMode::Cbc,
            padding: Padding::Pkcs7,
            require_user_authentication: true,
            invalidate_on_new_enrollment: true,
        }
    }

    /// Policy for the process-level storage key that wraps the vault record
    /// on disk. Not tied to biometrics.
    pub fn storage() -> Self {
        KeyPolicy {
            algorithm: KeyAlgorithm::Aes,
            block_mode: BlockMode::Cbc,
            padding: Padding::Pkcs7,
            require_user_authentication: false,
            invalidate_on_new_enrollment: false,
        }
    }
}

/// Opaque reference to a symmetric key held by a [`SecureKeyStore`].
///
/// The handle stays linked to the store's enrollment generation: once the
/// enrollment set changes, a handle created under
/// `invalidate_on_new_enrollment` refuses to release its material.
#[derive(Clone)]
pub struct KeyHandle {
    alias: String,
    material: Arc<Zeroizing<[u8; KEY_LEN]>>,
    policy: KeyPolicy,
    created_at_generation: u64,
    store_generation: Arc<AtomicU64>,
}

impl KeyHandle {
    pub(crate) fn new(
        alias: String,
        material: Arc<Zeroizing<[u8; KEY_LEN]>>,
        policy: KeyPolicy,
        created_at_generation: u64,
        store_generation: Arc<AtomicU64>,
    ) -> Self {
        KeyHandle {
            alias,
            material,
            policy,
            created_at_generation,
            store_generation,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn policy(&self) -> KeyPolicy {
        self.policy
    }

    /// Release the raw key material, or fail if the key has been
    /// invalidated by an enrollment change since it was created.
    pub(crate) fn material(&self) -> Result<&[u8; KEY_LEN], KeyStoreError> {
        if self.policy.invalidate_on_new_enrollment
            && self.store_generation.load(Ordering::Acquire) != self.created_at_generation
        {
            return Err(KeyStoreError::Invalidated);
        }
        Ok(&self.material)
    }
}

// Key material must never reach log or error output.
impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("alias", &self.alias)
            .field("policy", &self.policy)
            .field("created_at_generation", &self.created_at_generation)
            .finish()
    }
}

/// Narrow interface over the platform's secure key store.
///
/// Implementations keep at most one live key per alias and track a
/// monotonically increasing biometric enrollment generation; keys created
/// under `invalidate_on_new_enrollment` become unusable once the
/// generation advances past the value captured at creation.
pub trait SecureKeyStore: Send + Sync {
    /// Look up the key stored under `alias`. An invalidated key is still
    /// returned; invalidation surfaces when its material is used.
    fn get_entry(&self, alias: &str) -> Result<Option<KeyHandle>, KeyStoreError>;

    /// Remove the key stored under `alias`. No-op if absent.
    fn delete_entry(&self, alias: &str) -> Result<(), KeyStoreError>;

    /// Generate a fresh random key under `alias`, replacing any previous
    /// entry for the same alias.
    fn generate_key(&self, alias: &str, policy: KeyPolicy) -> Result<KeyHandle, KeyStoreError>;

    /// Current biometric enrollment generation.
    fn enrollment_generation(&self) -> u64;
}

impl<T: SecureKeyStore + ?Sized> SecureKeyStore for Arc<T> {
    fn get_entry(&self, alias: &str) -> Result<Option<KeyHandle>, KeyStoreError> {
        (**self).get_entry(alias)
    }

    fn delete_entry(&self, alias: &str) -> Result<(), KeyStoreError> {
        (**self).delete_entry(alias)
    }

    fn generate_key(&self, alias: &str, policy: KeyPolicy) -> Result<KeyHandle, KeyStoreError> {
        (**self).generate_key(alias, policy)
    }

    fn enrollment_generation(&self) -> u64 {
        (**self).enrollment_generation()
    }
}
