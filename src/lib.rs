//! Biometric-gated credential vault.
//!
//! Stores one login credential encrypted at rest and releases the
//! plaintext only through a fresh biometric assertion. The credential key
//! lives in a [`SecureKeyStore`] under a policy that invalidates it when
//! the biometric enrollment set changes; the vault record itself is
//! wrapped with a separate ambient storage key.

mod codec;
mod gate;
mod key_manager;
mod keystore;
mod sensor;
mod store;
#[cfg(test)]
mod testing;

pub use codec::{
    decode_payload, encode_payload, CipherCodec, CodecError, DecryptSession, EncryptSession, IV_LEN,
};
pub use gate::{BiometricGate, BiometricOutcome, GateError};
pub use key_manager::{KeyManager, CREDENTIAL_KEY_ALIAS, STORAGE_KEY_ALIAS};
pub use keystore::file::FileKeyStore;
pub use keystore::memory::MemoryKeyStore;
pub use keystore::{
    BlockMode, KeyAlgorithm, KeyHandle, KeyPolicy, KeyStoreError, Padding, SecureKeyStore, KEY_LEN,
};
pub use sensor::{BiometricSensor, PromptSpec, SensorCapability, SensorEvent};
pub use store::{Credential, CredentialVaultStore, StoreError};
