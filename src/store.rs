use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::codec::{self, CipherCodec};
use crate::key_manager::{KeyManager, CREDENTIAL_KEY_ALIAS, STORAGE_KEY_ALIAS};
use crate::keystore::{KeyHandle, KeyPolicy, KeyStoreError, SecureKeyStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential storage unavailable: {0}")]
    Unavailable(#[from] io::Error),
    #[error("stored vault record is corrupt")]
    Corrupt,
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
}

/// The stored credential, ciphertext form. `encrypted_password` is the
/// base64-encoded `IV || ciphertext` produced by an enable flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub email: String,
    pub encrypted_password: String,
}

/// On-disk record. Armed implies both fields present; disarming clears
/// both. The whole record is serialized to JSON, encrypted with the
/// storage key and base64-encoded before it touches the filesystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaultRecord {
    email: Option<String>,
    encrypted_password: Option<String>,
    #[serde(default)]
    armed: bool,
}

/// Persists the encrypted credential and the armed flag, and exposes the
/// flag as a live watch stream.
pub struct CredentialVaultStore<S> {
    vault_path: PathBuf,
    keys: Arc<KeyManager<S>>,
    storage_key: KeyHandle,
    armed_tx: watch::Sender<bool>,
    // Single logical writer path; readers go through the watch channel.
    write_lock: Mutex<()>,
}

impl<S: SecureKeyStore> CredentialVaultStore<S> {
    pub fn open(vault_path: PathBuf, keys: Arc<KeyManager<S>>) -> Result<Self, StoreError> {
        let dir = vault_path.parent().ok_or(StoreError::Corrupt)?;
        fs::create_dir_all(dir)?;

        let storage_key = keys.get_or_create(STORAGE_KEY_ALIAS, KeyPolicy::storage())?;

        let store = CredentialVaultStore {
            vault_path,
            keys,
            storage_key,
            armed_tx: watch::channel(false).0,
            write_lock: Mutex::new(()),
        };
        let armed = store.read_record()?.armed;
        store.armed_tx.send_replace(armed);
        Ok(store)
    }

    pub fn open_default(keys: Arc<KeyManager<S>>) -> Result<Self, StoreError> {
        Self::open(default_vault_path()?, keys)
    }

    /// Live view of the armed flag. Any number of subscribers may watch;
    /// a fresh vault reads `false`.
    pub fn is_armed(&self) -> watch::Receiver<bool> {
        self.armed_tx.subscribe()
    }

    /// Store the credential and set the armed flag, overwriting any
    /// previous record.
    pub fn arm(&self, email: &str, encrypted_password: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_record(&VaultRecord {
            email: Some(email.to_string()),
            encrypted_password: Some(encrypted_password.to_string()),
            armed: true,
        })?;
        log::debug!("vault armed");
        self.armed_tx.send_replace(true);
        Ok(())
    }

    /// Clear the record and drop the credential key. The record write
    /// commits first: the armed flag is the source of truth, and a
    /// leftover key without an armed record is harmless.
    pub fn disarm(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_record(&VaultRecord::default())?;
        log::debug!("vault disarmed");
        self.armed_tx.send_replace(false);
        self.keys.delete(CREDENTIAL_KEY_ALIAS)?;
        Ok(())
    }

    /// One-shot read of the stored credential, ciphertext form.
    pub fn get_credential(&self) -> Result<Option<Credential>, StoreError> {
        let record = self.read_record()?;
        Ok(match (record.email, record.encrypted_password) {
            (Some(email), Some(encrypted_password)) => Some(Credential {
                email,
                encrypted_password,
            }),
            _ => None,
        })
    }

    fn read_record(&self) -> Result<VaultRecord, StoreError> {
        if !self.vault_path.exists() {
            return Ok(VaultRecord::default());
        }

        let content = fs::read_to_string(&self.vault_path)?;
        let payload = codec::decode_payload(content.trim()).map_err(|_| StoreError::Corrupt)?;

        let session =
            CipherCodec::begin_decrypt(&self.storage_key, &payload).map_err(|_| StoreError::Corrupt)?;
        let json = CipherCodec::finish_decrypt(session).map_err(|_| StoreError::Corrupt)?;

        serde_json::from_slice(&json).map_err(|_| StoreError::Corrupt)
    }

    fn write_record(&self, record: &VaultRecord) -> Result<(), StoreError> {
        let json = serde_json::to_vec(record).map_err(|_| StoreError::Corrupt)?;

        let session =
            CipherCodec::begin_encrypt(&self.storage_key).map_err(|_| StoreError::Corrupt)?;
        let encoded = codec::encode_payload(&CipherCodec::finish_encrypt(session, &json));

        let tmp_path = self.vault_path.with_extension("enc.tmp");
        fs::write(&tmp_path, encoded)?;
        fs::rename(&tmp_path, &self.vault_path)?;
        Ok(())
    }
}

fn default_vault_path() -> Result<PathBuf, StoreError> {
    let config_dir = if cfg!(any(target_os = "windows", target_os = "macos")) {
        dirs::config_dir().map(|p| p.join("BioVault"))
    } else {
        dirs::config_dir().map(|p| p.join("biovault"))
    }
    .ok_or_else(|| {
        StoreError::Unavailable(io::Error::new(io::ErrorKind::NotFound, "no config directory"))
    })?;

    Ok(config_dir.join("credentials.enc"))
}
