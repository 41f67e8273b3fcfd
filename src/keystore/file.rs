use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{KeyHandle, KeyPolicy, KeyStoreError, SecureKeyStore, KEY_LEN};

const SCHEME: &str = "AES/CBC/PKCS7";

#[derive(Debug, Serialize, Deserialize)]
struct KeyRecord {
    scheme: String,
    material: String,
    require_user_authentication: bool,
    invalidate_on_new_enrollment: bool,
    created_at_generation: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyStoreFile {
    enrollment_generation: u64,
    keys: HashMap<String, KeyRecord>,
}

/// File-backed key store for desktop and development use, standing in for
/// a hardware store. Key material is hex-encoded inside a JSON file; the
/// enrollment generation persists across restarts so invalidation
/// survives a process exit.
pub struct FileKeyStore {
    path: PathBuf,
    state: Mutex<KeyStoreFile>,
    generation: Arc<AtomicU64>,
}

impl FileKeyStore {
    pub fn open(path: PathBuf) -> Result<Self, KeyStoreError> {
        let dir = path.parent().ok_or(KeyStoreError::Corrupt)?;
        fs::create_dir_all(dir)?;

        let state = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|_| KeyStoreError::Corrupt)?
        } else {
            KeyStoreFile::default()
        };

        let generation = Arc::new(AtomicU64::new(state.enrollment_generation));
        Ok(FileKeyStore {
            path,
            state: Mutex::new(state),
            generation,
        })
    }

    pub fn open_default() -> Result<Self, KeyStoreError> {
        Self::open(default_keystore_path()?)
    }

    /// Record that the platform's biometric enrollment set changed. Every
    /// key created under `invalidate_on_new_enrollment` becomes unusable,
    /// including after a restart.
    pub fn record_enrollment_change(&self) -> Result<(), KeyStoreError> {
        let mut state = self.lock_state();
        state.enrollment_generation += 1;
        self.generation
            .store(state.enrollment_generation, Ordering::Release);
        self.persist(&state)
    }

    fn lock_state(&self) -> MutexGuard<'_, KeyStoreFile> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &KeyStoreFile) -> Result<(), KeyStoreError> {
        let json = serde_json::to_string_pretty(state).map_err(|_| KeyStoreError::Corrupt)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn handle_from_record(&self, alias: &str, record: &KeyRecord) -> Result<KeyHandle, KeyStoreError> {
        if record.scheme != SCHEME {
            return Err(KeyStoreError::Corrupt);
        }
        let bytes = hex::decode(&record.material).map_err(|_| KeyStoreError::Corrupt)?;
        let material: [u8; KEY_LEN] = bytes.try_into().map_err(|_| KeyStoreError::Corrupt)?;

        let policy = KeyPolicy {
            require_user_authentication: record.require_user_authentication,
            invalidate_on_new_enrollment: record.invalidate_on_new_enrollment,
            ..KeyPolicy::storage()
        };

        Ok(KeyHandle::new(
            alias.to_string(),
            Arc::new(Zeroizing::new(material)),
            policy,
            record.created_at_generation,
            Arc::clone(&self.generation),
        ))
    }
}

impl SecureKeyStore for FileKeyStore {
    fn get_entry(&self, alias: &str) -> Result<Option<KeyHandle>, KeyStoreError> {
        let state = self.lock_state();
        match state.keys.get(alias) {
            Some(record) => Ok(Some(self.handle_from_record(alias, record)?)),
            None => Ok(None),
        }
    }

    fn delete_entry(&self, alias: &str) -> Result<(), KeyStoreError> {
        let mut state = self.lock_state();
        if state.keys.remove(alias).is_none() {
            return Ok(());
        }
        self.persist(&state)
    }

    fn generate_key(&self, alias: &str, policy: KeyPolicy) -> Result<KeyHandle, KeyStoreError> {
        let mut material = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut *material);

        let mut state = self.lock_state();
        let created_at_generation = state.enrollment_generation;
        state.keys.insert(
            alias.to_string(),
            KeyRecord {
                scheme: SCHEME.to_string(),
                material: hex::encode(&*material),
                require_user_authentication: policy.require_user_authentication,
                invalidate_on_new_enrollment: policy.invalidate_on_new_enrollment,
                created_at_generation,
            },
        );
        self.persist(&state)?;

        Ok(KeyHandle::new(
            alias.to_string(),
            Arc::new(material),
            policy,
            created_at_generation,
            Arc::clone(&self.generation),
        ))
    }

    fn enrollment_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

fn default_keystore_path() -> Result<PathBuf, KeyStoreError> {
    let config_dir = if cfg!(any(target_os = "windows", target_os = "macos")) {
        dirs::config_dir().map(|p| p.join("BioVault"))
    } else {
        dirs::config_dir().map(|p| p.join("biovault"))
    }
    .ok_or_else(|| {
        KeyStoreError::Unavailable(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no config directory",
        ))
    })?;

    Ok(config_dir.join("keystore.json"))
}
