use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::codec::{self, CipherCodec, CodecError, EncryptSession};
use crate::key_manager::{KeyManager, CREDENTIAL_KEY_ALIAS};
use crate::keystore::{KeyHandle, KeyPolicy, SecureKeyStore};
use crate::sensor::{BiometricSensor, PromptSpec, SensorCapability, SensorEvent};

/// Outcome of a biometric request. Closed set; consumers match
/// exhaustively. `AuthFailed` is the only non-terminal outcome: the
/// prompt stays open and the user may retry.
#[derive(Clone, PartialEq, Eq)]
pub enum BiometricOutcome {
    /// Enable: the base64 `IV || ciphertext` payload to persist.
    /// Unlock: the decrypted plaintext secret.
    Success(String),
    AuthFailed,
    AuthError(String),
    HardwareUnavailable,
    FeatureUnavailable,
    NotEnrolled,
    /// The stored ciphertext is unrecoverable; the caller must disarm the
    /// vault and re-enroll the credential.
    InvalidatedByEnrollmentChange,
}

// Success may carry a decrypted secret; keep it out of Debug output.
impl fmt::Debug for BiometricOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BiometricOutcome::Success(_) => f.write_str("Success(..)"),
            BiometricOutcome::AuthFailed => f.write_str("AuthFailed"),
            BiometricOutcome::AuthError(message) => {
                f.debug_tuple("AuthError").field(message).finish()
            }
            BiometricOutcome::HardwareUnavailable => f.write_str("HardwareUnavailable"),
            BiometricOutcome::FeatureUnavailable => f.write_str("FeatureUnavailable"),
            BiometricOutcome::NotEnrolled => f.write_str("NotEnrolled"),
            BiometricOutcome::InvalidatedByEnrollmentChange => {
                f.write_str("InvalidatedByEnrollmentChange")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("another biometric request is already in flight")]
    Busy,
}

/// Orchestrates biometric-gated encrypt and decrypt: capability check,
/// key acquisition, cipher session, prompt, outcome.
///
/// One request may be in flight per gate instance; outcomes are
/// delivered in order over a single-consumer channel obtained once from
/// [`outcomes`](Self::outcomes).
pub struct BiometricGate<S, B> {
    sensor: B,
    keys: Arc<KeyManager<S>>,
    outcome_tx: UnboundedSender<BiometricOutcome>,
    outcome_rx: Mutex<Option<UnboundedReceiver<BiometricOutcome>>>,
    in_flight: AtomicBool,
}

impl<S: SecureKeyStore, B: BiometricSensor> BiometricGate<S, B> {
    pub fn new(sensor: B, keys: Arc<KeyManager<S>>) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        BiometricGate {
            sensor,
            keys,
            outcome_tx,
            outcome_rx: Mutex::new(Some(outcome_rx)),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Take the outcome stream. Yields `None` after the first call: the
    /// stream has exactly one consumer.
    pub fn outcomes(&self) -> Option<UnboundedReceiver<BiometricOutcome>> {
        self.outcome_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn check_capability(&self) -> SensorCapability {
        self.sensor.capability()
    }

    /// Encrypt `plaintext` behind a biometric assertion and emit the
    /// resulting payload as `Success`. A key invalidated by an enrollment
    /// change is deleted and regenerated exactly once; a second failure
    /// surfaces as `AuthError`.
    pub async fn request_enable(&self, prompt: &PromptSpec, plaintext: &str) -> Result<(), GateError> {
        let _guard = self.begin_request()?;

        if !self.ensure_capability() {
            return Ok(());
        }

        let session = match self.begin_encrypt_with_recovery() {
            Some(session) => session,
            None => return Ok(()),
        };

        let mut session = Some(session);
        let mut events = self.show_prompt(prompt);
        loop {
            match events.recv().await {
                Some(SensorEvent::FailedAttempt) => self.emit(BiometricOutcome::AuthFailed),
                Some(SensorEvent::Succeeded) => {
                    if let Some(session) = session.take() {
                        let payload = CipherCodec::finish_encrypt(session, plaintext.as_bytes());
                        self.emit(BiometricOutcome::Success(codec::encode_payload(&payload)));
                    }
                    return Ok(());
                }
                Some(SensorEvent::Error(message)) => {
                    self.emit(BiometricOutcome::AuthError(message));
                    return Ok(());
                }
                Some(SensorEvent::Canceled) => {
                    self.emit(BiometricOutcome::AuthError("authentication canceled".to_string()));
                    return Ok(());
                }
                None => {
                    self.emit_abandoned();
                    return Ok(());
                }
            }
        }
    }

    /// Decrypt a stored payload behind a biometric assertion and emit the
    /// plaintext as `Success`. If the key was invalidated by an
    /// enrollment change the payload is unrecoverable: the key is deleted
    /// and `InvalidatedByEnrollmentChange` emitted with no retry.
    pub async fn request_unlock(
        &self,
        prompt: &PromptSpec,
        payload_base64: &str,
    ) -> Result<(), GateError> {
        let _guard = self.begin_request()?;

        if !self.ensure_capability() {
            return Ok(());
        }

        let key = match self.credential_key() {
            Some(key) => key,
            None => return Ok(()),
        };

        let payload = match codec::decode_payload(payload_base64) {
            Ok(payload) => payload,
            Err(_) => {
                self.emit_unreadable();
                return Ok(());
            }
        };

        let session = match CipherCodec::begin_decrypt(&key, &payload) {
            Ok(session) => session,
            Err(CodecError::KeyInvalidated) => {
                log::warn!("credential key invalidated by enrollment change, deleting");
                if self.keys.delete(CREDENTIAL_KEY_ALIAS).is_err() {
                    log::warn!("failed to delete invalidated credential key");
                }
                self.emit(BiometricOutcome::InvalidatedByEnrollmentChange);
                return Ok(());
            }
            Err(_) => {
                self.emit_unreadable();
                return Ok(());
            }
        };

        let mut session = Some(session);
        let mut events = self.show_prompt(prompt);
        loop {
            match events.recv().await {
                Some(SensorEvent::FailedAttempt) => self.emit(BiometricOutcome::AuthFailed),
                Some(SensorEvent::Succeeded) => {
                    if let Some(session) = session.take() {
                        match CipherCodec::finish_decrypt(session)
                            .map_err(|_| ())
                            .and_then(|bytes| String::from_utf8(bytes).map_err(|_| ()))
                        {
                            Ok(plaintext) => self.emit(BiometricOutcome::Success(plaintext)),
                            // No cipher detail crosses the outcome boundary.
                            Err(()) => self.emit_unreadable(),
                        }
                    }
                    return Ok(());
                }
                Some(SensorEvent::Error(message)) => {
                    self.emit(BiometricOutcome::AuthError(message));
                    return Ok(());
                }
                Some(SensorEvent::Canceled) => {
                    self.emit(BiometricOutcome::AuthError("authentication canceled".to_string()));
                    return Ok(());
                }
                None => {
                    self.emit_abandoned();
                    return Ok(());
                }
            }
        }
    }

    fn begin_request(&self) -> Result<InFlightGuard<'_>, GateError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(GateError::Busy);
        }
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
        })
    }

    /// Map a non-ready capability answer onto its outcome. `NotEnrolled`
    /// is recoverable by the user enrolling and retrying; the other two
    /// end the session.
    fn ensure_capability(&self) -> bool {
        match self.sensor.capability() {
            SensorCapability::Ready => true,
            SensorCapability::HardwareUnavailable => {
                self.emit(BiometricOutcome::HardwareUnavailable);
                false
            }
            SensorCapability::NoHardware => {
                self.emit(BiometricOutcome::FeatureUnavailable);
                false
            }
            SensorCapability::NotEnrolled => {
                self.emit(BiometricOutcome::NotEnrolled);
                false
            }
        }
    }

    fn credential_key(&self) -> Option<KeyHandle> {
        match self.keys.get_or_create(CREDENTIAL_KEY_ALIAS, KeyPolicy::biometric()) {
            Ok(key) => Some(key),
            Err(_) => {
                self.emit(BiometricOutcome::AuthError("key store unavailable".to_string()));
                None
            }
        }
    }

    /// Start an encrypt session, recovering from an invalidated key by
    /// deleting and regenerating it exactly once. Enable still holds the
    /// fresh plaintext, so recovery is safe here; unlock has no such path.
    fn begin_encrypt_with_recovery(&self) -> Option<EncryptSession> {
        let key = self.credential_key()?;
        match CipherCodec::begin_encrypt(&key) {
            Ok(session) => Some(session),
            Err(CodecError::KeyInvalidated) => {
                log::warn!("credential key invalidated by enrollment change, regenerating");
                if self.keys.delete(CREDENTIAL_KEY_ALIAS).is_err() {
                    self.emit(BiometricOutcome::AuthError("key store unavailable".to_string()));
                    return None;
                }
                let key = self.credential_key()?;
                match CipherCodec::begin_encrypt(&key) {
                    Ok(session) => Some(session),
                    Err(_) => {
                        self.emit(BiometricOutcome::AuthError(
                            "could not prepare the credential key".to_string(),
                        ));
                        None
                    }
                }
            }
            Err(_) => {
                self.emit(BiometricOutcome::AuthError(
                    "could not prepare the credential key".to_string(),
                ));
                None
            }
        }
    }

    fn show_prompt(&self, prompt: &PromptSpec) -> UnboundedReceiver<SensorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sensor.authenticate(prompt, tx);
        rx
    }

    fn emit(&self, outcome: BiometricOutcome) {
        let _ = self.outcome_tx.send(outcome);
    }

    // The prompt went away without a terminal event; release the caller
    // instead of leaving the request unresolved.
    fn emit_abandoned(&self) {
        self.emit(BiometricOutcome::AuthError(
            "authentication ended without a result".to_string(),
        ));
    }

    fn emit_unreadable(&self) {
        self.emit(BiometricOutcome::AuthError(
            "could not read the stored credential".to_string(),
        ));
    }
}

struct InFlightGuard<'a> {
    in_flight: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}
