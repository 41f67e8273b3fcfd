use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::keystore::{KeyHandle, KEY_LEN};

/// IV length, fixed to the AES block size. The IV is prepended to the
/// ciphertext: every payload is `IV || ciphertext`.
pub const IV_LEN: usize = 16;

const BLOCK_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("key invalidated by biometric enrollment change")]
    KeyInvalidated,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("encrypted payload is malformed")]
    MalformedPayload,
}

/// Pending encrypt operation: the key material snapshot and a fresh
/// random IV, waiting for the authentication gate before running.
pub struct EncryptSession {
    key: Zeroizing<[u8; KEY_LEN]>,
    iv: [u8; IV_LEN],
}

/// Pending decrypt operation with the IV and ciphertext already split
/// out of the payload.
pub struct DecryptSession {
    key: Zeroizing<[u8; KEY_LEN]>,
    iv: [u8; IV_LEN],
    ciphertext: Vec<u8>,
}

/// AES-256-CBC/PKCS#7 encrypt-decrypt split into begin/finish halves.
///
/// `begin_*` validates the key and fixes the IV before any prompt is
/// shown; `finish_*` runs the block cipher and is only called after a
/// successful biometric assertion.
pub struct CipherCodec;

impl CipherCodec {
    pub fn begin_encrypt(key: &KeyHandle) -> Result<EncryptSession, CodecError> {
        let material = key.material().map_err(|_| CodecError::KeyInvalidated)?;
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        Ok(EncryptSession {
            key: Zeroizing::new(*material),
            iv,
        })
    }

    pub fn finish_encrypt(session: EncryptSession, plaintext: &[u8]) -> Vec<u8> {
        let ciphertext = Aes256CbcEnc::new((&*session.key).into(), &session.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut payload = Vec::with_capacity(IV_LEN + ciphertext.len());
        payload.extend_from_slice(&session.iv);
        payload.extend_from_slice(&ciphertext);
        payload
    }

    pub fn begin_decrypt(key: &KeyHandle, payload: &[u8]) -> Result<DecryptSession, CodecError> {
        let material = key.material().map_err(|_| CodecError::KeyInvalidated)?;

        if payload.len() < IV_LEN + BLOCK_LEN || (payload.len() - IV_LEN) % BLOCK_LEN != 0 {
            return Err(CodecError::MalformedPayload);
        }

        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&payload[..IV_LEN]);
        Ok(DecryptSession {
            key: Zeroizing::new(*material),
            iv,
            ciphertext: payload[IV_LEN..].to_vec(),
        })
    }

    pub fn finish_decrypt(session: DecryptSession) -> Result<Vec<u8>, CodecError> {
        Aes256CbcDec::new((&*session.key).into(), &session.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&session.ciphertext)
            .map_err(|_| CodecError::DecryptionFailed)
    }
}

/// Encode a raw payload for the storage or API boundary.
pub fn encode_payload(payload: &[u8]) -> String {
    general_purpose::STANDARD.encode(payload)
}

/// Decode a payload received from the storage or API boundary.
pub fn decode_payload(text: &str) -> Result<Vec<u8>, CodecError> {
    general_purpose::STANDARD
        .decode(text)
        .map_err(|_| CodecError::MalformedPayload)
}
