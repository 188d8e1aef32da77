//! Master password key derivation and field sealing.
//!
//! Keys are derived with Argon2id and fields are sealed with
//! XChaCha20-Poly1305. Sealed format:
//! `0x02 || nonce (24 bytes) || ciphertext || tag (16 bytes)`,
//! base64 encoded when persisted.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::config::settings::KdfSettings;
use crate::utils::error::{DownloaderError, Result};

const ALG_TAG_XCHACHA20: u8 = 0x02;
const NONCE_SIZE: usize = 24;
const TAG_SIZE: usize = 16;
pub const SALT_SIZE: usize = 16;
const KEY_SIZE: usize = 32;

/// 256-bit key derived from the master password.
#[derive(Clone)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive the field key from a password with Argon2id.
pub fn derive_key(password: &str, salt: &[u8], kdf: &KdfSettings) -> Result<SecretKey> {
    let params = argon2::Params::new(
        kdf.memory_kib,
        kdf.iterations,
        kdf.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| DownloaderError::CryptoError {
        message: format!("invalid key derivation parameters: {}", e),
    })?;

    let argon2 = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut key_bytes = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key_bytes[..])
        .map_err(|e| DownloaderError::CryptoError {
            message: format!("key derivation failed: {}", e),
        })?;

    Ok(SecretKey::from_bytes(*key_bytes))
}

pub fn seal(key: &SecretKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| DownloaderError::CryptoError {
            message: "encryption failed".to_string(),
        })?;

    let mut output = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
    output.push(ALG_TAG_XCHACHA20);
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn open(key: &SecretKey, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.len() < 1 + NONCE_SIZE + TAG_SIZE || sealed[0] != ALG_TAG_XCHACHA20 {
        return Err(DownloaderError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = sealed[1..].split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| DownloaderError::DecryptionFailed)
}

pub fn seal_to_base64(key: &SecretKey, plaintext: &[u8]) -> Result<String> {
    Ok(STANDARD.encode(seal(key, plaintext)?))
}

pub fn open_from_base64(key: &SecretKey, encoded: &str) -> Result<Zeroizing<Vec<u8>>> {
    let sealed = STANDARD
        .decode(encoded)
        .map_err(|_| DownloaderError::DecryptionFailed)?;
    open(key, &sealed)
}

pub fn encode_salt(salt: &[u8]) -> String {
    STANDARD.encode(salt)
}

pub fn decode_salt(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| DownloaderError::CryptoError {
            message: format!("stored salt is not valid base64: {}", e),
        })
}
