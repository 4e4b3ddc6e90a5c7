//! Passphrase-based payload encryption.
//!
//! The key is derived from the passphrase and a random salt with Argon2id and
//! the payload is sealed with ChaCha20-Poly1305. The server only ever sees
//! the ciphertext, the IV and the salt.

use super::ClientError;
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::{RngCore, rngs::OsRng};
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const SALT_LEN: usize = 16;

/// Symmetric key wiped from memory on drop.
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

pub trait PayloadCipher: Send + Sync + 'static {
    fn derive_key(&self, passphrase: &str, salt: &[u8]) -> Result<DerivedKey, ClientError>;

    fn encrypt(&self, key: &DerivedKey, iv: &[u8], plaintext: &[u8])
    -> Result<Vec<u8>, ClientError>;

    /// Fails with [`ClientError::DecryptionFailed`] for a wrong key and for
    /// tampered ciphertext alike.
    fn decrypt(
        &self,
        key: &DerivedKey,
        iv: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, ClientError>;
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub m_cost_kib: u32,
    pub t_cost: u32,
    pub lanes: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost_kib: 19 * 1024,
            t_cost: 2,
            lanes: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2ChaCha {
    params: KdfParams,
}

impl Argon2ChaCha {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    fn aead(key: &DerivedKey) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
    }

    fn nonce(iv: &[u8]) -> Result<&Nonce, ClientError> {
        if iv.len() != IV_LEN {
            return Err(ClientError::InvalidParameter {
                name: "iv",
                reason: format!("expected {} bytes, got {}", IV_LEN, iv.len()),
            });
        }
        Ok(Nonce::from_slice(iv))
    }
}

impl PayloadCipher for Argon2ChaCha {
    fn derive_key(&self, passphrase: &str, salt: &[u8]) -> Result<DerivedKey, ClientError> {
        let params = Params::new(
            self.params.m_cost_kib,
            self.params.t_cost,
            self.params.lanes,
            Some(KEY_LEN),
        )
        .map_err(|e| ClientError::KeyDerivation(e.to_string()))?;
        let kdf = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut out = Zeroizing::new([0u8; KEY_LEN]);
        kdf.hash_password_into(passphrase.as_bytes(), salt, &mut out[..])
            .map_err(|e| ClientError::KeyDerivation(e.to_string()))?;
        Ok(DerivedKey(out))
    }

    fn encrypt(
        &self,
        key: &DerivedKey,
        iv: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, ClientError> {
        Self::aead(key)
            .encrypt(Self::nonce(iv)?, plaintext)
            .map_err(|_| ClientError::EncryptionFailed)
    }

    fn decrypt(
        &self,
        key: &DerivedKey,
        iv: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, ClientError> {
        Self::aead(key)
            .decrypt(Self::nonce(iv)?, ciphertext)
            .map_err(|_| ClientError::DecryptionFailed)
    }
}

/// Ciphertext plus the parameters the server stores next to it.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub salt: Vec<u8>,
}

/// Encrypt `plaintext` under `passphrase` with a fresh IV and salt.
pub fn seal(
    cipher: &dyn PayloadCipher,
    passphrase: &str,
    plaintext: &[u8],
) -> Result<Sealed, ClientError> {
    let mut iv = vec![0u8; IV_LEN];
    let mut salt = vec![0u8; SALT_LEN];
    OsRng.fill_bytes(&mut iv);
    OsRng.fill_bytes(&mut salt);

    let key = cipher.derive_key(passphrase, &salt)?;
    let ciphertext = cipher.encrypt(&key, &iv, plaintext)?;
    Ok(Sealed {
        ciphertext,
        iv,
        salt,
    })
}

#[cfg(test)]
pub(crate) fn fast_cipher() -> Argon2ChaCha {
    Argon2ChaCha::new(KdfParams {
        m_cost_kib: 8,
        t_cost: 1,
        lanes: 1,
    })
}
