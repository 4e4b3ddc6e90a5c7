//! Receiving side of the transfer: fetch ciphertext, derive the key from the
//! passphrase in the link fragment, decrypt and unpack.
//!
//! Nothing here talks to the server except [`Orchestrator::fetch`]; the
//! passphrase never leaves this module.

pub mod cipher;
pub mod container;
pub mod orchestrator;

pub use cipher::{Argon2ChaCha, DerivedKey, KdfParams, PayloadCipher, Sealed, seal};
pub use container::PlaintextContainer;
pub use orchestrator::{
    FetchedPayload, Orchestrator, Recovered, RecoveredFile, passphrase_from_url,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("file `{0}` not found or has expired")]
    NotFound(String),
    #[error("server answered with status {0}")]
    UnexpectedStatus(u16),
    #[error("response is missing `{0}`")]
    MissingParameter(&'static str),
    #[error("parameter `{name}` is invalid: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("encryption failed")]
    EncryptionFailed,
    /// Wrong passphrase or corrupted ciphertext; the two are indistinguishable.
    #[error("decryption failed: wrong passphrase or corrupted file")]
    DecryptionFailed,
    #[error("decrypted payload is malformed: {0}")]
    MalformedContainer(String),
    #[error("bundle archive is unreadable: {0}")]
    Archive(String),
    #[error("background task failed: {0}")]
    Task(String),
}
