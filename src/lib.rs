//! End-to-end encrypted file transfer.
//!
//! The server side stores opaque ciphertext it cannot read: chunked uploads
//! are reassembled into permanent objects, served back with their
//! non-secret decryption parameters, and expire on schedule. The
//! [`client`] module holds the decrypting side of the wire contract.

pub mod client;
pub mod clock;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod storage;
pub mod wire;
