//! keel-secrets — from encrypted store rows to cluster secrets.
//!
//! Env var values are stored as AES-256-GCM ciphertext with a separate
//! `iv:tag` field (both hex). [`SecretCipher`] holds the 256-bit key loaded
//! once at startup; [`SecretManager`] decrypts a set of entries and writes
//! them as a single cluster secret, replacing any previous content.

pub mod cipher;
pub mod error;
pub mod manager;

pub use cipher::{KEY_ENV, SecretCipher};
pub use error::{SecretError, SecretResult};
pub use manager::{SecretEntry, SecretManager};
