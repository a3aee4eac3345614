//! AES-256-GCM for stored env var values.
//!
//! Wire format: ciphertext as hex, and a companion `iv:tag` field with a
//! 12-byte IV and 16-byte authentication tag, each hex.

use std::fmt;

use aws_lc_rs::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use aws_lc_rs::rand::fill;

use crate::error::{SecretError, SecretResult};

/// Environment variable holding the hex-encoded 256-bit key.
pub const KEY_ENV: &str = "KEEL_ENCRYPTION_KEY";

const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

/// Symmetric cipher for env var values.
pub struct SecretCipher {
    key: LessSafeKey,
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Build from 64 hex characters.
    pub fn from_hex(hex_key: &str) -> SecretResult<Self> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| SecretError::InvalidKey(format!("not hex: {e}")))?;
        if bytes.len() != KEY_LEN {
            return Err(SecretError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let unbound = UnboundKey::new(&AES_256_GCM, &bytes)
            .map_err(|_| SecretError::InvalidKey("rejected by cipher".to_string()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
        })
    }

    /// Load the key from [`KEY_ENV`]. Absence is a startup error.
    pub fn from_env() -> SecretResult<Self> {
        match std::env::var(KEY_ENV) {
            Ok(value) if !value.trim().is_empty() => Self::from_hex(&value),
            _ => Err(SecretError::MissingKey(KEY_ENV)),
        }
    }

    /// Decrypt a hex ciphertext with its `iv:tag` companion field.
    pub fn decrypt(&self, ciphertext_hex: &str, iv_tag: &str) -> SecretResult<String> {
        let (iv_hex, tag_hex) = iv_tag
            .split_once(':')
            .ok_or_else(|| SecretError::MalformedIvTag("missing ':' separator".to_string()))?;
        if iv_hex.is_empty() {
            return Err(SecretError::MalformedIvTag("missing iv".to_string()));
        }
        if tag_hex.is_empty() {
            return Err(SecretError::MalformedIvTag("missing auth tag".to_string()));
        }

        let iv = hex::decode(iv_hex)
            .map_err(|e| SecretError::MalformedIvTag(format!("iv is not hex: {e}")))?;
        let tag = hex::decode(tag_hex)
            .map_err(|e| SecretError::MalformedIvTag(format!("auth tag is not hex: {e}")))?;
        if tag.len() != TAG_LEN {
            return Err(SecretError::MalformedIvTag(format!(
                "auth tag must be {TAG_LEN} bytes, got {}",
                tag.len()
            )));
        }
        let nonce = Nonce::try_assume_unique_for_key(&iv).map_err(|_| {
            SecretError::MalformedIvTag(format!("iv must be {NONCE_LEN} bytes, got {}", iv.len()))
        })?;

        let mut in_out = hex::decode(ciphertext_hex)
            .map_err(|e| SecretError::MalformedCiphertext(e.to_string()))?;
        in_out.extend_from_slice(&tag);

        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| SecretError::Authentication)?;
        Ok(String::from_utf8(plaintext.to_vec())?)
    }

    /// Encrypt under a fresh random IV. Returns `(ciphertext_hex, "iv:tag")`.
    pub fn encrypt(&self, plaintext: &str) -> SecretResult<(String, String)> {
        let mut iv = [0u8; NONCE_LEN];
        fill(&mut iv).map_err(|_| SecretError::Encryption)?;
        let nonce = Nonce::assume_unique_for_key(iv);

        let mut in_out = plaintext.as_bytes().to_vec();
        let tag = self
            .key
            .seal_in_place_separate_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| SecretError::Encryption)?;

        Ok((
            hex::encode(&in_out),
            format!("{}:{}", hex::encode(iv), hex::encode(tag.as_ref())),
        ))
    }
}
