//! # Chat Text Cipher
//!
//! Field-level encryption for chat message text at rest.
//!
//! ```text
//!   plaintext ──► AES-256-CBC(key, random iv, PKCS#7) ──► "<hex iv>:<hex ciphertext>"
//!
//!   stored ──► split on ':' ──► hex decode ──► AES-256-CBC decrypt ──► plaintext
//!                  │                 │                  │
//!                  └─────────────────┴──────────────────┴──► on any failure: stored value as-is
//! ```
//!
//! Decryption never fails outward. A row written under another key, or
//! truncated, comes back as its stored string so one bad row cannot take a
//! conversation listing down.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use thiserror::Error;
use zeroize::ZeroizeOnDrop;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Size of the symmetric key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the CBC initialization vector in bytes.
pub const IV_SIZE: usize = 16;

/// Separator between the hex IV and the hex ciphertext.
const SEPARATOR: char = ':';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("Chat encryption key is not configured")]
    MissingKey,

    #[error("Chat encryption key must be 32 bytes (or 64 hex characters), got {0} bytes")]
    InvalidKeyLength(usize),

    #[error("Stored value is not in <iv>:<ciphertext> form")]
    MalformedRecord,

    #[error("Stored value is not valid hex: {0}")]
    InvalidHex(String),

    #[error("Initialization vector must be 16 bytes, got {0}")]
    InvalidIv(usize),

    #[error("Decryption failed")]
    DecryptionFailed,
}

/// AES-256-CBC codec for the chat `text` field.
///
/// The key is fixed for the lifetime of the process and zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct TextCipher {
    key: [u8; KEY_SIZE],
}

impl TextCipher {
    /// Create from raw key bytes.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Build the cipher from a configuration value.
    ///
    /// Accepts either 64 hex characters or a raw 32-byte string. Anything
    /// else is rejected; the caller treats that as fatal.
    pub fn from_config_value(value: &str) -> Result<Self, CipherError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(CipherError::MissingKey);
        }

        let mut key = [0u8; KEY_SIZE];

        if value.len() == KEY_SIZE * 2 {
            if let Ok(bytes) = hex::decode(value) {
                key.copy_from_slice(&bytes);
                return Ok(Self::new(key));
            }
        }

        let raw = value.as_bytes();
        if raw.len() != KEY_SIZE {
            return Err(CipherError::InvalidKeyLength(raw.len()));
        }
        key.copy_from_slice(raw);
        Ok(Self::new(key))
    }

    /// Encrypt `plaintext` under a fresh random IV.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let mut iv = [0u8; IV_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        format!("{}{}{}", hex::encode(iv), SEPARATOR, hex::encode(ciphertext))
    }

    /// Decrypt a stored value, reporting why it could not be read.
    pub fn try_decrypt(&self, stored: &str) -> Result<String, CipherError> {
        let (iv_hex, ct_hex) = stored
            .split_once(SEPARATOR)
            .ok_or(CipherError::MalformedRecord)?;

        let iv = hex::decode(iv_hex).map_err(|e| CipherError::InvalidHex(e.to_string()))?;
        let ciphertext =
            hex::decode(ct_hex).map_err(|e| CipherError::InvalidHex(e.to_string()))?;

        let iv: [u8; IV_SIZE] = iv
            .as_slice()
            .try_into()
            .map_err(|_| CipherError::InvalidIv(iv.len()))?;

        if ciphertext.is_empty() {
            return Err(CipherError::MalformedRecord);
        }

        let plaintext = Aes256CbcDec::new(&self.key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CipherError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::DecryptionFailed)
    }

    /// Decrypt a stored value, falling back to the stored value itself.
    pub fn decrypt(&self, stored: &str) -> String {
        match self.try_decrypt(stored) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::warn!(error = %e, "Returning undecryptable chat text as stored");
                stored.to_string()
            }
        }
    }
}

impl std::fmt::Debug for TextCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextCipher").finish_non_exhaustive()
    }
}
