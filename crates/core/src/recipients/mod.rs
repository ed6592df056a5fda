// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: ageseal — age-encryption.org/v1 file encryption.

//! Recipient and identity implementations.
//!
//! A [`Recipient`] wraps the file key into one or more header stanzas; an
//! [`Identity`] unwraps it back out. The concrete kinds are a closed set:
//! X25519, scrypt passphrases, the post-quantum hybrid, and SSH keys.

use aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::Zeroize;

use crate::error::{EncryptError, UnwrapError};
use crate::format::Stanza;
use crate::{FileKey, FILE_KEY_SIZE};

pub mod mlkem;
pub mod scrypt;
pub mod ssh;
pub mod x25519;

/// A party a file can be encrypted to.
pub trait Recipient {
    /// Wrap the file key, producing the stanzas for this recipient.
    fn wrap(&self, file_key: &FileKey) -> Result<Vec<Stanza>, EncryptError>;

    /// Labels attached to this recipient's stanzas.
    ///
    /// All recipients of one file must produce equal label sets; the hybrid
    /// recipient uses this to keep post-quantum files free of classical
    /// recipients.
    fn labels(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A secret that can recover the file key from a header.
pub trait Identity {
    /// Attempt to unwrap a single stanza.
    fn unwrap_stanza(&self, stanza: &Stanza) -> Result<FileKey, UnwrapError>;

    /// Attempt to unwrap the file key from the full stanza list.
    ///
    /// Stanzas that do not match this identity are skipped; any other
    /// failure aborts immediately.
    fn unwrap_stanzas(&self, stanzas: &[Stanza]) -> Result<FileKey, UnwrapError> {
        for stanza in stanzas {
            match self.unwrap_stanza(stanza) {
                Err(UnwrapError::IncorrectIdentity) => continue,
                result => return result,
            }
        }
        Err(UnwrapError::IncorrectIdentity)
    }
}

/// Seal the file key under a freshly derived single-use wrap key.
///
/// The all-zero nonce is safe because every wrap key is used exactly once.
pub(crate) fn seal_file_key(
    wrap_key: &mut [u8; 32],
    file_key: &FileKey,
) -> Result<Vec<u8>, EncryptError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(wrap_key));
    let sealed = cipher
        .encrypt(Nonce::from_slice(&[0u8; 12]), file_key.expose_secret().as_slice())
        .map_err(|_| EncryptError::Wrap("file key sealing failed".into()));
    wrap_key.zeroize();
    sealed
}

/// Open a sealed file key under a derived single-use wrap key.
///
/// Returns `None` on authentication failure; the caller decides whether
/// that means an incorrect identity or tampering.
pub(crate) fn open_file_key(wrap_key: &mut [u8; 32], body: &[u8]) -> Option<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(wrap_key));
    let opened = cipher.decrypt(Nonce::from_slice(&[0u8; 12]), body).ok();
    wrap_key.zeroize();
    opened
}

/// Convert an unwrapped plaintext into a [`FileKey`], enforcing the 16-byte
/// invariant.
pub(crate) fn file_key_from_bytes(mut bytes: Vec<u8>) -> Result<FileKey, UnwrapError> {
    if bytes.len() != FILE_KEY_SIZE {
        let len = bytes.len();
        bytes.zeroize();
        return Err(UnwrapError::FileKeySize(len));
    }
    let mut key = [0u8; FILE_KEY_SIZE];
    key.copy_from_slice(&bytes);
    bytes.zeroize();
    Ok(FileKey::new(key))
}
