//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: ageseal — age-encryption.org/v1 file encryption.
//

//! # ageseal Core
//!
//! Core library implementing the age-encryption.org/v1 file encryption
//! format: a small container that wraps a per-file key to one or more
//! recipients, authenticates its textual header, and encrypts the payload
//! as a chunked authenticated stream.
//!
//! ## Key Features
//!
//! - **Recipient Cryptography**: X25519, scrypt passphrases, SSH keys
//!   (ssh-ed25519 and ssh-rsa), and the hybrid ML-KEM-768 + X25519
//!   post-quantum recipient
//! - **Authenticated Streaming**: chunked ChaCha20-Poly1305 payload with
//!   strict framing and a seekable reader variant
//! - **Tamper-Evident Headers**: HKDF-derived HMAC-SHA-256 binds every
//!   recipient stanza to the file key
//! - **ASCII Armor**: strict PEM encapsulation for textual transport
//! - **Memory Safety**: key material is zeroized on drop
//!
//! ## Quick Start
//!
//! ```rust
//! use std::io::{Read, Write};
//! use ageseal_core::x25519::X25519Identity;
//! use ageseal_core::{decrypt, encrypt};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let identity = X25519Identity::generate();
//! let recipient = identity.to_recipient();
//!
//! // Encrypt
//! let mut writer = encrypt(&[&recipient], Vec::new())?;
//! writer.write_all(b"Secret message")?;
//! writer.finish()?;
//! let file = writer.into_inner();
//!
//! // Decrypt
//! let mut reader = decrypt(&[&identity], file.as_slice())?;
//! let mut plaintext = Vec::new();
//! reader.read_to_end(&mut plaintext)?;
//! assert_eq!(plaintext, b"Secret message");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Encrypt/decrypt drivers and the detached-header API
//! - [`format`] - Header codec, stanza grammar, and header MAC
//! - [`stream`] - Chunked payload encryption and the seekable reader
//! - [`recipients`] - Recipient and identity implementations
//! - [`armor`] - Strict PEM armor reader and writer
//! - [`keys`] - Identity and recipient file parsing
//! - [`error`] - The error taxonomy presented at the boundary

use std::fmt;

use rand_core::{OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub mod armor;
mod encoding;
pub mod error;
pub mod format;
mod hpke;
pub mod keys;
pub mod protocol;
pub mod recipients;
pub mod stream;

pub use error::{
    ArmorError, DecryptError, EncryptError, HeaderError, KeyError, PayloadError, UnwrapError,
};
pub use format::{Header, Stanza, VERSION_LINE};
pub use keys::{parse_identity, parse_recipient, read_identity_file, read_recipient_file};
pub use protocol::{
    decrypt, decrypt_detached, decrypt_seekable, encrypt, encrypt_detached, unlock_header,
};
pub use recipients::{mlkem, scrypt, ssh, x25519, Identity, Recipient};
pub use stream::{SeekableReader, StreamReader, StreamWriter, CHUNK_SIZE};

/// Length of the per-file key.
pub const FILE_KEY_SIZE: usize = 16;

/// The per-file symmetric secret: the root of both the stream key and the
/// header MAC key.
///
/// Freshly generated for every encryption, zeroized on drop, and redacted
/// in `Debug` output. Access the raw bytes through
/// [`FileKey::expose_secret`].
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct FileKey([u8; FILE_KEY_SIZE]);

impl FileKey {
    /// Wrap raw file key bytes.
    pub fn new(bytes: [u8; FILE_KEY_SIZE]) -> Self {
        FileKey(bytes)
    }

    /// Generate a fresh random file key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; FILE_KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        FileKey(bytes)
    }

    /// Access the raw key bytes.
    ///
    /// The caller is responsible for not leaking the returned reference.
    pub fn expose_secret(&self) -> &[u8; FILE_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FileKey([REDACTED])")
    }
}
