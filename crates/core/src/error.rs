//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: ageseal — age-encryption.org/v1 file encryption.
//

//! Unified error hierarchy for the ageseal workspace.
//!
//! The boundary types are [`EncryptError`] and [`DecryptError`]; the
//! remaining enums are the per-concern classes they aggregate. Armor and
//! payload failures also travel through `std::io::Error` while a stream is
//! being read, wrapped so that they stay distinguishable (see
//! [`DecryptError::classify_io`]).

use std::io;

use thiserror::Error;

/// Errors returned while producing an encrypted file.
#[derive(Error, Debug)]
pub enum EncryptError {
    #[error("no recipients specified")]
    NoRecipients,

    #[error("incompatible recipients: {0}")]
    IncompatibleRecipients(String),

    #[error("failed to wrap the file key: {0}")]
    Wrap(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors returned while opening an encrypted file.
#[derive(Error, Debug)]
pub enum DecryptError {
    #[error("no identities specified")]
    NoIdentities,

    #[error("invalid header: {0}")]
    Header(HeaderError),

    #[error("header MAC verification failed")]
    HeaderMac,

    #[error("invalid payload: {0}")]
    Payload(PayloadError),

    #[error("invalid armor: {0}")]
    Armor(ArmorError),

    /// No identity could unwrap any stanza. Carries one error per identity,
    /// in the order the identities were tried.
    #[error("no identity matched any of the file's recipients")]
    NoIdentityMatch(Vec<UnwrapError>),

    #[error("unwrapped file key is {0} bytes, expected 16")]
    FileKeySize(usize),

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl DecryptError {
    /// Recover the original failure class from an `io::Error` produced by a
    /// wrapped reader (armor decoding or payload decryption).
    pub fn classify_io(err: io::Error) -> Self {
        if let Some(inner) = err.get_ref() {
            if let Some(armor) = inner.downcast_ref::<ArmorError>() {
                return DecryptError::Armor(armor.clone());
            }
            if let Some(payload) = inner.downcast_ref::<PayloadError>() {
                return DecryptError::Payload(payload.clone());
            }
        }
        DecryptError::Io(err)
    }
}

impl From<HeaderError> for DecryptError {
    fn from(err: HeaderError) -> Self {
        match err {
            HeaderError::Io(inner) => DecryptError::classify_io(inner),
            other => DecryptError::Header(other),
        }
    }
}

/// Errors related to the textual file header.
#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("invalid intro line")]
    InvalidIntro,

    #[error("invalid stanza: {0}")]
    InvalidStanza(String),

    #[error("invalid header MAC encoding")]
    InvalidMac,

    #[error("header contains no stanzas")]
    NoStanzas,

    #[error("unexpected line in header")]
    UnexpectedLine,

    #[error("header is truncated")]
    Truncated,

    #[error("trailing data after header")]
    TrailingData,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors related to the encrypted payload stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("encrypted payload is truncated")]
    Truncated,

    #[error("chunk {0} failed authentication")]
    ChunkAuthentication(u128),

    #[error("trailing data after the final chunk")]
    TrailingData,

    #[error("final chunk is empty")]
    EmptyFinalChunk,

    #[error("invalid encrypted payload length: {0}")]
    InvalidLength(u64),

    #[error("write after the stream was finished")]
    WriteAfterFinish,
}

impl From<PayloadError> for io::Error {
    fn from(err: PayloadError) -> Self {
        let kind = match err {
            PayloadError::Truncated => io::ErrorKind::UnexpectedEof,
            PayloadError::WriteAfterFinish => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}

/// Errors related to the ASCII armor encapsulation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArmorError {
    #[error("no armor begin marker found")]
    MissingBegin,

    #[error("armor ended before the end marker")]
    MissingEnd,

    #[error("more than {0} bytes of whitespace before the begin marker")]
    LeadingWhitespace(usize),

    #[error("more than {0} bytes of whitespace after the end marker")]
    TrailingWhitespace(usize),

    #[error("data after the end marker")]
    TrailingGarbage,

    #[error("invalid armor line length: {0}")]
    InvalidLineLength(usize),

    #[error("invalid armor base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

impl From<ArmorError> for io::Error {
    fn from(err: ArmorError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

/// Error from a single identity's attempt to unwrap the file key.
///
/// `IncorrectIdentity` is recovered by the decrypt driver, which moves on to
/// the next identity; every other variant aborts the decryption.
#[derive(Error, Debug)]
pub enum UnwrapError {
    #[error("the file's recipient stanzas do not match this identity")]
    IncorrectIdentity,

    #[error("invalid stanza: {0}")]
    InvalidStanza(String),

    #[error("unwrapped file key is {0} bytes, expected 16")]
    FileKeySize(usize),
}

/// Errors related to key string and key file parsing.
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("invalid Bech32 encoding: {0}")]
    Bech32(String),

    #[error("unexpected key prefix: {0:?}")]
    UnexpectedHrp(String),

    #[error("invalid key length: {0}")]
    InvalidLength(usize),

    #[error("invalid SSH key: {0}")]
    Ssh(String),

    #[error("line {line}: {reason}")]
    InvalidEntry { line: usize, reason: String },

    #[error("key file exceeds the {0}-byte size limit")]
    FileTooLarge(usize),

    #[error("key file is not valid UTF-8")]
    NotUtf8,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
