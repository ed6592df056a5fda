// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: ageseal — age-encryption.org/v1 file encryption.

//! Identity and recipient file parsing.
//!
//! Both file kinds are UTF-8 text with one entry per line; empty lines and
//! lines starting with `#` are ignored. Identity files hold native
//! identities (`AGE-SECRET-KEY-1…`, `AGE-SECRET-KEY-PQ-1…`); recipient
//! files additionally accept OpenSSH public key lines.

use std::io::Read;

use crate::error::KeyError;
use crate::recipients::mlkem::{HybridIdentity, HybridRecipient};
use crate::recipients::ssh::SshRecipient;
use crate::recipients::x25519::{X25519Identity, X25519Recipient};
use crate::recipients::{Identity, Recipient};

/// Size limit for identity and recipient files.
pub const MAX_KEY_FILE_SIZE: usize = 16 * 1024 * 1024;

/// Parse a single identity string.
pub fn parse_identity(s: &str) -> Result<Box<dyn Identity>, KeyError> {
    // The PQ prefix extends the classical one, so the longer match wins by
    // construction: Bech32 decoding yields the full prefix.
    if let Ok(identity) = s.parse::<HybridIdentity>() {
        return Ok(Box::new(identity));
    }
    let identity = s.parse::<X25519Identity>()?;
    Ok(Box::new(identity))
}

/// Parse a single recipient string.
pub fn parse_recipient(s: &str) -> Result<Box<dyn Recipient>, KeyError> {
    if s.starts_with("ssh-rsa ") || s.starts_with("ssh-ed25519 ") {
        let recipient: SshRecipient = s.parse()?;
        return Ok(Box::new(recipient));
    }
    if let Ok(recipient) = s.parse::<HybridRecipient>() {
        return Ok(Box::new(recipient));
    }
    let recipient = s.parse::<X25519Recipient>()?;
    Ok(Box::new(recipient))
}

fn read_key_file<R: Read>(reader: R) -> Result<String, KeyError> {
    let mut contents = Vec::new();
    reader
        .take(MAX_KEY_FILE_SIZE as u64 + 1)
        .read_to_end(&mut contents)?;
    if contents.len() > MAX_KEY_FILE_SIZE {
        return Err(KeyError::FileTooLarge(MAX_KEY_FILE_SIZE));
    }
    String::from_utf8(contents).map_err(|_| KeyError::NotUtf8)
}

fn entries(contents: &str) -> impl Iterator<Item = (usize, &str)> {
    contents
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

/// Parse an identity file.
pub fn read_identity_file<R: Read>(reader: R) -> Result<Vec<Box<dyn Identity>>, KeyError> {
    let contents = read_key_file(reader)?;
    let mut identities = Vec::new();
    for (line, entry) in entries(&contents) {
        let identity = parse_identity(entry).map_err(|e| KeyError::InvalidEntry {
            line,
            reason: e.to_string(),
        })?;
        identities.push(identity);
    }
    Ok(identities)
}

/// Parse a recipient file.
pub fn read_recipient_file<R: Read>(reader: R) -> Result<Vec<Box<dyn Recipient>>, KeyError> {
    let contents = read_key_file(reader)?;
    let mut recipients = Vec::new();
    for (line, entry) in entries(&contents) {
        let recipient = parse_recipient(entry).map_err(|e| KeyError::InvalidEntry {
            line,
            reason: e.to_string(),
        })?;
        recipients.push(recipient);
    }
    Ok(recipients)
}
