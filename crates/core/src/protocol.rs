// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: ageseal — age-encryption.org/v1 file encryption.

//! High-level encryption and decryption drivers.
//!
//! Encryption wraps a fresh file key to every recipient, assembles and MACs
//! the header, writes the payload nonce, and hands back a [`StreamWriter`].
//! Decryption parses the header, tries each identity in order until one
//! unwraps the file key, verifies the MAC, and hands back a
//! [`StreamReader`]. The detached variants split the header from the
//! payload so a header can be inspected or stored separately.

use std::collections::BTreeSet;
use std::io;
use std::io::{BufReader, Read, Seek, Write};

use rand_core::{OsRng, RngCore};
use zeroize::Zeroize;

use crate::error::{DecryptError, EncryptError, HeaderError, PayloadError, UnwrapError};
use crate::format::{Header, Stanza};
use crate::recipients::{Identity, Recipient};
use crate::stream::{derive_stream_key, SeekableReader, StreamReader, StreamWriter, PAYLOAD_NONCE_SIZE};
use crate::FileKey;

const SCRYPT_STANZA_TAG: &str = "scrypt";

/// Wrap a fresh file key to every recipient, enforcing the mixing rules.
fn wrap_file_key(
    recipients: &[&dyn Recipient],
) -> Result<(FileKey, Vec<Stanza>), EncryptError> {
    if recipients.is_empty() {
        return Err(EncryptError::NoRecipients);
    }

    let file_key = FileKey::generate();
    let mut stanzas = Vec::new();
    let mut labels: Option<BTreeSet<String>> = None;

    for recipient in recipients {
        let wrapped = recipient.wrap(&file_key)?;
        let recipient_labels: BTreeSet<String> = recipient.labels().into_iter().collect();
        match &labels {
            None => labels = Some(recipient_labels),
            Some(first) if *first == recipient_labels => {}
            Some(_) => {
                return Err(EncryptError::IncompatibleRecipients(
                    "all recipients must have the same labels".into(),
                ))
            }
        }
        stanzas.extend(wrapped);
    }

    if stanzas.iter().any(|s| s.tag == SCRYPT_STANZA_TAG)
        && (recipients.len() > 1 || stanzas.len() > 1)
    {
        return Err(EncryptError::IncompatibleRecipients(
            "a passphrase recipient must be the only recipient".into(),
        ));
    }

    Ok((file_key, stanzas))
}

/// Recover the file key from a parsed header and verify the header MAC.
///
/// Identities are tried in order; the first one to produce a file key is
/// authoritative.
pub fn unlock_header(
    identities: &[&dyn Identity],
    header: &Header,
) -> Result<FileKey, DecryptError> {
    if identities.is_empty() {
        return Err(DecryptError::NoIdentities);
    }
    if header.stanzas.iter().any(|s| s.tag == SCRYPT_STANZA_TAG) && header.stanzas.len() > 1 {
        return Err(DecryptError::Header(HeaderError::InvalidStanza(
            "a passphrase stanza must be the only stanza".into(),
        )));
    }

    let mut failures = Vec::new();
    for identity in identities {
        match identity.unwrap_stanzas(&header.stanzas) {
            Ok(file_key) => {
                if !header.verify_mac(&file_key) {
                    return Err(DecryptError::HeaderMac);
                }
                return Ok(file_key);
            }
            Err(UnwrapError::IncorrectIdentity) => {
                failures.push(UnwrapError::IncorrectIdentity);
            }
            Err(UnwrapError::InvalidStanza(reason)) => {
                return Err(DecryptError::Header(HeaderError::InvalidStanza(reason)));
            }
            Err(UnwrapError::FileKeySize(size)) => {
                return Err(DecryptError::FileKeySize(size));
            }
        }
    }
    Err(DecryptError::NoIdentityMatch(failures))
}

/// Encrypt to `recipients`, writing the header and payload to `output`.
///
/// Returns a [`StreamWriter`]; the caller writes the plaintext into it and
/// must call [`StreamWriter::finish`] to terminate the file.
pub fn encrypt<W: Write>(
    recipients: &[&dyn Recipient],
    mut output: W,
) -> Result<StreamWriter<W>, EncryptError> {
    let (file_key, stanzas) = wrap_file_key(recipients)?;
    let header = Header::seal(stanzas, &file_key);
    output.write_all(&header.marshal())?;
    start_payload(&file_key, output).map_err(EncryptError::Io)
}

/// Encrypt with a detached header: the header goes to `header_output`, the
/// nonce and payload to `payload_output`.
pub fn encrypt_detached<H: Write, W: Write>(
    recipients: &[&dyn Recipient],
    header_output: &mut H,
    payload_output: W,
) -> Result<StreamWriter<W>, EncryptError> {
    let (file_key, stanzas) = wrap_file_key(recipients)?;
    let header = Header::seal(stanzas, &file_key);
    header_output.write_all(&header.marshal())?;
    start_payload(&file_key, payload_output).map_err(EncryptError::Io)
}

/// Write the payload nonce and construct the chunk writer.
fn start_payload<W: Write>(file_key: &FileKey, mut output: W) -> io::Result<StreamWriter<W>> {
    let mut nonce = [0u8; PAYLOAD_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    output.write_all(&nonce)?;
    let mut stream_key = derive_stream_key(file_key, &nonce);
    let writer = StreamWriter::new(&stream_key, output);
    stream_key.zeroize();
    Ok(writer)
}

/// Decrypt `input` with the given identities.
///
/// Returns a [`StreamReader`] over the plaintext. Payload failures surface
/// through the reader as `io::Error` values wrapping a
/// [`PayloadError`](crate::error::PayloadError).
pub fn decrypt<R: Read>(
    identities: &[&dyn Identity],
    input: R,
) -> Result<StreamReader<BufReader<R>>, DecryptError> {
    let mut input = BufReader::new(input);
    let header = Header::read(&mut input)?;
    let file_key = unlock_header(identities, &header)?;
    let stream_key = read_nonce_and_derive(&file_key, &mut input)?;
    Ok(StreamReader::new(&stream_key, input))
}

/// Decrypt a detached header plus its payload stream. `payload_input` must
/// start at the payload nonce.
pub fn decrypt_detached<R: Read>(
    identities: &[&dyn Identity],
    header: &[u8],
    mut payload_input: R,
) -> Result<StreamReader<R>, DecryptError> {
    let header = Header::parse(header)?;
    let file_key = unlock_header(identities, &header)?;
    let stream_key = read_nonce_and_derive(&file_key, &mut payload_input)?;
    Ok(StreamReader::new(&stream_key, payload_input))
}

/// Decrypt a seekable source, returning a random-access plaintext reader.
pub fn decrypt_seekable<R: Read + Seek>(
    identities: &[&dyn Identity],
    input: R,
) -> Result<SeekableReader<BufReader<R>>, DecryptError> {
    let mut input = BufReader::new(input);
    let header = Header::read(&mut input)?;
    let file_key = unlock_header(identities, &header)?;
    let stream_key = read_nonce_and_derive(&file_key, &mut input)?;
    let payload_start = input
        .stream_position()
        .map_err(DecryptError::classify_io)?;
    SeekableReader::new(&stream_key, input, payload_start).map_err(DecryptError::Payload)
}

/// Read the 16-byte payload nonce and derive the stream key.
fn read_nonce_and_derive<R: Read>(
    file_key: &FileKey,
    input: &mut R,
) -> Result<[u8; 32], DecryptError> {
    let mut nonce = [0u8; PAYLOAD_NONCE_SIZE];
    input.read_exact(&mut nonce).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            DecryptError::Payload(PayloadError::Truncated)
        } else {
            DecryptError::classify_io(e)
        }
    })?;
    Ok(derive_stream_key(file_key, &nonce))
}
