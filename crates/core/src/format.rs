// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: ageseal — age-encryption.org/v1 file encryption.

//! Textual header codec: the stanza grammar, canonical marshalling, and the
//! HMAC that binds every recipient stanza to the file key.
//!
//! The header of an encrypted file looks like:
//!
//! ```text
//! age-encryption.org/v1
//! -> X25519 TEiF0ypqr+bpvcqXNyCVJpL7OuwPdVwPL7KQEbFDOCc
//! EmECAEcKN+n/Vs9SbWiV+Hu0r+E8R77DdWYyd83nw7U
//! --- Vn+54jqiiUCE+WZcEVY3f1sqHjlu/z1LCQ/T7Yb7iNw
//! ```
//!
//! Every line is LF-terminated. Stanza bodies are unpadded base64 wrapped at
//! 64 columns, with a final line strictly shorter than 64 columns acting as
//! the terminator. The MAC line authenticates every byte up to and including
//! the `---` marker.

use std::io::BufRead;

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::encoding::{base64_decode, base64_encode, push_wrapped_base64, COLUMNS_PER_LINE};
use crate::error::HeaderError;
use crate::FileKey;

type HmacSha256 = Hmac<Sha256>;

/// The first line of every encrypted file.
pub const VERSION_LINE: &str = "age-encryption.org/v1";

const STANZA_PREFIX: &[u8] = b"-> ";
const MAC_PREFIX: &[u8] = b"--- ";
const MAC_SIZE: usize = 32;
const MAC_INFO: &[u8] = b"header";

/// One recipient section of a header: a tag, space-separated arguments, and
/// a binary body holding the wrapped file key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stanza {
    /// Recipient type, e.g. `X25519` or `scrypt`.
    pub tag: String,
    /// Additional arguments, serialized verbatim.
    pub args: Vec<String>,
    /// The stanza body, typically a sealed file key.
    pub body: Vec<u8>,
}

impl Stanza {
    /// Create a stanza from its parts.
    pub fn new(tag: &str, args: Vec<String>, body: Vec<u8>) -> Self {
        Stanza {
            tag: tag.to_string(),
            args,
            body,
        }
    }
}

/// A parsed or assembled file header: the ordered stanza list plus the MAC
/// that binds it to the file key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Recipient stanzas, in the order they appear in the file.
    pub stanzas: Vec<Stanza>,
    /// HMAC-SHA-256 over the canonical header bytes.
    pub mac: [u8; MAC_SIZE],
}

impl Header {
    /// Assemble a header for the given stanzas, computing the MAC from the
    /// file key.
    pub fn seal(stanzas: Vec<Stanza>, file_key: &FileKey) -> Self {
        let mac = compute_mac(file_key, &mac_input(&stanzas));
        Header { stanzas, mac }
    }

    /// Verify the MAC against the canonical re-rendering of this header.
    ///
    /// The comparison is constant-time.
    pub fn verify_mac(&self, file_key: &FileKey) -> bool {
        let mut hmac = new_hmac(file_key);
        hmac.update(&mac_input(&self.stanzas));
        hmac.verify_slice(&self.mac).is_ok()
    }

    /// Serialize the header, including the MAC line and its trailing LF.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = mac_input(&self.stanzas);
        out.push(b' ');
        out.extend_from_slice(base64_encode(&self.mac).as_bytes());
        out.push(b'\n');
        out
    }

    /// Read a header from a buffered reader, leaving the reader positioned
    /// at the first payload byte.
    pub fn read<R: BufRead>(reader: &mut R) -> Result<Self, HeaderError> {
        if read_line(reader)? != VERSION_LINE.as_bytes() {
            return Err(HeaderError::InvalidIntro);
        }

        let mut stanzas = Vec::new();
        loop {
            let line = read_line(reader)?;
            if let Some(rest) = line.strip_prefix(STANZA_PREFIX) {
                let (tag, args) = parse_stanza_line(rest)?;
                let body = read_body(reader)?;
                stanzas.push(Stanza { tag, args, body });
            } else if let Some(rest) = line.strip_prefix(MAC_PREFIX) {
                if stanzas.is_empty() {
                    return Err(HeaderError::NoStanzas);
                }
                return Ok(Header {
                    stanzas,
                    mac: parse_mac(rest)?,
                });
            } else {
                return Err(HeaderError::UnexpectedLine);
            }
        }
    }

    /// Parse a complete, detached header. Trailing bytes are rejected.
    pub fn parse(data: &[u8]) -> Result<Self, HeaderError> {
        let mut reader = data;
        let header = Header::read(&mut reader)?;
        if !reader.is_empty() {
            return Err(HeaderError::TrailingData);
        }
        Ok(header)
    }
}

/// The canonical header bytes covered by the MAC: everything up to and
/// including the `---` marker, excluding the space and the MAC encoding.
fn mac_input(stanzas: &[Stanza]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(VERSION_LINE.as_bytes());
    out.push(b'\n');
    for stanza in stanzas {
        out.extend_from_slice(STANZA_PREFIX);
        out.extend_from_slice(stanza.tag.as_bytes());
        for arg in &stanza.args {
            out.push(b' ');
            out.extend_from_slice(arg.as_bytes());
        }
        out.push(b'\n');
        push_wrapped_base64(&mut out, &stanza.body);
    }
    out.extend_from_slice(b"---");
    out
}

fn new_hmac(file_key: &FileKey) -> HmacSha256 {
    let hkdf = Hkdf::<Sha256>::new(None, file_key.expose_secret());
    let mut mac_key = [0u8; 32];
    hkdf.expand(MAC_INFO, &mut mac_key)
        .expect("HKDF-SHA-256 produces 32 bytes");
    let hmac = HmacSha256::new_from_slice(&mac_key).expect("HMAC accepts any key size");
    mac_key.zeroize();
    hmac
}

fn compute_mac(file_key: &FileKey, input: &[u8]) -> [u8; MAC_SIZE] {
    let mut hmac = new_hmac(file_key);
    hmac.update(input);
    hmac.finalize().into_bytes().into()
}

/// Read one LF-terminated line, without the terminator. CR anywhere in the
/// header is invalid.
fn read_line<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, HeaderError> {
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line)?;
    if n == 0 || line.pop() != Some(b'\n') {
        return Err(HeaderError::Truncated);
    }
    if line.contains(&b'\r') {
        return Err(HeaderError::InvalidStanza("carriage return in header".into()));
    }
    Ok(line)
}

fn is_printable_ascii(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| (33..=126).contains(&b))
}

fn parse_stanza_line(rest: &[u8]) -> Result<(String, Vec<String>), HeaderError> {
    let rest = std::str::from_utf8(rest)
        .map_err(|_| HeaderError::InvalidStanza("non-ASCII stanza line".into()))?;
    let mut fields = rest.split(' ').map(str::to_string);
    let tag = fields
        .next()
        .filter(|t| is_printable_ascii(t))
        .ok_or_else(|| HeaderError::InvalidStanza("empty stanza tag".into()))?;
    let args: Vec<String> = fields.collect();
    if !args.iter().all(|a| is_printable_ascii(a)) {
        return Err(HeaderError::InvalidStanza(
            "stanza argument is empty or not printable ASCII".into(),
        ));
    }
    Ok((tag, args))
}

/// Read a stanza body: full 64-column lines followed by one short
/// (possibly empty) terminator line.
fn read_body<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, HeaderError> {
    let mut body = Vec::new();
    loop {
        let line = read_line(reader)?;
        if line.len() > COLUMNS_PER_LINE {
            return Err(HeaderError::InvalidStanza("body line is too long".into()));
        }
        let decoded = base64_decode(&line)
            .map_err(|_| HeaderError::InvalidStanza("invalid base64 in body".into()))?;
        body.extend_from_slice(&decoded);
        if line.len() < COLUMNS_PER_LINE {
            return Ok(body);
        }
    }
}

fn parse_mac(rest: &[u8]) -> Result<[u8; MAC_SIZE], HeaderError> {
    let decoded = base64_decode(rest).map_err(|_| HeaderError::InvalidMac)?;
    let mut mac = [0u8; MAC_SIZE];
    if decoded.len() != MAC_SIZE {
        return Err(HeaderError::InvalidMac);
    }
    mac.copy_from_slice(&decoded);
    Ok(mac)
}
