// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: ageseal — age-encryption.org/v1 file encryption.

//! Native X25519 recipients and identities.
//!
//! The file key is wrapped with a key derived from an ephemeral
//! Diffie-Hellman exchange: HKDF-SHA-256 with the ephemeral and recipient
//! public keys as salt and the shared secret as input keying material.

use std::fmt;
use std::str::FromStr;

use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::encoding::{base64_arg, base64_encode, bech32_decode, bech32_encode, bech32_encode_upper};
use crate::error::{EncryptError, KeyError, UnwrapError};
use crate::format::Stanza;
use crate::recipients::{file_key_from_bytes, open_file_key, seal_file_key, Identity, Recipient};
use crate::FileKey;

const STANZA_TAG: &str = "X25519";
const KEY_LABEL: &[u8] = b"age-encryption.org/v1/X25519";

const RECIPIENT_HRP: &str = "age";
const IDENTITY_HRP: &str = "age-secret-key-";

/// Derive the wrap key for one ephemeral exchange.
fn wrap_key(
    ephemeral_public: &PublicKey,
    recipient_public: &PublicKey,
    shared_secret: &[u8; 32],
) -> Result<[u8; 32], String> {
    // Reject low-order points (all-zero shared secret).
    if shared_secret.iter().all(|&b| b == 0) {
        return Err("X25519 produced a zero shared secret".into());
    }
    let mut salt = Vec::with_capacity(64);
    salt.extend_from_slice(ephemeral_public.as_bytes());
    salt.extend_from_slice(recipient_public.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
    let mut key = [0u8; 32];
    hkdf.expand(KEY_LABEL, &mut key)
        .map_err(|_| "HKDF expand failed".to_string())?;
    Ok(key)
}

/// An X25519 public key, parsed from or rendered as an `age1…` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X25519Recipient(PublicKey);

impl X25519Recipient {
    /// Build a recipient from raw public key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        X25519Recipient(PublicKey::from(bytes))
    }
}

impl fmt::Display for X25519Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = bech32_encode(RECIPIENT_HRP, self.0.as_bytes())
            .expect("32-byte keys always encode");
        f.write_str(&encoded)
    }
}

impl FromStr for X25519Recipient {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hrp, data) = bech32_decode(s)?;
        if hrp != RECIPIENT_HRP {
            return Err(KeyError::UnexpectedHrp(hrp));
        }
        let bytes: [u8; 32] = data
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidLength(data.len()))?;
        Ok(X25519Recipient(PublicKey::from(bytes)))
    }
}

impl Recipient for X25519Recipient {
    fn wrap(&self, file_key: &FileKey) -> Result<Vec<Stanza>, EncryptError> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&self.0);

        let mut key = wrap_key(&ephemeral_public, &self.0, shared.as_bytes())
            .map_err(EncryptError::Wrap)?;
        let body = seal_file_key(&mut key, file_key)?;

        Ok(vec![Stanza::new(
            STANZA_TAG,
            vec![base64_encode(ephemeral_public.as_bytes())],
            body,
        )])
    }
}

/// An X25519 secret key, parsed from or rendered as an
/// `AGE-SECRET-KEY-1…` string.
pub struct X25519Identity(StaticSecret);

impl X25519Identity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        X25519Identity(StaticSecret::random_from_rng(OsRng))
    }

    /// Build an identity from raw secret key bytes.
    pub fn from_bytes(mut bytes: [u8; 32]) -> Self {
        let identity = X25519Identity(StaticSecret::from(bytes));
        bytes.zeroize();
        identity
    }

    /// The recipient this identity decrypts for.
    pub fn to_recipient(&self) -> X25519Recipient {
        X25519Recipient(PublicKey::from(&self.0))
    }
}

impl fmt::Debug for X25519Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("X25519Identity([REDACTED])")
    }
}

impl fmt::Display for X25519Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = bech32_encode_upper(IDENTITY_HRP, &self.0.to_bytes())
            .expect("32-byte keys always encode");
        f.write_str(&encoded)
    }
}

impl FromStr for X25519Identity {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hrp, mut data) = bech32_decode(s)?;
        if hrp != IDENTITY_HRP {
            return Err(KeyError::UnexpectedHrp(hrp));
        }
        let bytes: [u8; 32] = data
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidLength(data.len()))?;
        data.zeroize();
        Ok(X25519Identity::from_bytes(bytes))
    }
}

impl Identity for X25519Identity {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Result<FileKey, UnwrapError> {
        if stanza.tag != STANZA_TAG {
            return Err(UnwrapError::IncorrectIdentity);
        }
        if stanza.args.len() != 1 {
            return Err(UnwrapError::InvalidStanza(
                "X25519 stanza must have one argument".into(),
            ));
        }
        let ephemeral: [u8; 32] = base64_arg(&stanza.args[0]).ok_or_else(|| {
            UnwrapError::InvalidStanza("X25519 ephemeral share must be 32 bytes".into())
        })?;

        let ephemeral_public = PublicKey::from(ephemeral);
        let shared = self.0.diffie_hellman(&ephemeral_public);
        let recipient_public = PublicKey::from(&self.0);

        let mut key = wrap_key(&ephemeral_public, &recipient_public, shared.as_bytes())
            .map_err(UnwrapError::InvalidStanza)?;

        // A failed opening just means the stanza targets another key.
        let plaintext = open_file_key(&mut key, &stanza.body)
            .ok_or(UnwrapError::IncorrectIdentity)?;
        file_key_from_bytes(plaintext)
    }
}
