// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: ageseal — age-encryption.org/v1 file encryption.

//! Hybrid post-quantum recipients: ML-KEM-768 + X25519 via HPKE.
//!
//! These recipients carry the `postquantum` label, so a file encrypted to
//! one cannot also be encrypted to a classical recipient: mixing would
//! silently lose the post-quantum guarantee.

use std::fmt;
use std::str::FromStr;

use zeroize::Zeroize;

use crate::encoding::{base64_decode, base64_encode, bech32_decode, bech32_encode, bech32_encode_upper};
use crate::error::{EncryptError, KeyError, UnwrapError};
use crate::format::Stanza;
use crate::hpke;
use crate::recipients::{file_key_from_bytes, Identity, Recipient};
use crate::FileKey;

const STANZA_TAG: &str = "mlkem768x25519";
const KEY_LABEL: &[u8] = b"age-encryption.org/mlkem768x25519";
const SEALED_FILE_KEY_SIZE: usize = 32;

/// Label attached to every hybrid stanza.
pub const POSTQUANTUM_LABEL: &str = "postquantum";

const RECIPIENT_HRP: &str = "age1pq";
const IDENTITY_HRP: &str = "age-secret-key-pq-";

/// A hybrid ML-KEM-768 + X25519 public key, rendered as `age1pq1…`.
#[derive(Clone)]
pub struct HybridRecipient(hpke::KemPublicKey);

impl HybridRecipient {
    /// Parse a recipient from raw combined public key bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        hpke::KemPublicKey::from_bytes(bytes)
            .map(HybridRecipient)
            .map_err(|_| KeyError::InvalidLength(bytes.len()))
    }
}

impl fmt::Display for HybridRecipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = bech32_encode(RECIPIENT_HRP, &self.0.to_bytes())
            .expect("KEM public keys always encode");
        f.write_str(&encoded)
    }
}

impl FromStr for HybridRecipient {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hrp, data) = bech32_decode(s)?;
        if hrp != RECIPIENT_HRP {
            return Err(KeyError::UnexpectedHrp(hrp));
        }
        HybridRecipient::from_bytes(&data)
    }
}

impl Recipient for HybridRecipient {
    fn wrap(&self, file_key: &FileKey) -> Result<Vec<Stanza>, EncryptError> {
        let (enc, sealed) = hpke::seal(&self.0, KEY_LABEL, file_key.expose_secret())
            .map_err(|e| EncryptError::Wrap(e.to_string()))?;
        Ok(vec![Stanza::new(
            STANZA_TAG,
            vec![base64_encode(&enc)],
            sealed,
        )])
    }

    fn labels(&self) -> Vec<String> {
        vec![POSTQUANTUM_LABEL.to_string()]
    }
}

/// A hybrid ML-KEM-768 + X25519 secret key, rendered as
/// `AGE-SECRET-KEY-PQ-1…`.
pub struct HybridIdentity(hpke::KemSecretKey);

impl HybridIdentity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        HybridIdentity(hpke::KemSecretKey::generate())
    }

    /// Parse an identity from raw combined secret key bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        hpke::KemSecretKey::from_bytes(bytes)
            .map(HybridIdentity)
            .map_err(|_| KeyError::InvalidLength(bytes.len()))
    }

    /// The recipient this identity decrypts for.
    pub fn to_recipient(&self) -> HybridRecipient {
        HybridRecipient(self.0.public_key())
    }
}

impl fmt::Debug for HybridIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HybridIdentity([REDACTED])")
    }
}

impl fmt::Display for HybridIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = bech32_encode_upper(IDENTITY_HRP, &self.0.to_bytes())
            .expect("KEM secret keys always encode");
        f.write_str(&encoded)
    }
}

impl FromStr for HybridIdentity {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hrp, mut data) = bech32_decode(s)?;
        if hrp != IDENTITY_HRP {
            return Err(KeyError::UnexpectedHrp(hrp));
        }
        let identity = HybridIdentity::from_bytes(&data);
        data.zeroize();
        identity
    }
}

impl Identity for HybridIdentity {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Result<FileKey, UnwrapError> {
        if stanza.tag != STANZA_TAG {
            return Err(UnwrapError::IncorrectIdentity);
        }
        if stanza.args.len() != 1 {
            return Err(UnwrapError::InvalidStanza(
                "mlkem768x25519 stanza must have one argument".into(),
            ));
        }
        if stanza.body.len() != SEALED_FILE_KEY_SIZE {
            return Err(UnwrapError::InvalidStanza(
                "mlkem768x25519 stanza body must be 32 bytes".into(),
            ));
        }
        let enc = base64_decode(&stanza.args[0]).map_err(|_| {
            UnwrapError::InvalidStanza("invalid mlkem768x25519 encapsulation".into())
        })?;
        if enc.len() != hpke::ENCAPSULATION_SIZE {
            return Err(UnwrapError::InvalidStanza(
                "mlkem768x25519 encapsulation has the wrong length".into(),
            ));
        }

        // ML-KEM rejects implicitly, so a wrong key only ever shows up as an
        // opening failure here.
        let plaintext = hpke::open(&self.0, &enc, KEY_LABEL, &stanza.body)
            .map_err(|_| UnwrapError::IncorrectIdentity)?;
        file_key_from_bytes(plaintext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_round_trip() {
        let identity = HybridIdentity::generate();
        let recipient = identity.to_recipient();
        let file_key = FileKey::new([6u8; 16]);

        let stanzas = recipient.wrap(&file_key).expect("Failed to wrap");
        assert_eq!(stanzas.len(), 1);
        assert_eq!(stanzas[0].tag, "mlkem768x25519");
        assert_eq!(stanzas[0].body.len(), 32);

        let recovered = identity
            .unwrap_stanzas(&stanzas)
            .expect("Failed to unwrap");
        assert_eq!(recovered.expose_secret(), file_key.expose_secret());
    }

    #[test]
    fn test_wrong_identity_is_recoverable() {
        let recipient = HybridIdentity::generate().to_recipient();
        let other = HybridIdentity::generate();

        let stanzas = recipient
            .wrap(&FileKey::new([6u8; 16]))
            .expect("Failed to wrap");
        match other.unwrap_stanzas(&stanzas) {
            Err(UnwrapError::IncorrectIdentity) => {}
            result => panic!("Expected IncorrectIdentity, got {result:?}"),
        }
    }

    #[test]
    fn test_labels() {
        let recipient = HybridIdentity::generate().to_recipient();
        assert_eq!(recipient.labels(), vec!["postquantum".to_string()]);
    }

    #[test]
    fn test_key_string_round_trip() {
        let identity = HybridIdentity::generate();
        let identity_str = identity.to_string();
        assert!(identity_str.starts_with("AGE-SECRET-KEY-PQ-1"));

        let reparsed: HybridIdentity = identity_str.parse().expect("Failed to parse identity");
        let recipient_str = reparsed.to_recipient().to_string();
        assert!(recipient_str.starts_with("age1pq1"));

        let recipient: HybridRecipient =
            recipient_str.parse().expect("Failed to parse recipient");
        let stanzas = recipient
            .wrap(&FileKey::new([1u8; 16]))
            .expect("Failed to wrap");
        assert!(identity.unwrap_stanzas(&stanzas).is_ok());
    }

    #[test]
    fn test_oversized_body_is_fatal() {
        let identity = HybridIdentity::generate();
        let stanza = Stanza::new("mlkem768x25519", vec!["AAAA".into()], vec![0u8; 48]);
        assert!(matches!(
            identity.unwrap_stanza(&stanza),
            Err(UnwrapError::InvalidStanza(_))
        ));
    }
}
