// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: ageseal — age-encryption.org/v1 file encryption.

//! Minimal HPKE (RFC 9180) in Base mode for a single suite: the combined
//! ML-KEM-768 + X25519 KEM with HKDF-SHA-256 and ChaCha20-Poly1305.
//!
//! The KEM halves are combined X-Wing style: both shared secrets, the X25519
//! ciphertext, and the X25519 recipient key are hashed together with
//! SHA3-256, which binds the classical half to the transcript and lets
//! ML-KEM's implicit rejection carry through to the AEAD opening. Each HPKE
//! context seals exactly one message, so only sequence number zero is ever
//! used.

use hkdf::Hkdf;
use pqcrypto_mlkem::mlkem768;
use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _};
use rand_core::OsRng;
use sha2::Sha256;
use sha3::{Digest, Sha3_256};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use thiserror::Error;

/// ML-KEM-768 public key length.
pub(crate) const MLKEM_PUBLIC_KEY_SIZE: usize = 1184;

/// ML-KEM-768 secret key length (FIPS 203 expanded form).
pub(crate) const MLKEM_SECRET_KEY_SIZE: usize = 2400;

/// ML-KEM-768 ciphertext length.
pub(crate) const MLKEM_CIPHERTEXT_SIZE: usize = 1088;

/// Combined KEM public key length: ML-KEM-768 then X25519.
pub(crate) const PUBLIC_KEY_SIZE: usize = MLKEM_PUBLIC_KEY_SIZE + 32;

/// Combined KEM secret key length: ML-KEM-768 then X25519.
pub(crate) const SECRET_KEY_SIZE: usize = MLKEM_SECRET_KEY_SIZE + 32;

/// Combined KEM encapsulation length: ML-KEM-768 ciphertext then the
/// ephemeral X25519 public key.
pub(crate) const ENCAPSULATION_SIZE: usize = MLKEM_CIPHERTEXT_SIZE + 32;

// HPKE identifiers for suite binding in the labeled KDF calls.
const KEM_ID: u16 = 0x647a;
const KDF_ID: u16 = 0x0001;
const AEAD_ID: u16 = 0x0003;
const MODE_BASE: u8 = 0x00;

// Domain separator hashed into the combined shared secret.
const COMBINER_LABEL: &[u8; 6] = b"\\.//^\\";

/// Errors from the HPKE layer. `Open` covers every authentication failure,
/// including a wrong recipient key surfacing through ML-KEM's implicit
/// rejection.
#[derive(Error, Debug)]
pub(crate) enum HpkeError {
    #[error("malformed KEM input: {0}")]
    Kem(String),

    #[error("HPKE key schedule failed")]
    KeySchedule,

    #[error("HPKE sealing failed")]
    Seal,

    #[error("HPKE opening failed")]
    Open,
}

/// Combined ML-KEM-768 + X25519 public key.
#[derive(Clone)]
pub(crate) struct KemPublicKey {
    mlkem: mlkem768::PublicKey,
    x25519: PublicKey,
}

/// Combined ML-KEM-768 + X25519 secret key.
pub(crate) struct KemSecretKey {
    mlkem: mlkem768::SecretKey,
    x25519: StaticSecret,
}

impl KemPublicKey {
    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, HpkeError> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(HpkeError::Kem(format!(
                "public key is {} bytes, expected {PUBLIC_KEY_SIZE}",
                bytes.len()
            )));
        }
        let mlkem = mlkem768::PublicKey::from_bytes(&bytes[..MLKEM_PUBLIC_KEY_SIZE])
            .map_err(|e| HpkeError::Kem(e.to_string()))?;
        let mut x25519 = [0u8; 32];
        x25519.copy_from_slice(&bytes[MLKEM_PUBLIC_KEY_SIZE..]);
        Ok(KemPublicKey {
            mlkem,
            x25519: PublicKey::from(x25519),
        })
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE);
        out.extend_from_slice(self.mlkem.as_bytes());
        out.extend_from_slice(self.x25519.as_bytes());
        out
    }
}

impl KemSecretKey {
    /// Generate a fresh combined keypair.
    pub(crate) fn generate() -> Self {
        let (_, mlkem) = mlkem768::keypair();
        let x25519 = StaticSecret::random_from_rng(OsRng);
        KemSecretKey { mlkem, x25519 }
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, HpkeError> {
        if bytes.len() != SECRET_KEY_SIZE {
            return Err(HpkeError::Kem(format!(
                "secret key is {} bytes, expected {SECRET_KEY_SIZE}",
                bytes.len()
            )));
        }
        let mlkem = mlkem768::SecretKey::from_bytes(&bytes[..MLKEM_SECRET_KEY_SIZE])
            .map_err(|e| HpkeError::Kem(e.to_string()))?;
        let mut x25519 = [0u8; 32];
        x25519.copy_from_slice(&bytes[MLKEM_SECRET_KEY_SIZE..]);
        let secret = KemSecretKey {
            mlkem,
            x25519: StaticSecret::from(x25519),
        };
        x25519.zeroize();
        Ok(secret)
    }

    pub(crate) fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Vec::with_capacity(SECRET_KEY_SIZE);
        out.extend_from_slice(self.mlkem.as_bytes());
        out.extend_from_slice(&self.x25519.to_bytes());
        Zeroizing::new(out)
    }

    /// Derive the corresponding public key.
    ///
    /// The FIPS 203 expanded secret key embeds the encapsulation key at
    /// offset 1152, so no regeneration is needed.
    pub(crate) fn public_key(&self) -> KemPublicKey {
        let sk_bytes = self.mlkem.as_bytes();
        let embedded = &sk_bytes[1152..1152 + MLKEM_PUBLIC_KEY_SIZE];
        let mlkem = mlkem768::PublicKey::from_bytes(embedded)
            .expect("embedded encapsulation key has the correct length");
        KemPublicKey {
            mlkem,
            x25519: PublicKey::from(&self.x25519),
        }
    }
}

fn combine_secrets(
    mlkem_secret: &[u8],
    x25519_secret: &[u8; 32],
    x25519_ciphertext: &[u8; 32],
    x25519_public: &[u8; 32],
) -> Zeroizing<[u8; 32]> {
    let mut hasher = Sha3_256::new();
    hasher.update(mlkem_secret);
    hasher.update(x25519_secret);
    hasher.update(x25519_ciphertext);
    hasher.update(x25519_public);
    hasher.update(COMBINER_LABEL);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Zeroizing::new(out)
}

/// Encapsulate to `pk`, returning the shared secret and the wire
/// encapsulation.
fn encapsulate(pk: &KemPublicKey) -> (Zeroizing<[u8; 32]>, Vec<u8>) {
    let (mlkem_secret, mlkem_ct) = mlkem768::encapsulate(&pk.mlkem);
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let x25519_ct = PublicKey::from(&ephemeral);
    let x25519_secret = ephemeral.diffie_hellman(&pk.x25519);

    let shared = combine_secrets(
        mlkem_secret.as_bytes(),
        x25519_secret.as_bytes(),
        x25519_ct.as_bytes(),
        pk.x25519.as_bytes(),
    );

    let mut enc = Vec::with_capacity(ENCAPSULATION_SIZE);
    enc.extend_from_slice(mlkem_ct.as_bytes());
    enc.extend_from_slice(x25519_ct.as_bytes());
    (shared, enc)
}

/// Decapsulate `enc` with `sk`. Never fails on a wrong key: ML-KEM rejects
/// implicitly, yielding a shared secret that cannot open the AEAD.
fn decapsulate(sk: &KemSecretKey, enc: &[u8]) -> Result<Zeroizing<[u8; 32]>, HpkeError> {
    if enc.len() != ENCAPSULATION_SIZE {
        return Err(HpkeError::Kem(format!(
            "encapsulation is {} bytes, expected {ENCAPSULATION_SIZE}",
            enc.len()
        )));
    }
    let mlkem_ct = mlkem768::Ciphertext::from_bytes(&enc[..MLKEM_CIPHERTEXT_SIZE])
        .map_err(|e| HpkeError::Kem(e.to_string()))?;
    let mlkem_secret = mlkem768::decapsulate(&mlkem_ct, &sk.mlkem);

    let mut x25519_ct = [0u8; 32];
    x25519_ct.copy_from_slice(&enc[MLKEM_CIPHERTEXT_SIZE..]);
    let x25519_secret = sk.x25519.diffie_hellman(&PublicKey::from(x25519_ct));
    let x25519_public = PublicKey::from(&sk.x25519);

    Ok(combine_secrets(
        mlkem_secret.as_bytes(),
        x25519_secret.as_bytes(),
        &x25519_ct,
        x25519_public.as_bytes(),
    ))
}

fn suite_id() -> [u8; 10] {
    let mut id = [0u8; 10];
    id[..4].copy_from_slice(b"HPKE");
    id[4..6].copy_from_slice(&KEM_ID.to_be_bytes());
    id[6..8].copy_from_slice(&KDF_ID.to_be_bytes());
    id[8..10].copy_from_slice(&AEAD_ID.to_be_bytes());
    id
}

fn labeled_extract(salt: &[u8], label: &[u8], ikm: &[u8]) -> [u8; 32] {
    let mut labeled_ikm = Vec::with_capacity(7 + 10 + label.len() + ikm.len());
    labeled_ikm.extend_from_slice(b"HPKE-v1");
    labeled_ikm.extend_from_slice(&suite_id());
    labeled_ikm.extend_from_slice(label);
    labeled_ikm.extend_from_slice(ikm);
    let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), &labeled_ikm);
    labeled_ikm.zeroize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&prk);
    out
}

fn labeled_expand(prk: &[u8; 32], label: &[u8], info: &[u8], out: &mut [u8]) -> Result<(), HpkeError> {
    let hkdf = Hkdf::<Sha256>::from_prk(prk).map_err(|_| HpkeError::KeySchedule)?;
    let mut labeled_info = Vec::with_capacity(2 + 7 + 10 + label.len() + info.len());
    labeled_info.extend_from_slice(&(out.len() as u16).to_be_bytes());
    labeled_info.extend_from_slice(b"HPKE-v1");
    labeled_info.extend_from_slice(&suite_id());
    labeled_info.extend_from_slice(label);
    labeled_info.extend_from_slice(info);
    hkdf.expand(&labeled_info, out)
        .map_err(|_| HpkeError::KeySchedule)
}

/// RFC 9180 §5.1 key schedule for Base mode, returning the AEAD key and the
/// base nonce for sequence number zero.
fn key_schedule(
    shared_secret: &[u8; 32],
    info: &[u8],
) -> Result<(Zeroizing<[u8; 32]>, [u8; 12]), HpkeError> {
    let psk_id_hash = labeled_extract(b"", b"psk_id_hash", b"");
    let info_hash = labeled_extract(b"", b"info_hash", info);

    let mut context = Vec::with_capacity(1 + 32 + 32);
    context.push(MODE_BASE);
    context.extend_from_slice(&psk_id_hash);
    context.extend_from_slice(&info_hash);

    let mut secret = labeled_extract(shared_secret, b"secret", b"");
    let mut key = Zeroizing::new([0u8; 32]);
    labeled_expand(&secret, b"key", &context, &mut *key)?;
    let mut base_nonce = [0u8; 12];
    labeled_expand(&secret, b"base_nonce", &context, &mut base_nonce)?;
    secret.zeroize();

    Ok((key, base_nonce))
}

/// `SetupBaseS` followed by a single `Seal` with empty AAD.
pub(crate) fn seal(
    pk: &KemPublicKey,
    info: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), HpkeError> {
    let (shared, enc) = encapsulate(pk);
    let (key, base_nonce) = key_schedule(&shared, info)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&*key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&base_nonce), plaintext)
        .map_err(|_| HpkeError::Seal)?;
    Ok((enc, ciphertext))
}

/// `SetupBaseR` followed by a single `Open` with empty AAD.
pub(crate) fn open(
    sk: &KemSecretKey,
    enc: &[u8],
    info: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, HpkeError> {
    let shared = decapsulate(sk, enc)?;
    let (key, base_nonce) = key_schedule(&shared, info)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&*key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&base_nonce), ciphertext)
        .map_err(|_| HpkeError::Open)?;
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO: &[u8] = b"test suite info";

    #[test]
    fn test_seal_open_round_trip() {
        let sk = KemSecretKey::generate();
        let pk = sk.public_key();

        let (enc, ct) = seal(&pk, INFO, b"sixteen byte key").expect("Failed to seal");
        assert_eq!(enc.len(), ENCAPSULATION_SIZE);
        assert_eq!(ct.len(), 16 + 16);

        let pt = open(&sk, &enc, INFO, &ct).expect("Failed to open");
        assert_eq!(pt.as_slice(), b"sixteen byte key");
    }

    #[test]
    fn test_wrong_key_fails_only_at_open() {
        let sk = KemSecretKey::generate();
        let pk = sk.public_key();
        let other = KemSecretKey::generate();

        let (enc, ct) = seal(&pk, INFO, b"sixteen byte key").expect("Failed to seal");
        // Implicit rejection: decapsulation succeeds, opening fails.
        match open(&other, &enc, INFO, &ct) {
            Err(HpkeError::Open) => {}
            result => panic!("Expected an open failure, got {result:?}"),
        }
    }

    #[test]
    fn test_info_is_bound() {
        let sk = KemSecretKey::generate();
        let pk = sk.public_key();

        let (enc, ct) = seal(&pk, INFO, b"sixteen byte key").expect("Failed to seal");
        assert!(open(&sk, &enc, b"other info", &ct).is_err());
    }

    #[test]
    fn test_key_round_trips_through_bytes() {
        let sk = KemSecretKey::generate();
        let pk = sk.public_key();

        let sk2 = KemSecretKey::from_bytes(&sk.to_bytes()).expect("Failed to parse secret key");
        let pk2 = KemPublicKey::from_bytes(&pk.to_bytes()).expect("Failed to parse public key");

        let (enc, ct) = seal(&pk2, INFO, b"sixteen byte key").expect("Failed to seal");
        let pt = open(&sk2, &enc, INFO, &ct).expect("Failed to open");
        assert_eq!(pt.as_slice(), b"sixteen byte key");
    }

    #[test]
    fn test_public_key_embedded_in_secret_key() {
        let sk = KemSecretKey::generate();
        let pk = sk.public_key();
        assert_eq!(pk.to_bytes().len(), PUBLIC_KEY_SIZE);
        // The embedded encapsulation key must actually work.
        let (enc, ct) = seal(&pk, INFO, b"sixteen byte key").expect("Failed to seal");
        assert!(open(&sk, &enc, INFO, &ct).is_ok());
    }
}
