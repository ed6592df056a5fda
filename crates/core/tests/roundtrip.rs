//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: ageseal — age-encryption.org/v1 file encryption.
//

//! End-to-end encryption round trips across recipient kinds.

use std::io::{Read, Write};

use ageseal_core::mlkem::HybridIdentity;
use ageseal_core::scrypt::{ScryptIdentity, ScryptRecipient};
use ageseal_core::x25519::{X25519Identity, X25519Recipient};
use ageseal_core::{
    decrypt, encrypt, encrypt_detached, DecryptError, Identity, Recipient, CHUNK_SIZE,
};

const TEST_RECIPIENT: &str = "age1cy0su9fwf3gf9mw868g5yut09p6nytfmmnktexz2ya5uqg9vl9sss4euqm";
const TEST_IDENTITY: &str =
    "AGE-SECRET-KEY-184JMZMVQH3E6U0PSL869004Y3U2NYV7R30EU99CSEDNPH02YUVFSZW44VU";

fn encrypt_to_vec(recipients: &[&dyn Recipient], plaintext: &[u8]) -> Vec<u8> {
    let mut writer = encrypt(recipients, Vec::new()).expect("Failed to start encryption");
    writer.write_all(plaintext).expect("Failed to write");
    writer.finish().expect("Failed to finish");
    writer.into_inner()
}

fn decrypt_to_vec(identities: &[&dyn Identity], file: &[u8]) -> Result<Vec<u8>, DecryptError> {
    let mut reader = decrypt(identities, file)?;
    let mut plaintext = Vec::new();
    reader
        .read_to_end(&mut plaintext)
        .map_err(DecryptError::classify_io)?;
    Ok(plaintext)
}

#[test]
fn test_x25519_known_keys() {
    let recipient: X25519Recipient = TEST_RECIPIENT.parse().expect("Failed to parse recipient");
    let identity: X25519Identity = TEST_IDENTITY.parse().expect("Failed to parse identity");
    assert_eq!(identity.to_recipient().to_string(), TEST_RECIPIENT);

    let plaintext = b"Black lives matter.";
    let file = encrypt_to_vec(&[&recipient], plaintext);
    // 168-byte header, 16-byte nonce, 19 + 16 bytes of payload.
    assert_eq!(file.len(), 219);
    assert!(file.starts_with(b"age-encryption.org/v1\n"));

    let decrypted = decrypt_to_vec(&[&identity], &file).expect("Failed to decrypt");
    assert_eq!(decrypted, plaintext);
}

#[test]
fn test_empty_plaintext() {
    let identity = X25519Identity::generate();
    let file = encrypt_to_vec(&[&identity.to_recipient()], b"");
    let decrypted = decrypt_to_vec(&[&identity], &file).expect("Failed to decrypt");
    assert!(decrypted.is_empty());
}

#[test]
fn test_two_chunk_boundary() {
    let identity = X25519Identity::generate();
    // One full chunk plus a single byte.
    let plaintext = vec![0xA5u8; CHUNK_SIZE + 1];
    let file = encrypt_to_vec(&[&identity.to_recipient()], &plaintext);
    let decrypted = decrypt_to_vec(&[&identity], &file).expect("Failed to decrypt");
    assert_eq!(decrypted, plaintext);
}

#[test]
fn test_exact_chunk_multiple() {
    let identity = X25519Identity::generate();
    let plaintext = vec![0x3Cu8; CHUNK_SIZE * 2];
    let file = encrypt_to_vec(&[&identity.to_recipient()], &plaintext);
    let decrypted = decrypt_to_vec(&[&identity], &file).expect("Failed to decrypt");
    assert_eq!(decrypted, plaintext);
}

#[test]
fn test_multiple_recipients_any_identity_decrypts() {
    let alice = X25519Identity::generate();
    let bob = X25519Identity::generate();
    let carol = X25519Identity::generate();

    let file = encrypt_to_vec(
        &[&alice.to_recipient(), &bob.to_recipient()],
        b"for both of you",
    );

    for identity in [&alice, &bob] {
        let decrypted =
            decrypt_to_vec(&[identity as &dyn Identity], &file).expect("Failed to decrypt");
        assert_eq!(decrypted, b"for both of you");
    }

    // Carol is not a recipient.
    assert!(matches!(
        decrypt_to_vec(&[&carol], &file),
        Err(DecryptError::NoIdentityMatch(_))
    ));
}

#[test]
fn test_hybrid_round_trip() {
    let identity = HybridIdentity::generate();
    let file = encrypt_to_vec(&[&identity.to_recipient()], b"post-quantum payload");
    let decrypted = decrypt_to_vec(&[&identity], &file).expect("Failed to decrypt");
    assert_eq!(decrypted, b"post-quantum payload");
}

#[test]
fn test_scrypt_round_trip() {
    let recipient = ScryptRecipient::new("password").with_work_factor(10);
    let file = encrypt_to_vec(&[&recipient], b"passphrase protected");

    let identity = ScryptIdentity::new("password");
    let decrypted = decrypt_to_vec(&[&identity], &file).expect("Failed to decrypt");
    assert_eq!(decrypted, b"passphrase protected");

    let wrong = ScryptIdentity::new("hunter2");
    assert!(matches!(
        decrypt_to_vec(&[&wrong], &file),
        Err(DecryptError::NoIdentityMatch(_))
    ));
}

#[test]
fn test_payload_size_law() {
    let identity = X25519Identity::generate();
    let recipient = identity.to_recipient();

    for n in [0usize, 1, 19, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, CHUNK_SIZE * 2] {
        let plaintext = vec![0u8; n];
        let mut header = Vec::new();
        let mut writer = encrypt_detached(&[&recipient], &mut header, Vec::new())
            .expect("Failed to start encryption");
        writer.write_all(&plaintext).expect("Failed to write");
        writer.finish().expect("Failed to finish");
        let payload = writer.into_inner();

        let chunks = usize::max(n, 1).div_ceil(CHUNK_SIZE);
        assert_eq!(payload.len(), 16 + n + 16 * chunks, "plaintext length {n}");
    }
}

#[test]
fn test_mixed_writes_and_reads() {
    let identity = X25519Identity::generate();
    let plaintext: Vec<u8> = (0..180_000u32).map(|i| (i % 253) as u8).collect();

    let mut writer =
        encrypt(&[&identity.to_recipient()], Vec::new()).expect("Failed to start encryption");
    // Uneven write sizes spanning chunk boundaries.
    for piece in plaintext.chunks(0x3FFF) {
        writer.write_all(piece).expect("Failed to write");
    }
    writer.finish().expect("Failed to finish");
    let file = writer.into_inner();

    let mut reader = decrypt(&[&identity], file.as_slice()).expect("Failed to start decryption");
    let mut decrypted = Vec::new();
    let mut buf = [0u8; 977];
    loop {
        let n = reader.read(&mut buf).expect("Failed to read");
        if n == 0 {
            break;
        }
        decrypted.extend_from_slice(&buf[..n]);
    }
    assert_eq!(decrypted, plaintext);
}

#[test]
fn test_identity_file_end_to_end() {
    let identity = X25519Identity::generate();
    let recipient_line = identity.to_recipient().to_string();
    let identity_file = format!("# keep this safe\n{identity}\n");

    let recipients =
        ageseal_core::read_recipient_file(recipient_line.as_bytes()).expect("Failed to parse");
    let refs: Vec<&dyn Recipient> = recipients.iter().map(|r| r.as_ref()).collect();
    let file = encrypt_to_vec(&refs, b"via key files");

    let identities =
        ageseal_core::read_identity_file(identity_file.as_bytes()).expect("Failed to parse");
    let refs: Vec<&dyn Identity> = identities.iter().map(|i| i.as_ref()).collect();
    let decrypted = decrypt_to_vec(&refs, &file).expect("Failed to decrypt");
    assert_eq!(decrypted, b"via key files");
}
