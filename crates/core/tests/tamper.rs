//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: ageseal — age-encryption.org/v1 file encryption.
//

//! Tamper-evidence: every modification of a file must surface as an error.

use std::io::{Read, Write};

use ageseal_core::x25519::X25519Identity;
use ageseal_core::{decrypt, encrypt, DecryptError, Identity, Recipient};

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

fn header_length(file: &[u8]) -> usize {
    // The MAC line is the last header line; the payload starts right after
    // its newline.
    let marker = b"\n--- ";
    let start = file
        .windows(marker.len())
        .position(|w| w == marker)
        .expect("File has a MAC line");
    let end = file[start + 1..]
        .iter()
        .position(|&b| b == b'\n')
        .expect("MAC line is terminated");
    start + 1 + end + 1
}

#[test]
fn test_mac_last_bit_flip_is_header_mac_failure() {
    let identity = X25519Identity::generate();
    let mut file = encrypt_to_vec(&[&identity.to_recipient()], b"important");

    let header_len = header_length(&file);
    // Last base64 character of the MAC line.
    let mac_line_end = header_len - 1;
    file[mac_line_end - 1] ^= 0x01;

    match decrypt_to_vec(&[&identity], &file) {
        Err(DecryptError::HeaderMac) | Err(DecryptError::Header(_)) => {}
        result => panic!("Expected a header failure, got {:?}", result.is_ok()),
    }
}

#[test]
fn test_intro_flip_is_header_parse_failure() {
    let identity = X25519Identity::generate();
    let mut file = encrypt_to_vec(&[&identity.to_recipient()], b"important");
    file[0] ^= 0x20;

    assert!(matches!(
        decrypt_to_vec(&[&identity], &file),
        Err(DecryptError::Header(_))
    ));
}

#[test]
fn test_foreign_stanza_tamper_is_caught_by_mac() {
    // Two recipients; the second recipient's stanza is tampered with. The
    // first identity still unwraps its own stanza, so only the header MAC
    // can catch the modification.
    let alice = X25519Identity::generate();
    let bob = X25519Identity::generate();
    let mut file = encrypt_to_vec(&[&alice.to_recipient(), &bob.to_recipient()], b"important");

    let text = String::from_utf8_lossy(&file);
    let second_stanza = text.match_indices("-> X25519 ").nth(1).expect("two stanzas").0;
    // Flip a bit inside the second stanza's argument.
    file[second_stanza + 12] ^= 0x01;

    match decrypt_to_vec(&[&alice], &file) {
        Err(DecryptError::HeaderMac) | Err(DecryptError::Header(_)) => {}
        result => panic!("Expected a header failure, got {:?}", result.is_ok()),
    }
}

#[test]
fn test_every_header_bit_flip_fails() {
    let identity = X25519Identity::generate();
    let file = encrypt_to_vec(&[&identity.to_recipient()], b"important");
    let header_len = header_length(&file);

    for byte in 0..header_len {
        for bit in 0..8 {
            let mut tampered = file.clone();
            tampered[byte] ^= 1 << bit;
            assert!(
                decrypt_to_vec(&[&identity], &tampered).is_err(),
                "bit {bit} of byte {byte} went undetected"
            );
        }
    }
}

#[test]
fn test_every_payload_byte_flip_fails() {
    let identity = X25519Identity::generate();
    let file = encrypt_to_vec(&[&identity.to_recipient()], b"important");
    let header_len = header_length(&file);

    // Flipping any payload byte (nonce, ciphertext, or tag) must fail no
    // later than the affected chunk.
    for byte in header_len..file.len() {
        let mut tampered = file.clone();
        tampered[byte] ^= 0x80;
        assert!(
            decrypt_to_vec(&[&identity], &tampered).is_err(),
            "payload byte {byte} went undetected"
        );
    }
}

#[test]
fn test_truncated_file_fails() {
    let identity = X25519Identity::generate();
    let file = encrypt_to_vec(&[&identity.to_recipient()], b"important");

    for cut in 0..file.len() {
        assert!(
            decrypt_to_vec(&[&identity], &file[..cut]).is_err(),
            "truncation at {cut} went undetected"
        );
    }
}

#[test]
fn test_appended_data_fails() {
    let identity = X25519Identity::generate();
    let mut file = encrypt_to_vec(&[&identity.to_recipient()], b"important");
    file.push(0x00);
    assert!(decrypt_to_vec(&[&identity], &file).is_err());
}
