// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: ageseal — age-encryption.org/v1 file encryption.

//! Passphrase recipients and identities based on scrypt.
//!
//! A passphrase-encrypted file must have the scrypt stanza as its only
//! stanza; the encrypt driver enforces this. The work factor travels in the
//! header as log₂N, so the identity side caps it to bound the work an
//! attacker-supplied header can demand.

use rand_core::{OsRng, RngCore};
use scrypt::Params;
use zeroize::Zeroizing;

use crate::encoding::{base64_arg, base64_encode};
use crate::error::{EncryptError, UnwrapError};
use crate::format::Stanza;
use crate::recipients::{file_key_from_bytes, open_file_key, seal_file_key, Identity, Recipient};
use crate::FileKey;

const STANZA_TAG: &str = "scrypt";
const SALT_LABEL: &[u8] = b"age-encryption.org/v1/scrypt";
const SALT_SIZE: usize = 16;

/// Default log₂N for encryption.
pub const DEFAULT_WORK_FACTOR: u8 = 18;

/// Default log₂N cap for decryption through this API.
pub const DEFAULT_MAX_WORK_FACTOR: u8 = 30;

/// Suggested log₂N cap for interactive use, where a user is waiting on the
/// passphrase prompt.
pub const INTERACTIVE_MAX_WORK_FACTOR: u8 = 20;

fn derive_wrap_key(
    passphrase: &[u8],
    salt: &[u8; SALT_SIZE],
    log_n: u8,
) -> Result<[u8; 32], String> {
    let mut full_salt = Vec::with_capacity(SALT_LABEL.len() + SALT_SIZE);
    full_salt.extend_from_slice(SALT_LABEL);
    full_salt.extend_from_slice(salt);

    let params =
        Params::new(log_n, 8, 1, 32).map_err(|e| format!("invalid scrypt parameters: {e}"))?;
    let mut key = [0u8; 32];
    scrypt::scrypt(passphrase, &full_salt, &params, &mut key)
        .map_err(|e| format!("scrypt failed: {e}"))?;
    Ok(key)
}

/// Parse the log₂N argument: decimal, no sign, no leading zeros.
fn parse_work_factor(arg: &str) -> Result<u8, UnwrapError> {
    if arg.is_empty() || !arg.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UnwrapError::InvalidStanza(
            "scrypt work factor is not a decimal integer".into(),
        ));
    }
    if arg.starts_with('0') {
        return Err(UnwrapError::InvalidStanza(
            "scrypt work factor has a leading zero".into(),
        ));
    }
    arg.parse::<u8>().map_err(|_| {
        UnwrapError::InvalidStanza("scrypt work factor is out of range".into())
    })
}

/// A passphrase to encrypt a file to.
pub struct ScryptRecipient {
    passphrase: Zeroizing<String>,
    log_n: u8,
}

impl ScryptRecipient {
    /// Create a recipient with the default work factor.
    pub fn new(passphrase: &str) -> Self {
        ScryptRecipient {
            passphrase: Zeroizing::new(passphrase.to_string()),
            log_n: DEFAULT_WORK_FACTOR,
        }
    }

    /// Override the work factor (log₂N). Lower values are faster and
    /// weaker; tests commonly use 10.
    pub fn with_work_factor(mut self, log_n: u8) -> Self {
        self.log_n = log_n;
        self
    }
}

impl Recipient for ScryptRecipient {
    fn wrap(&self, file_key: &FileKey) -> Result<Vec<Stanza>, EncryptError> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        let mut key = derive_wrap_key(self.passphrase.as_bytes(), &salt, self.log_n)
            .map_err(EncryptError::Wrap)?;
        let body = seal_file_key(&mut key, file_key)?;

        Ok(vec![Stanza::new(
            STANZA_TAG,
            vec![base64_encode(&salt), self.log_n.to_string()],
            body,
        )])
    }
}

/// A passphrase to decrypt a file with.
pub struct ScryptIdentity {
    passphrase: Zeroizing<String>,
    max_log_n: u8,
}

impl ScryptIdentity {
    /// Create an identity with the default work-factor cap.
    pub fn new(passphrase: &str) -> Self {
        ScryptIdentity {
            passphrase: Zeroizing::new(passphrase.to_string()),
            max_log_n: DEFAULT_MAX_WORK_FACTOR,
        }
    }

    /// Cap the accepted work factor. Interactive callers should use
    /// [`INTERACTIVE_MAX_WORK_FACTOR`].
    pub fn with_max_work_factor(mut self, max_log_n: u8) -> Self {
        self.max_log_n = max_log_n;
        self
    }
}

impl Identity for ScryptIdentity {
    fn unwrap_stanza(&self, stanza: &Stanza) -> Result<FileKey, UnwrapError> {
        if stanza.tag != STANZA_TAG {
            return Err(UnwrapError::IncorrectIdentity);
        }
        if stanza.args.len() != 2 {
            return Err(UnwrapError::InvalidStanza(
                "scrypt stanza must have two arguments".into(),
            ));
        }
        let salt: [u8; SALT_SIZE] = base64_arg(&stanza.args[0]).ok_or_else(|| {
            UnwrapError::InvalidStanza("scrypt salt must be 16 bytes".into())
        })?;
        let log_n = parse_work_factor(&stanza.args[1])?;
        // An oversized work factor is a header failure, not a wrong
        // passphrase: it rejects before any KDF work is done.
        if log_n > self.max_log_n {
            return Err(UnwrapError::InvalidStanza(format!(
                "scrypt work factor {log_n} exceeds the maximum {}",
                self.max_log_n
            )));
        }

        let mut key = derive_wrap_key(self.passphrase.as_bytes(), &salt, log_n)
            .map_err(UnwrapError::InvalidStanza)?;
        // A failed opening means the passphrase is wrong.
        let plaintext = open_file_key(&mut key, &stanza.body)
            .ok_or(UnwrapError::IncorrectIdentity)?;
        file_key_from_bytes(plaintext)
    }
}
