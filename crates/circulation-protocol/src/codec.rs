// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sealed envelope encoding.
//!
//! Wire format:
//!
//! ```text
//! base64(nonce || AES-256-GCM ciphertext) "|" base64(HMAC-SHA256(<first part>))
//! ```
//!
//! The HMAC is computed over the base64 text of the first part. The plaintext
//! is a pipe-joined record: `OP|branch|user|book` for commands and
//! `OK|message` / `ERR|message` for results.
//!
//! Opening verifies the HMAC in constant time before anything is decrypted, so
//! a tampered message is always reported as [`CodecError::Authentication`].

use std::fmt;

use aes_gcm::{Aes256Gcm, Key, Nonce};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tracing::warn;

use crate::envelope::{CommandResult, Envelope, Operation};
use crate::settings::{Properties, SettingsError};

type HmacSha256 = Hmac<Sha256>;

/// Field separator inside the plaintext and between ciphertext and MAC.
pub const DELIMITER: char = '|';

const NONCE_LEN: usize = 12;

pub const DEFAULT_ENCRYPTION_SECRET: &str = "circulation-placeholder-encryption-key";
pub const DEFAULT_SHARED_SECRET: &str = "circulation-placeholder-shared-secret";
pub const DEFAULT_SALT: &str = "circulation-default-salt-2025";
pub const DEFAULT_PBKDF2_ROUNDS: u32 = 200_000;

/// Envelope encoding/decoding failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Structurally invalid message (bad delimiter layout, arity, encoding).
    #[error("malformed envelope: {0}")]
    Format(String),

    /// MAC mismatch or failed decryption; the message is treated as tampered.
    #[error("envelope authentication failed")]
    Authentication,

    /// Operation name outside LOAN/RETURN/RENEW.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),
}

/// Shared secrets used to derive the codec keys.
#[derive(Clone)]
pub struct CodecKeys {
    encryption_secret: String,
    shared_secret: String,
    salt: String,
    rounds: u32,
}

impl CodecKeys {
    pub fn new(encryption_secret: impl Into<String>, shared_secret: impl Into<String>) -> Self {
        Self {
            encryption_secret: encryption_secret.into(),
            shared_secret: shared_secret.into(),
            salt: DEFAULT_SALT.to_string(),
            rounds: DEFAULT_PBKDF2_ROUNDS,
        }
    }

    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = salt.into();
        self
    }

    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds.max(1);
        self
    }

    /// Resolve keys from environment, then properties, then placeholders.
    ///
    /// - `CIRCULATION_ENCRYPTION_KEY` / `circulation.encryption.key`
    /// - `CIRCULATION_SHARED_SECRET` / `circulation.shared.secret`
    /// - `CIRCULATION_KEY_SALT` / `circulation.key.salt`
    /// - `CIRCULATION_PBKDF2_ROUNDS` / `circulation.pbkdf2.rounds`
    pub fn resolve(props: &Properties) -> Result<Self, SettingsError> {
        let keys = Self::new(
            props.resolve(
                "CIRCULATION_ENCRYPTION_KEY",
                "circulation.encryption.key",
                DEFAULT_ENCRYPTION_SECRET,
            ),
            props.resolve(
                "CIRCULATION_SHARED_SECRET",
                "circulation.shared.secret",
                DEFAULT_SHARED_SECRET,
            ),
        )
        .with_salt(props.resolve(
            "CIRCULATION_KEY_SALT",
            "circulation.key.salt",
            DEFAULT_SALT,
        ))
        .with_rounds(props.resolve_parsed(
            "CIRCULATION_PBKDF2_ROUNDS",
            "circulation.pbkdf2.rounds",
            DEFAULT_PBKDF2_ROUNDS,
        )?);

        if keys.uses_default_secrets() {
            warn!("envelope keys fall back to built-in placeholders; configure real secrets");
        }
        Ok(keys)
    }

    pub fn uses_default_secrets(&self) -> bool {
        self.encryption_secret == DEFAULT_ENCRYPTION_SECRET
            || self.shared_secret == DEFAULT_SHARED_SECRET
    }
}

impl fmt::Debug for CodecKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecKeys")
            .field("encryption_secret", &"<redacted>")
            .field("shared_secret", &"<redacted>")
            .field("salt", &self.salt)
            .field("rounds", &self.rounds)
            .finish()
    }
}

/// Seals and opens envelopes with derived keys.
#[derive(Clone)]
pub struct EnvelopeCodec {
    cipher: Aes256Gcm,
    mac_key: Vec<u8>,
}

impl fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeCodec").finish_non_exhaustive()
    }
}

impl EnvelopeCodec {
    /// Derive the AES key with PBKDF2-HMAC-SHA256; the MAC key is the shared secret.
    pub fn new(keys: &CodecKeys) -> Self {
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            keys.encryption_secret.as_bytes(),
            keys.salt.as_bytes(),
            keys.rounds,
            &mut key,
        );
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
            mac_key: keys.shared_secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, CodecError> {
        <HmacSha256 as Mac>::new_from_slice(&self.mac_key)
            .map_err(|e| CodecError::Encryption(e.to_string()))
    }

    /// Encrypt and sign an arbitrary plaintext record.
    pub fn seal(&self, plaintext: &str) -> Result<String, CodecError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CodecError::Encryption(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        let body = BASE64.encode(combined);

        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        let tag = BASE64.encode(mac.finalize().into_bytes());

        Ok(format!("{body}{DELIMITER}{tag}"))
    }

    /// Verify and decrypt a sealed record.
    pub fn open(&self, wire: &str) -> Result<String, CodecError> {
        let (body, tag) = wire
            .rsplit_once(DELIMITER)
            .ok_or_else(|| CodecError::Format("missing MAC delimiter".to_string()))?;

        let tag = BASE64
            .decode(tag)
            .map_err(|_| CodecError::Authentication)?;
        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        mac.verify_slice(&tag)
            .map_err(|_| CodecError::Authentication)?;

        let combined = BASE64
            .decode(body)
            .map_err(|e| CodecError::Format(format!("ciphertext is not base64: {e}")))?;
        if combined.len() < NONCE_LEN {
            return Err(CodecError::Format("ciphertext shorter than nonce".to_string()));
        }
        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CodecError::Authentication)?;

        String::from_utf8(plaintext)
            .map_err(|_| CodecError::Format("plaintext is not UTF-8".to_string()))
    }

    pub fn encode_envelope(&self, envelope: &Envelope) -> Result<String, CodecError> {
        let fields = [
            envelope.branch_id.as_str(),
            envelope.user_id.as_str(),
            envelope.book_code.as_str(),
        ];
        if fields.iter().any(|f| f.contains(DELIMITER)) {
            return Err(CodecError::Format(format!(
                "envelope fields may not contain '{DELIMITER}'"
            )));
        }
        let record = format!(
            "{}{d}{}{d}{}{d}{}",
            envelope.operation.as_str(),
            envelope.branch_id,
            envelope.user_id,
            envelope.book_code,
            d = DELIMITER
        );
        self.seal(&record)
    }

    pub fn decode_envelope(&self, wire: &str) -> Result<Envelope, CodecError> {
        let record = self.open(wire)?;
        let fields: Vec<&str> = record.split(DELIMITER).collect();
        let [op, branch_id, user_id, book_code] = fields.as_slice() else {
            return Err(CodecError::Format(format!(
                "expected 4 fields, got {}",
                fields.len()
            )));
        };
        let operation: Operation = op.parse()?;
        Ok(Envelope::new(operation, *branch_id, *user_id, *book_code))
    }

    pub fn encode_result(&self, result: &CommandResult) -> Result<String, CodecError> {
        self.seal(&format!("{}{DELIMITER}{}", result.status_tag(), result.message))
    }

    pub fn decode_result(&self, wire: &str) -> Result<CommandResult, CodecError> {
        let record = self.open(wire)?;
        let (status, message) = record
            .split_once(DELIMITER)
            .ok_or_else(|| CodecError::Format("result has no status field".to_string()))?;
        match status {
            "OK" => Ok(CommandResult::success(message)),
            "ERR" => Ok(CommandResult::failure(message)),
            other => Err(CodecError::Format(format!("unknown result status '{other}'"))),
        }
    }
}
