//! Credential vault — AES-256-GCM with a process-wide 32-byte key.
//!
//! Every call draws a fresh 96-bit nonce, so sealing the same plaintext
//! twice yields different ciphertext. The stored form is
//! `base64(nonce):base64(tag):base64(payload)`.
//!
//! Plaintext credentials only exist inside `Credentials`, which is
//! zeroized on drop.

pub mod store;

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::VaultError;
use crate::model::{Credentials, EncryptedCredentials};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const DELIMITER: char = ':';

pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// Build a vault from raw key bytes. Fails closed on a missing or
    /// mis-sized key.
    pub fn new(key: &[u8]) -> Result<Self, VaultError> {
        if key.is_empty() {
            return Err(VaultError::MissingKey);
        }
        if key.len() != KEY_LEN {
            return Err(VaultError::InvalidKeyLength(key.len()));
        }
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| VaultError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    /// Build a vault from a hex-encoded key (64 hex chars).
    pub fn from_hex(key_hex: &str) -> Result<Self, VaultError> {
        let trimmed = key_hex.trim();
        if trimmed.is_empty() {
            return Err(VaultError::MissingKey);
        }
        let mut key = hex::decode(trimmed).map_err(|_| VaultError::InvalidKeyEncoding)?;
        let vault = Self::new(&key);
        key.zeroize();
        vault
    }

    /// Encrypt a plaintext string into the three-part stored form.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Encryption)?;

        // aes-gcm appends the tag to the payload
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}{DELIMITER}{}{DELIMITER}{}",
            STANDARD.encode(nonce_bytes),
            STANDARD.encode(tag),
            STANDARD.encode(&sealed),
        ))
    }

    /// Decrypt a value produced by `encrypt`.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, VaultError> {
        let parts: Vec<&str> = ciphertext.split(DELIMITER).collect();
        if parts.len() != 3 {
            return Err(VaultError::Malformed(format!(
                "expected 3 parts, found {}",
                parts.len()
            )));
        }

        let decode = |label: &str, part: &str| {
            STANDARD
                .decode(part)
                .map_err(|e| VaultError::Malformed(format!("{label} is not valid base64: {e}")))
        };
        let nonce_bytes = decode("nonce", parts[0])?;
        let tag = decode("tag", parts[1])?;
        let mut payload = decode("payload", parts[2])?;

        if nonce_bytes.len() != NONCE_LEN {
            return Err(VaultError::Malformed(format!(
                "nonce must be {NONCE_LEN} bytes, found {}",
                nonce_bytes.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(VaultError::Malformed(format!(
                "tag must be {TAG_LEN} bytes, found {}",
                tag.len()
            )));
        }

        payload.extend_from_slice(&tag);
        let mut plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), payload.as_slice())
            .map_err(|_| VaultError::Decryption)?;

        let result = String::from_utf8(plaintext.clone()).map_err(|_| VaultError::InvalidUtf8);
        plaintext.zeroize();
        result
    }

    /// Encrypt every present credential field for storage.
    pub fn seal(&self, creds: &Credentials) -> Result<EncryptedCredentials, VaultError> {
        let seal = |v: &Option<String>| v.as_deref().map(|s| self.encrypt(s)).transpose();
        Ok(EncryptedCredentials {
            api_key: seal(&creds.api_key)?,
            token: seal(&creds.token)?,
            account_sid: seal(&creds.account_sid)?,
            auth_token: seal(&creds.auth_token)?,
        })
    }

    /// Decrypt stored credentials for a single call. A corrupt field is an
    /// error, never "no credentials".
    pub fn open(&self, sealed: &EncryptedCredentials) -> Result<Credentials, VaultError> {
        let open = |v: &Option<String>| v.as_deref().map(|s| self.decrypt(s)).transpose();
        Ok(Credentials {
            api_key: open(&sealed.api_key)?,
            token: open(&sealed.token)?,
            account_sid: open(&sealed.account_sid)?,
            auth_token: open(&sealed.auth_token)?,
        })
    }
}
