//! Per-user AES-256-GCM keys for template stores, kept in the OS keyring.
//!
//! Each successful enrollment writes the new template with a freshly generated
//! key and only then replaces the keyring entry. Removal and verification read
//! the current key and never rotate it.

use base64::{engine::general_purpose, Engine as _};
use keyring::{error::Error as KeyringError, Entry};
use rand::{rngs::OsRng, RngCore};

use crate::errors::{AppError, AppResult};

pub const SERVICE_NAME: &str = "palmgate";
pub const TEMPLATE_KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateKey(Vec<u8>);

impl TemplateKey {
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; TEMPLATE_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(user: &str, bytes: Vec<u8>) -> AppResult<Self> {
        if bytes.len() != TEMPLATE_KEY_LEN {
            return Err(AppError::SecretServiceKeyInvalid {
                user: user.to_string(),
                message: format!(
                    "expected {TEMPLATE_KEY_LEN} bytes but found {}",
                    bytes.len()
                ),
            });
        }
        Ok(Self(bytes))
    }

    /// Parses a keyring secret; padded and unpadded base64 are both accepted.
    pub fn decode(user: &str, secret: &str) -> AppResult<Self> {
        let trimmed = secret.trim();
        if trimmed.is_empty() {
            return Err(AppError::SecretServiceKeyInvalid {
                user: user.to_string(),
                message: "stored secret was empty".into(),
            });
        }
        let bytes = general_purpose::STANDARD
            .decode(trimmed)
            .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(trimmed))
            .map_err(|err| AppError::SecretServiceKeyInvalid {
                user: user.to_string(),
                message: format!("base64 decode failed: {err}"),
            })?;
        Self::from_bytes(user, bytes)
    }

    pub fn encode(&self) -> String {
        general_purpose::STANDARD.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

#[derive(Debug, Clone)]
pub enum TemplateKeyStatus {
    Present(TemplateKey),
    /// Nothing enrolled yet, or the template was written unencrypted.
    Missing,
}

impl TemplateKeyStatus {
    pub fn is_present(&self) -> bool {
        matches!(self, TemplateKeyStatus::Present(_))
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            TemplateKeyStatus::Present(key) => Some(key.into_bytes()),
            TemplateKeyStatus::Missing => None,
        }
    }
}

/// Where template keys live. Injected into enrollment, removal and
/// verification so tests can run without a keyring.
pub trait KeyProvider {
    fn fetch(&self, user: &str) -> AppResult<TemplateKeyStatus>;
    fn store(&self, user: &str, key: &TemplateKey) -> AppResult<()>;

    fn generate(&self) -> TemplateKey {
        TemplateKey::generate()
    }

    /// Raw bytes of the key the user's store is currently encrypted with.
    fn current_key(&self, user: &str) -> AppResult<Option<Vec<u8>>> {
        Ok(self.fetch(user)?.into_bytes())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SecretServiceKeyProvider;

impl KeyProvider for SecretServiceKeyProvider {
    fn fetch(&self, user: &str) -> AppResult<TemplateKeyStatus> {
        match keyring_entry(user)?.get_password() {
            Ok(secret) => TemplateKey::decode(user, &secret).map(TemplateKeyStatus::Present),
            Err(KeyringError::NoEntry) => Ok(TemplateKeyStatus::Missing),
            Err(err) => Err(unavailable(user, &err)),
        }
    }

    fn store(&self, user: &str, key: &TemplateKey) -> AppResult<()> {
        keyring_entry(user)?
            .set_password(&key.encode())
            .map_err(|err| unavailable(user, &err))
    }
}

fn keyring_entry(user: &str) -> AppResult<Entry> {
    Entry::new(SERVICE_NAME, user).map_err(|err| unavailable(user, &err))
}

fn unavailable(user: &str, err: &KeyringError) -> AppError {
    let message = match err {
        KeyringError::NoStorageAccess(inner) => format!("keyring locked or unreachable: {inner}"),
        KeyringError::PlatformFailure(inner) => format!("keyring platform failure: {inner}"),
        KeyringError::Ambiguous(items) => {
            format!("{} keyring entries match the template key", items.len())
        }
        KeyringError::BadEncoding(_) => "stored template key is not valid UTF-8".into(),
        other => other.to_string(),
    };
    AppError::SecretServiceUnavailable {
        user: user.to_string(),
        service: SERVICE_NAME.to_string(),
        message,
    }
}
