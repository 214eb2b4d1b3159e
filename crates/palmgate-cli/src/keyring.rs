use palmgate_core::secret_service::{KeyProvider, SecretServiceKeyProvider, SERVICE_NAME};
use serde::Serialize;

use crate::errors::AppResult;

#[derive(Debug, Clone, Serialize)]
pub struct KeyringCheckSummary {
    pub user: String,
    pub service: String,
    pub template_key_present: bool,
}

pub fn run_keyring_check(user: Option<&str>) -> AppResult<KeyringCheckSummary> {
    let user = user.map_or_else(whoami::username, str::to_string);
    check_with(&SecretServiceKeyProvider, user)
}

/// Fails fast when templates for `user` could not be encrypted or decrypted.
pub fn require_secret_service(user: &str) -> AppResult<()> {
    SecretServiceKeyProvider.fetch(user).map(|_| ())
}

pub fn check_with<K: KeyProvider>(keys: &K, user: String) -> AppResult<KeyringCheckSummary> {
    let status = keys.fetch(&user)?;
    Ok(KeyringCheckSummary {
        template_key_present: status.is_present(),
        service: SERVICE_NAME.to_string(),
        user,
    })
}
