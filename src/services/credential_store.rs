//! OS-keyring persistence for wallet passwords
//!
//! Passwords survive process restarts in the platform credential store and
//! are loaded into the in-memory cache at startup. Nothing here touches
//! durable plaintext storage.

use tracing::{info, warn};

const KEYRING_SERVICE: &str = "autodca-backend";

#[derive(Debug)]
pub struct CredentialError(pub String);

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential store error: {}", self.0)
    }
}

impl std::error::Error for CredentialError {}

pub trait CredentialStore: Send + Sync {
    fn load(&self, owner_id: i64) -> Result<Option<String>, CredentialError>;
    fn save(&self, owner_id: i64, password: &str) -> Result<(), CredentialError>;
    fn delete(&self, owner_id: i64) -> Result<(), CredentialError>;
}

/// Platform keyring implementation
pub struct KeyringCredentialStore;

impl KeyringCredentialStore {
    fn entry(owner_id: i64) -> Result<keyring::Entry, CredentialError> {
        keyring::Entry::new(KEYRING_SERVICE, &format!("user_{}", owner_id))
            .map_err(|e| CredentialError(e.to_string()))
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self, owner_id: i64) -> Result<Option<String>, CredentialError> {
        match Self::entry(owner_id)?.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CredentialError(e.to_string())),
        }
    }

    fn save(&self, owner_id: i64, password: &str) -> Result<(), CredentialError> {
        Self::entry(owner_id)?
            .set_password(password)
            .map_err(|e| CredentialError(e.to_string()))?;
        info!(owner_id = owner_id, "Wallet password saved to keyring");
        Ok(())
    }

    fn delete(&self, owner_id: i64) -> Result<(), CredentialError> {
        match Self::entry(owner_id)?.delete_credential() {
            Ok(()) => Ok(()),
            // Nothing stored is fine
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => {
                warn!(owner_id = owner_id, error = %e, "Failed to delete keyring entry");
                Err(CredentialError(e.to_string()))
            }
        }
    }
}
