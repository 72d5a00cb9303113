//! Wallet keystore management and transient signing
//!
//! One encrypted keystore file per owner (standard Ethereum JSON format),
//! usable across every supported chain. Decryption happens inside a single
//! signing operation: the private key is materialized from the keystore,
//! handed to alloy as an [`EthereumWallet`] for one broadcast, and dropped
//! on every exit path (the underlying secret zeroizes on drop). Raw key
//! material is never returned to callers, logged, or cached.

use alloy::network::EthereumWallet;
use alloy::signers::local::PrivateKeySigner;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub enum SignerError {
    /// No keystore file registered for this owner
    WalletNotConfigured(i64),
    /// No password cached in memory for this owner
    PasswordUnavailable(i64),
    /// Keystore decryption failed (wrong password or corrupt file)
    InvalidPassword(String),
    Io(String),
    InvalidKeystore(String),
}

impl std::fmt::Display for SignerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignerError::WalletNotConfigured(owner) => {
                write!(f, "No wallet configured for owner {}", owner)
            }
            SignerError::PasswordUnavailable(owner) => write!(
                f,
                "Wallet password for owner {} is not available; set it up again",
                owner
            ),
            SignerError::InvalidPassword(msg) => {
                write!(f, "Incorrect wallet password or invalid keystore: {}", msg)
            }
            SignerError::Io(msg) => write!(f, "Keystore I/O error: {}", msg),
            SignerError::InvalidKeystore(msg) => write!(f, "Invalid keystore: {}", msg),
        }
    }
}

impl std::error::Error for SignerError {}

/// Process-wide in-memory password cache, keyed by owner id
///
/// Populated at startup from the credential store and by explicit setup;
/// cleared on wallet deletion. Never written to durable storage.
#[derive(Clone, Default)]
pub struct PasswordCache {
    inner: Arc<RwLock<HashMap<i64, String>>>,
}

impl PasswordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, owner_id: i64, password: String) {
        self.inner.write().insert(owner_id, password);
    }

    pub fn get(&self, owner_id: i64) -> Option<String> {
        self.inner.read().get(&owner_id).cloned()
    }

    pub fn clear(&self, owner_id: i64) {
        self.inner.write().remove(&owner_id);
    }

    pub fn contains(&self, owner_id: i64) -> bool {
        self.inner.read().contains_key(&owner_id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Keystore-backed signer gateway
pub struct KeystoreSigner {
    keystore_dir: PathBuf,
    passwords: PasswordCache,
}

impl KeystoreSigner {
    pub fn new(keystore_dir: impl Into<PathBuf>, passwords: PasswordCache) -> Self {
        Self {
            keystore_dir: keystore_dir.into(),
            passwords,
        }
    }

    pub fn passwords(&self) -> &PasswordCache {
        &self.passwords
    }

    /// Keystore file location for an owner (single wallet, not per-network)
    pub fn keystore_path(&self, owner_id: i64) -> PathBuf {
        self.keystore_dir
            .join(format!("user_{}_wallet.json", owner_id))
    }

    pub fn keystore_exists(&self, owner_id: i64) -> bool {
        self.keystore_path(owner_id).exists()
    }

    /// Produce a transient signing wallet for one broadcast. The decrypted
    /// key lives only in the returned wallet, which the caller drops at the
    /// end of the signing call.
    pub fn wallet_for(&self, owner_id: i64) -> Result<EthereumWallet, SignerError> {
        let signer = self.signer_for(owner_id)?;
        Ok(EthereumWallet::from(signer))
    }

    fn signer_for(&self, owner_id: i64) -> Result<PrivateKeySigner, SignerError> {
        let path = self.keystore_path(owner_id);
        if !path.exists() {
            return Err(SignerError::WalletNotConfigured(owner_id));
        }
        let password = self
            .passwords
            .get(owner_id)
            .ok_or(SignerError::PasswordUnavailable(owner_id))?;

        PrivateKeySigner::decrypt_keystore(&path, password)
            .map_err(|e| SignerError::InvalidPassword(e.to_string()))
    }

    /// Verify a password against the owner's keystore without keeping any
    /// key material around.
    pub fn verify_password(&self, owner_id: i64, password: &str) -> Result<(), SignerError> {
        let path = self.keystore_path(owner_id);
        if !path.exists() {
            return Err(SignerError::WalletNotConfigured(owner_id));
        }
        PrivateKeySigner::decrypt_keystore(&path, password)
            .map(|_| ())
            .map_err(|e| SignerError::InvalidPassword(e.to_string()))
    }

    /// Persist a keystore JSON for an owner with restrictive permissions.
    /// Returns the checksummed address stored in the keystore.
    pub fn save_keystore(
        &self,
        owner_id: i64,
        keystore: &serde_json::Value,
    ) -> Result<String, SignerError> {
        let address = keystore_address(keystore)?;
        std::fs::create_dir_all(&self.keystore_dir).map_err(|e| SignerError::Io(e.to_string()))?;
        let path = self.keystore_path(owner_id);
        std::fs::write(&path, serde_json::to_vec_pretty(keystore).unwrap_or_default())
            .map_err(|e| SignerError::Io(e.to_string()))?;
        restrict_permissions(&path)?;
        info!(owner_id = owner_id, path = %path.display(), "Keystore saved");
        Ok(address)
    }

    /// Remove an owner's keystore file and forget the cached password.
    pub fn delete_keystore(&self, owner_id: i64) -> Result<bool, SignerError> {
        self.passwords.clear(owner_id);
        let path = self.keystore_path(owner_id);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path).map_err(|e| SignerError::Io(e.to_string()))?;
        info!(owner_id = owner_id, "Keystore deleted");
        Ok(true)
    }
}

/// Extract the checksummed address from a keystore JSON (no password needed)
pub fn keystore_address(keystore: &serde_json::Value) -> Result<String, SignerError> {
    let raw = keystore
        .get("address")
        .and_then(|a| a.as_str())
        .ok_or_else(|| SignerError::InvalidKeystore("no address field".to_string()))?;
    let with_prefix = if raw.starts_with("0x") {
        raw.to_string()
    } else {
        format!("0x{}", raw)
    };
    let parsed: alloy::primitives::Address = with_prefix
        .parse()
        .map_err(|e| SignerError::InvalidKeystore(format!("bad address field: {}", e)))?;
    Ok(parsed.to_checksum(None))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), SignerError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| SignerError::Io(e.to_string()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), SignerError> {
    tracing::warn!("Keystore permission restriction is a no-op on this platform");
    Ok(())
}
