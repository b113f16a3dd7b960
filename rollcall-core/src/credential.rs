use crate::store::{RecordStore, StorageError};
use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use thiserror::Error;

/// The fixed username of the single administrative account
pub const ADMIN_USERNAME: &str = "admin";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("No admin credential has been provisioned")]
    NotProvisioned,
    #[error("Stored password hash is invalid: {0}")]
    InvalidHash(String),
}

/// Stored administrative credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCredential {
    pub username: String,
    /// Salted hash in PHC string format
    pub password_hash: String,
    pub email: String,
}

/// One-shot password check guarding the attendance export
pub struct CredentialGate<'a> {
    store: &'a RecordStore,
}

impl<'a> CredentialGate<'a> {
    pub fn new(store: &'a RecordStore) -> Self {
        Self { store }
    }

    /// Check `password` against the stored admin hash
    pub fn verify(&self, password: &str) -> Result<bool, CredentialError> {
        let credential = self
            .store
            .find_admin(ADMIN_USERNAME)?
            .ok_or(CredentialError::NotProvisioned)?;

        let hash = PasswordHash::new(&credential.password_hash)
            .map_err(|e| CredentialError::InvalidHash(e.to_string()))?;

        let verified = Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok();

        if verified {
            log::info!("Admin password verified");
        } else {
            log::warn!("Admin password rejected");
        }
        Ok(verified)
    }
}
