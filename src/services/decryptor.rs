use fernet::Fernet;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("DB_ENCRYPTION_KEY is not configured")]
    MissingKey,

    #[error("DB_ENCRYPTION_KEY is not a valid Fernet key")]
    InvalidKey,

    /// Carries only the ciphertext length and fingerprint
    #[error("failed to decrypt DB password (len={len}, sha256={fingerprint})")]
    Decrypt { len: usize, fingerprint: String },
}

/// First 12 hex characters of the SHA-256 of `data`
pub fn fingerprint(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().take(6).map(|b| format!("{:02x}", b)).collect()
}

/// Decrypts tenant database passwords issued by the accounts service
pub struct SecretDecryptor {
    fernet: Fernet,
}

impl SecretDecryptor {
    /// Fails when the key is absent or malformed, so startup can abort early
    pub fn from_key(key: Option<&str>) -> Result<Self, CredentialError> {
        let key = key.map(str::trim).filter(|k| !k.is_empty()).ok_or(CredentialError::MissingKey)?;
        let fernet = Fernet::new(key).ok_or(CredentialError::InvalidKey)?;
        Ok(Self { fernet })
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CredentialError> {
        let ciphertext = ciphertext.trim();
        let failure = || CredentialError::Decrypt {
            len: ciphertext.len(),
            fingerprint: fingerprint(ciphertext.as_bytes()),
        };
        debug!("Decrypting DB password (len={})", ciphertext.len());

        let bytes = self.fernet.decrypt(ciphertext).map_err(|_| {
            let err = failure();
            warn!("{}", err);
            err
        })?;
        let plain = String::from_utf8(bytes).map_err(|_| {
            let err = failure();
            warn!("{} (plaintext is not UTF-8)", err);
            err
        })?;

        debug!("Decryption successful");
        Ok(plain)
    }
}
