use thiserror::Error;

use crate::database::probe::ProbeError;
use crate::database::registry::RegistryError;
use crate::services::decryptor::CredentialError;
use crate::services::directory::DirectoryError;

/// Failure while turning a tenant identifier into a usable database
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("tenant database unreachable: {0}")]
    Unreachable(#[from] ProbeError),
}

impl ResolutionError {
    /// Machine-readable kind reported to API clients
    pub fn kind(&self) -> &'static str {
        match self {
            ResolutionError::Directory(_) => "directory_error",
            ResolutionError::Credential(_) => "credential_error",
            ResolutionError::Unreachable(_) => "tenant_unreachable",
        }
    }
}

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Tenant resolution failed: {0}")]
    ResolutionFailed(#[from] ResolutionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("No tenant is active for this request")]
    NoActiveTenant,
}

impl TenantError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, TenantError::ResolutionFailed(ResolutionError::Unreachable(_)))
    }
}

impl From<DirectoryError> for TenantError {
    fn from(err: DirectoryError) -> Self {
        TenantError::ResolutionFailed(err.into())
    }
}

impl From<CredentialError> for TenantError {
    fn from(err: CredentialError) -> Self {
        TenantError::ResolutionFailed(err.into())
    }
}

impl From<ProbeError> for TenantError {
    fn from(err: ProbeError) -> Self {
        TenantError::ResolutionFailed(err.into())
    }
}
