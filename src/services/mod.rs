pub mod decryptor;
pub mod directory;
pub mod tenant_error;
pub mod tenant_resolver;

pub use decryptor::{CredentialError, SecretDecryptor};
pub use directory::{CredentialRecord, DirectoryClient, DirectoryError, HttpDirectoryClient, Password, TenantLookup};
pub use tenant_error::{ResolutionError, TenantError};
pub use tenant_resolver::{TenantIdentity, TenantResolver};
