pub mod connection;
pub mod context;
pub mod probe;
pub mod registry;

pub use connection::{TenantConnection, TenantDatabase};
pub use context::{ActiveTenant, TenantContext, TenantScope};
pub use probe::{ConnectivityProbe, PgProbe, ProbeError};
pub use registry::{AliasRegistry, RegistryError};
