mod provisioning;
mod tenant_locks;

pub use provisioning::{
    BackendOperation, PolicyRejection, ProvisioningError, ProvisioningResult,
    ProvisioningService, RegistrationOutcome,
};
pub use tenant_locks::{TenantLockGuard, TenantLocks};
