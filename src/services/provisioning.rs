//! Registration of federated users into backend tenants.
//!
//! A registration runs these steps strictly in order, against one backend
//! session opened for the request:
//!
//! 1. Apply the claims policy (denied affiliations, home organization present).
//!    Nothing touches the backend before this passes.
//! 2. Resolve the tenant named after the home organization, creating it when
//!    allowed and missing.
//! 3. Fetch the user and remember the email it has right now.
//! 4. Overwrite the user's note with the principal name and write it back.
//! 5. Add the user to the tenant using the email from step 3.
//!
//! Any backend failure ends the registration with the operation that failed.
//! Nothing is retried or rolled back; submitting the same registration again
//! converges on the same result.

use std::{fmt, sync::Arc};

use tracing::{debug, info, instrument, warn};

use super::tenant_locks::TenantLocks;
use crate::{
    backend::{BackendConnector, BackendError, BackendSession, TenantRef, UserId},
    claims::ClaimsRecord,
    config::ProvisioningConfig,
};

/// Result of a registration that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The user was annotated and linked to the tenant.
    Linked {
        user_id: UserId,
        tenant: TenantRef,
        /// Whether the tenant was created by this registration.
        created: bool,
    },
    /// No claims were supplied and they are optional; nothing was done.
    NoClaims { user_id: UserId },
}

impl fmt::Display for RegistrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationOutcome::Linked {
                user_id, tenant, ..
            } => write!(
                f,
                "user {user_id} added to organization {:?} ({})",
                tenant.name, tenant.id
            ),
            RegistrationOutcome::NoClaims { user_id } => {
                write!(f, "no claims supplied for user {user_id}, nothing to provision")
            }
        }
    }
}

/// Why the claims policy refused a registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyRejection {
    #[error("{}, affiliations: {}", denied_subject(.denied), .affiliations.join(", "))]
    DeniedAffiliation {
        denied: String,
        affiliations: Vec<String>,
    },

    #[error("schac_home_organization claim is missing or empty")]
    EmptyOrganization,

    #[error("organization not present in chirpstack: {0:?}")]
    UnknownOrganization(String),
}

fn denied_subject(denied: &str) -> String {
    if denied == "student" {
        "students cannot be automatically provisioned".to_string()
    } else {
        format!("users with affiliation {denied:?} cannot be automatically provisioned")
    }
}

/// Backend step a registration failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOperation {
    Connect,
    ListTenants,
    CreateTenant,
    FetchUser(UserId),
    UpdateUser,
    AddUserToTenant,
}

impl fmt::Display for BackendOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendOperation::Connect => f.write_str("dialing chirpstack"),
            BackendOperation::ListTenants => f.write_str("listing organizations"),
            BackendOperation::CreateTenant => f.write_str("creating organization"),
            BackendOperation::FetchUser(user_id) => {
                write!(f, "fetching user from chirpstack for userID {user_id}")
            }
            BackendOperation::UpdateUser => {
                f.write_str("updating user with eduperson_principal_name added to note-field")
            }
            BackendOperation::AddUserToTenant => f.write_str("adding user to organization"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error(transparent)]
    Rejected(#[from] PolicyRejection),

    #[error("{operation}: {source}")]
    Backend {
        operation: BackendOperation,
        #[source]
        source: BackendError,
    },
}

impl ProvisioningError {
    fn backend(operation: BackendOperation) -> impl FnOnce(BackendError) -> Self {
        move |source| ProvisioningError::Backend { operation, source }
    }

    /// Whether the caller, rather than the backend, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ProvisioningError::Rejected(_))
    }
}

pub type ProvisioningResult<T> = Result<T, ProvisioningError>;

/// Drives registrations against the backend.
pub struct ProvisioningService {
    connector: Arc<dyn BackendConnector>,
    config: ProvisioningConfig,
    tenant_locks: TenantLocks,
}

impl ProvisioningService {
    pub fn new(connector: Arc<dyn BackendConnector>, config: ProvisioningConfig) -> Self {
        Self {
            connector,
            config,
            tenant_locks: TenantLocks::new(),
        }
    }

    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    /// Register `user_id` into the tenant named by its claims.
    ///
    /// `claims` is `None` only when claims are optional and none were sent.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn register(
        &self,
        user_id: UserId,
        claims: Option<ClaimsRecord>,
    ) -> ProvisioningResult<RegistrationOutcome> {
        let Some(claims) = claims else {
            info!("No claims supplied, skipping provisioning");
            return Ok(RegistrationOutcome::NoClaims { user_id });
        };

        self.check_policy(&claims)?;

        let session = self
            .connector
            .connect()
            .await
            .map_err(ProvisioningError::backend(BackendOperation::Connect))?;

        let (tenant, created) = self
            .resolve_tenant(session.as_ref(), &claims.home_organization)
            .await?;

        let mut user = session
            .get_user(user_id)
            .await
            .map_err(ProvisioningError::backend(BackendOperation::FetchUser(user_id)))?;
        let email = user.email.clone();

        user.note = self.config.note_for(&claims.principal_name);
        session
            .update_user(&user)
            .await
            .map_err(ProvisioningError::backend(BackendOperation::UpdateUser))?;

        session
            .add_user_to_tenant(&tenant.id, &email)
            .await
            .map_err(ProvisioningError::backend(BackendOperation::AddUserToTenant))?;

        info!(
            tenant_id = %tenant.id,
            tenant = %tenant.name,
            created,
            "User provisioned"
        );

        Ok(RegistrationOutcome::Linked {
            user_id,
            tenant,
            created,
        })
    }

    fn check_policy(&self, claims: &ClaimsRecord) -> Result<(), PolicyRejection> {
        if let Some(denied) = claims.denied_affiliation(&self.config.denied_affiliations) {
            return Err(PolicyRejection::DeniedAffiliation {
                denied: denied.to_string(),
                affiliations: claims.affiliations.clone(),
            });
        }
        if !claims.has_home_organization() {
            return Err(PolicyRejection::EmptyOrganization);
        }
        Ok(())
    }

    /// Find the tenant named `name`, creating it if allowed.
    ///
    /// Returns the tenant and whether this call created it.
    async fn resolve_tenant(
        &self,
        session: &dyn BackendSession,
        name: &str,
    ) -> ProvisioningResult<(TenantRef, bool)> {
        let _guard = if self.config.serialize_tenant_creation {
            Some(self.tenant_locks.lock(name).await)
        } else {
            None
        };

        let page_size = self.connector.page_size();
        if let Some(tenant) = find_tenant(session, name, page_size).await? {
            debug!(tenant_id = %tenant.id, "Found existing organization");
            return Ok((tenant, false));
        }

        if !self.config.create_missing_tenants {
            return Err(PolicyRejection::UnknownOrganization(name.to_string()).into());
        }

        match session.create_tenant(name).await {
            Ok(tenant) => {
                info!(tenant_id = %tenant.id, tenant = %name, "Created organization");
                Ok((tenant, true))
            }
            Err(BackendError::Conflict(message)) => {
                warn!(tenant = %name, %message, "Organization created concurrently, looking it up again");
                match find_tenant(session, name, page_size).await? {
                    Some(tenant) => Ok((tenant, false)),
                    None => Err(ProvisioningError::Backend {
                        operation: BackendOperation::CreateTenant,
                        source: BackendError::Conflict(message),
                    }),
                }
            }
            Err(e) => Err(ProvisioningError::backend(BackendOperation::CreateTenant)(e)),
        }
    }
}

async fn find_tenant(
    session: &dyn BackendSession,
    name: &str,
    page_size: u32,
) -> ProvisioningResult<Option<TenantRef>> {
    session
        .find_tenant_by_name(name, page_size)
        .await
        .map_err(ProvisioningError::backend(BackendOperation::ListTenants))
}
