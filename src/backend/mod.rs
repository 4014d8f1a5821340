//! Client facade over the device-management backend (ChirpStack).
//!
//! The provisioning flow only needs five operations, so that is all this
//! module exposes. A [`BackendConnector`] opens one authenticated
//! [`BackendSession`] per registration request; the session, and with it the
//! connection and its credential, is released when it is dropped.
//!
//! - [`client`]: the HTTP implementation against ChirpStack's REST gateway
//! - [`credentials`]: per-connection bearer credentials

pub mod client;
pub mod credentials;
#[cfg(test)]
pub(crate) mod test_utils;

use std::fmt;

use async_trait::async_trait;
use http::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};

pub use client::{HttpBackendConnector, HttpBackendSession};
pub use credentials::Credential;

/// Identifier of a user account in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(UserId)
    }
}

/// Opaque tenant (organization) identifier.
///
/// ChirpStack encodes its 64-bit ids as JSON strings; plain numbers are accepted too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_id(deserializer).map(TenantId)
    }
}

/// Accept an identifier encoded either as a JSON string or a JSON integer.
pub(crate) fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Text(s) => Ok(s),
        RawId::Signed(n) => Ok(n.to_string()),
        RawId::Unsigned(n) => Ok(n.to_string()),
    }
}

/// A tenant as seen by the provisioning flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantRef {
    pub id: TenantId,
    /// Human-facing name, matched exactly against the home organization.
    pub name: String,
}

/// One page of a tenant listing.
#[derive(Debug, Clone, Default)]
pub struct TenantPage {
    pub tenants: Vec<TenantRef>,
    /// Total number of tenants the backend reports, when it does.
    pub total: Option<u64>,
}

/// A user account.
///
/// Fields the provisioning flow does not touch are carried in `extra` and
/// written back unchanged on update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub note: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Errors returned by backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("connecting to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("authentication rejected: {0}")]
    Unauthenticated(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("backend returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Opens authenticated sessions against the backend.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Dial the backend and obtain a credential for this session.
    ///
    /// With login-based authentication this performs the login round-trip.
    async fn connect(&self) -> BackendResult<Box<dyn BackendSession>>;

    /// Page size used when searching tenants by name.
    fn page_size(&self) -> u32;
}

/// An authenticated connection to the backend, scoped to one request.
///
/// Every method is a single round-trip and may fail independently.
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// List up to `limit` tenants starting at `offset`.
    async fn list_tenants(&self, limit: u32, offset: u64) -> BackendResult<TenantPage>;

    /// Create a tenant with the given name.
    async fn create_tenant(&self, name: &str) -> BackendResult<TenantRef>;

    /// Fetch a user. Fails with [`BackendError::NotFound`] for unknown ids.
    async fn get_user(&self, user_id: UserId) -> BackendResult<UserRecord>;

    /// Write a user record back.
    async fn update_user(&self, user: &UserRecord) -> BackendResult<()>;

    /// Add the user with `email` to the tenant.
    async fn add_user_to_tenant(&self, tenant_id: &TenantId, email: &str) -> BackendResult<()>;

    /// Find a tenant whose name equals `name` exactly, paging through the
    /// full listing until a match is found or the listing is exhausted.
    async fn find_tenant_by_name(
        &self,
        name: &str,
        page_size: u32,
    ) -> BackendResult<Option<TenantRef>> {
        let page_size = page_size.max(1);
        let mut offset: u64 = 0;

        loop {
            let page = self.list_tenants(page_size, offset).await?;
            let fetched = page.tenants.len() as u64;

            if let Some(found) = page.tenants.into_iter().find(|t| t.name == name) {
                return Ok(Some(found));
            }

            offset += fetched;
            let exhausted = match page.total {
                Some(total) => offset >= total,
                None => fetched < u64::from(page_size),
            };
            if fetched == 0 || exhausted {
                return Ok(None);
            }
        }
    }
}
