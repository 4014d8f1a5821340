//! HTTP client for the ChirpStack v3 REST gateway.
//!
//! Endpoints used:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | login | `POST /api/internal/login` |
//! | list tenants | `GET /api/organizations?limit=&offset=` |
//! | create tenant | `POST /api/organizations` |
//! | get user | `GET /api/users/{id}` |
//! | update user | `PUT /api/users/{id}` |
//! | add user to tenant | `POST /api/organizations/{id}/users` |
//!
//! 64-bit identifiers travel as JSON strings. Errors come back as
//! `{"error": ..., "code": ..., "message": ...}` with the HTTP status mapped
//! from the gRPC status code.

use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderName, StatusCode};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

use super::{
    BackendConnector, BackendError, BackendResult, BackendSession, Credential, TenantId,
    TenantPage, TenantRef, UserId, UserRecord, deserialize_id,
};
use crate::config::{BackendAuthConfig, BackendConfig, ConfigError};

/// Opens sessions against a ChirpStack REST gateway.
///
/// Each [`connect`](BackendConnector::connect) builds a fresh HTTP client, so
/// no connection or credential outlives the session that created it.
#[derive(Clone)]
pub struct HttpBackendConnector {
    address: String,
    base_url: Url,
    auth: BackendAuthConfig,
    auth_header: HeaderName,
    connect_timeout: Duration,
    request_timeout: Duration,
    page_size: u32,
}

impl HttpBackendConnector {
    pub fn from_config(config: &BackendConfig) -> Result<Self, ConfigError> {
        let auth_header = HeaderName::from_bytes(config.auth_header.as_bytes()).map_err(|e| {
            ConfigError::Validation(format!(
                "backend.auth_header '{}' is invalid: {e}",
                config.auth_header
            ))
        })?;

        Ok(Self {
            address: config.address.clone(),
            base_url: config.base_url()?,
            auth: config.auth.clone(),
            auth_header,
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            page_size: config.page_size,
        })
    }

    #[instrument(name = "backend.login", skip_all, fields(address = %self.address))]
    async fn login(
        &self,
        http_client: &Client,
        username: &str,
        password: &str,
    ) -> BackendResult<Credential> {
        let url = endpoint(&self.base_url, &["api", "internal", "login"])?;
        let body = LoginRequest {
            email: username,
            password,
        };

        let response = http_client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| connect_error(&self.address, e))?;

        let login: LoginResponse = decode_json(check_status(response).await?).await?;
        if login.jwt.is_empty() {
            return Err(BackendError::Unauthenticated(
                "login returned an empty token".into(),
            ));
        }

        debug!("Logged in to backend");
        Credential::bearer(self.auth_header.clone(), &login.jwt)
    }
}

#[async_trait]
impl BackendConnector for HttpBackendConnector {
    async fn connect(&self) -> BackendResult<Box<dyn BackendSession>> {
        let http_client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| connect_error(&self.address, e))?;

        let credential = match &self.auth {
            BackendAuthConfig::ApiKey { key } => {
                Credential::bearer(self.auth_header.clone(), key)?
            }
            BackendAuthConfig::Login { username, password } => {
                self.login(&http_client, username, password).await?
            }
        };

        debug!(address = %self.address, "Opened backend session");

        Ok(Box::new(HttpBackendSession {
            address: self.address.clone(),
            base_url: self.base_url.clone(),
            http_client,
            credential,
        }))
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }
}

/// One authenticated connection to the REST gateway.
pub struct HttpBackendSession {
    address: String,
    base_url: Url,
    http_client: Client,
    credential: Credential,
}

impl HttpBackendSession {
    async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let response = self
            .credential
            .apply(request)
            .send()
            .await
            .map_err(|e| connect_error(&self.address, e))?;

        check_status(response).await
    }
}

impl Drop for HttpBackendSession {
    fn drop(&mut self) {
        debug!(address = %self.address, "Closing backend session");
    }
}

#[async_trait]
impl BackendSession for HttpBackendSession {
    #[instrument(name = "backend.list_tenants", skip(self))]
    async fn list_tenants(&self, limit: u32, offset: u64) -> BackendResult<TenantPage> {
        let url = endpoint(&self.base_url, &["api", "organizations"])?;
        let request = self
            .http_client
            .get(url)
            .query(&[("limit", limit.to_string()), ("offset", offset.to_string())]);

        let list: ListOrganizationsResponse = decode_json(self.send(request).await?).await?;

        Ok(TenantPage {
            tenants: list
                .result
                .into_iter()
                .map(|org| TenantRef {
                    id: org.id,
                    name: org.display_name,
                })
                .collect(),
            total: list.total_count,
        })
    }

    #[instrument(name = "backend.create_tenant", skip(self))]
    async fn create_tenant(&self, name: &str) -> BackendResult<TenantRef> {
        let url = endpoint(&self.base_url, &["api", "organizations"])?;
        let slug = tenant_slug(name);
        let body = CreateOrganizationRequest {
            organization: NewOrganization {
                name: &slug,
                display_name: name,
                can_have_gateways: false,
            },
        };

        let created: CreateOrganizationResponse =
            decode_json(self.send(self.http_client.post(url).json(&body)).await?).await?;

        debug!(tenant_id = %created.id, slug = %slug, "Created organization");
        Ok(TenantRef {
            id: created.id,
            name: name.to_string(),
        })
    }

    #[instrument(name = "backend.get_user", skip(self))]
    async fn get_user(&self, user_id: UserId) -> BackendResult<UserRecord> {
        let id = user_id.to_string();
        let url = endpoint(&self.base_url, &["api", "users", &id])?;

        let response: GetUserResponse =
            decode_json(self.send(self.http_client.get(url)).await?).await?;
        Ok(response.user)
    }

    #[instrument(name = "backend.update_user", skip(self, user), fields(user_id = %user.id))]
    async fn update_user(&self, user: &UserRecord) -> BackendResult<()> {
        let url = endpoint(&self.base_url, &["api", "users", &user.id])?;
        let body = UpdateUserRequest { user };

        self.send(self.http_client.put(url).json(&body)).await?;
        Ok(())
    }

    #[instrument(name = "backend.add_user_to_tenant", skip(self, email))]
    async fn add_user_to_tenant(&self, tenant_id: &TenantId, email: &str) -> BackendResult<()> {
        let url = endpoint(
            &self.base_url,
            &["api", "organizations", &tenant_id.0, "users"],
        )?;
        let body = AddOrganizationUserRequest {
            organization_user: OrganizationUser {
                organization_id: tenant_id,
                email,
                is_admin: false,
                is_device_admin: false,
                is_gateway_admin: false,
            },
        };

        self.send(self.http_client.post(url).json(&body)).await?;
        Ok(())
    }
}

/// Derive the backend-internal organization name from its display name.
///
/// ChirpStack restricts organization names to `[\w-]+` and keeps them unique,
/// so everything else collapses into single dashes. Display names that do not
/// survive that unchanged get a short UUIDv5 suffix, keeping distinct display
/// names on distinct slugs. Names with nothing usable left fall back to the
/// full UUIDv5.
pub fn tenant_slug(display_name: &str) -> String {
    let mut slug = String::with_capacity(display_name.len());
    for c in display_name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug == display_name {
        return slug.to_string();
    }

    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, display_name.as_bytes()).simple();
    if slug.is_empty() {
        format!("org-{id}")
    } else {
        format!("{slug}-{}", &id.to_string()[..8])
    }
}

fn endpoint(base_url: &Url, segments: &[&str]) -> BackendResult<Url> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|_| BackendError::InvalidResponse(format!("cannot build URL from {base_url}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn connect_error(address: &str, error: reqwest::Error) -> BackendError {
    if error.is_connect() || error.is_builder() {
        BackendError::Connect {
            address: address.to_string(),
            source: error,
        }
    } else {
        BackendError::Request(error)
    }
}

async fn check_status(response: Response) -> BackendResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| {
        if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("no details").to_string()
        } else {
            body.trim().to_string()
        }
    });

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthenticated(message),
        StatusCode::NOT_FOUND => BackendError::NotFound(message),
        StatusCode::CONFLICT => BackendError::Conflict(message),
        _ => BackendError::Status { status, message },
    })
}

fn error_message(body: &str) -> Option<String> {
    let error: GatewayError = serde_json::from_str(body).ok()?;
    error
        .message
        .filter(|m| !m.is_empty())
        .or(error.error.filter(|e| !e.is_empty()))
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> BackendResult<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| BackendError::InvalidResponse(e.to_string()))
}

fn deserialize_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let raw = deserialize_id(deserializer)?;
    raw.parse()
        .map(Some)
        .map_err(|_| serde::de::Error::custom(format!("invalid count '{raw}'")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    jwt: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListOrganizationsResponse {
    #[serde(default, deserialize_with = "deserialize_count")]
    total_count: Option<u64>,
    #[serde(default)]
    result: Vec<OrganizationListItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrganizationListItem {
    id: TenantId,
    #[serde(default)]
    display_name: String,
}

#[derive(Serialize)]
struct CreateOrganizationRequest<'a> {
    organization: NewOrganization<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewOrganization<'a> {
    name: &'a str,
    display_name: &'a str,
    can_have_gateways: bool,
}

#[derive(Deserialize)]
struct CreateOrganizationResponse {
    id: TenantId,
}

#[derive(Deserialize)]
struct GetUserResponse {
    user: UserRecord,
}

#[derive(Serialize)]
struct UpdateUserRequest<'a> {
    user: &'a UserRecord,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddOrganizationUserRequest<'a> {
    organization_user: OrganizationUser<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OrganizationUser<'a> {
    #[serde(rename = "organizationID")]
    organization_id: &'a TenantId,
    email: &'a str,
    is_admin: bool,
    is_device_admin: bool,
    is_gateway_admin: bool,
}

#[derive(Deserialize)]
struct GatewayError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}
