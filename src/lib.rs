//! Provisions federated users into ChirpStack organizations.
//!
//! An access-control proxy authenticates the user against an eduGAIN/OIDC
//! identity provider and then calls `/registeruser` with the backend user id
//! and the user's claims. The service puts the user into the organization
//! matching `schac_home_organization`, creating it when needed, and records
//! `eduperson_principal_name` on the account.

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

pub mod backend;
pub mod claims;
pub mod config;
pub mod middleware;
pub mod observability;
pub mod routes;
pub mod services;

#[cfg(test)]
mod tests;

use backend::{BackendConnector, HttpBackendConnector};
use config::{ConfigError, UserregConfig};
use routes::health::BackendHealthCache;
use services::ProvisioningService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<UserregConfig>,
    pub connector: Arc<dyn BackendConnector>,
    pub provisioning: Arc<ProvisioningService>,
    pub health: Arc<BackendHealthCache>,
}

impl AppState {
    /// Build the state for serving `config` against the configured ChirpStack.
    pub fn new(config: UserregConfig) -> Result<Self, ConfigError> {
        let connector = Arc::new(HttpBackendConnector::from_config(&config.backend)?);
        Ok(Self::with_connector(config, connector))
    }

    /// Build the state around an existing backend connector.
    pub fn with_connector(config: UserregConfig, connector: Arc<dyn BackendConnector>) -> Self {
        let provisioning = Arc::new(ProvisioningService::new(
            connector.clone(),
            config.provisioning.clone(),
        ));

        Self {
            config: Arc::new(config),
            connector,
            provisioning,
            health: Arc::new(BackendHealthCache::default()),
        }
    }
}

pub fn build_app(config: &UserregConfig, state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/health/live", get(routes::health::liveness))
        .merge(routes::registration_routes())
        .layer(axum::middleware::from_fn(
            middleware::request_id_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .with_state(state)
}
