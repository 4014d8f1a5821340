//! Health check endpoints for container probes and monitoring.

use std::time::{Duration, Instant};

use axum::{Json, extract::State, response::IntoResponse};
use http::StatusCode;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{AppState, backend::BackendConnector};

/// How long a backend check answers later probes.
const CHECK_TTL: Duration = Duration::from_secs(10);

/// Detailed health status response.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// "healthy" or "unhealthy"
    pub status: String,
    pub version: String,
    pub backend: ComponentStatus,
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct BackendCheck {
    healthy: bool,
    latency_ms: u64,
}

/// Most recent backend check, shared by all probes.
///
/// Concurrent probes wait on the same check instead of each opening a
/// session, since a session may cost a ChirpStack login.
#[derive(Default)]
pub struct BackendHealthCache {
    last: Mutex<Option<(Instant, BackendCheck)>>,
}

impl BackendHealthCache {
    async fn check(&self, connector: &dyn BackendConnector) -> BackendCheck {
        let mut last = self.last.lock().await;
        if let Some((checked_at, check)) = *last
            && checked_at.elapsed() < CHECK_TTL
        {
            return check;
        }

        let start = Instant::now();
        let healthy = match connector.connect().await {
            Ok(_session) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Backend health check failed");
                false
            }
        };
        let check = BackendCheck {
            healthy,
            latency_ms: start.elapsed().as_millis() as u64,
        };
        *last = Some((Instant::now(), check));
        check
    }
}

/// Full health check.
///
/// Opens (and immediately drops) a backend session at most once per
/// [`CHECK_TTL`]. Failure details are logged, never returned.
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let check = state.health.check(state.connector.as_ref()).await;

    let backend = ComponentStatus {
        healthy: check.healthy,
        message: (!check.healthy).then(|| "backend unreachable".to_string()),
        latency_ms: Some(check.latency_ms),
    };

    let status_code = if backend.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let health = HealthStatus {
        status: if backend.healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend,
    };

    (status_code, Json(health))
}

/// Liveness probe. Always 200 while the process serves requests.
#[tracing::instrument(name = "health.liveness")]
pub async fn liveness() -> impl IntoResponse {
    StatusCode::OK
}
