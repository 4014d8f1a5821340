pub mod error;
pub mod health;
pub mod register;

use axum::{Router, routing::get};

pub use error::RegisterError;

use crate::AppState;

/// Routes served to the access proxy.
pub fn registration_routes() -> Router<AppState> {
    Router::new().route(
        "/registeruser",
        get(register::register_user).post(register::register_user),
    )
}
