use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::{claims::ClaimsError, services::ProvisioningError};

/// Everything that can end a `/registeruser` request unsuccessfully.
///
/// Responses are plain text: the message followed by a newline.
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("missing user_id parameter")]
    MissingUserId,

    #[error("bad user_id parameter: {0}")]
    InvalidUserId(#[source] std::num::ParseIntError),

    #[error(transparent)]
    Claims(#[from] ClaimsError),

    #[error("oidc_claims as a form or query parameter is disabled, send the claims as a JSON body")]
    LegacyClaimsDisabled,

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
}

impl RegisterError {
    pub fn status(&self) -> StatusCode {
        match self {
            RegisterError::Provisioning(e) if !e.is_client_error() => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for RegisterError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(error = %message, "http server error");
        } else {
            tracing::warn!(error = %message, "http user error");
        }

        (
            status,
            [(header::X_CONTENT_TYPE_OPTIONS, "nosniff")],
            format!("{message}\n"),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::{
        backend::{BackendError, UserId},
        services::{BackendOperation, PolicyRejection},
    };

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_user_errors_are_bad_request() {
        let err = RegisterError::InvalidUserId("alice".parse::<i64>().unwrap_err());
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(
            body_text(response).await,
            "bad user_id parameter: invalid digit found in string\n"
        );
    }

    #[tokio::test]
    async fn test_policy_rejection_is_bad_request() {
        let err = RegisterError::from(ProvisioningError::from(PolicyRejection::EmptyOrganization));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_backend_failure_is_server_error() {
        let err = RegisterError::from(ProvisioningError::Backend {
            operation: BackendOperation::FetchUser(UserId(42)),
            source: BackendError::NotFound("object does not exist".into()),
        });
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_text(response).await,
            "fetching user from chirpstack for userID 42: not found: object does not exist\n"
        );
    }
}
