//! `/registeruser`: provision the calling user into their home organization.
//!
//! Parameters:
//!
//! - `user_id`: backend user id, from the query string or a form body.
//! - claims: a JSON object as the request body, or the legacy `oidc_claims`
//!   form/query value when `provisioning.legacy_form_claims` is enabled.
//!
//! A JSON body wins over an `oidc_claims` query value.

use std::fmt;

use axum::extract::State;
use bytes::Bytes;
use http::{HeaderMap, Method, Uri, header};
use tracing::info;

use super::error::RegisterError;
use crate::{AppState, backend::UserId, claims};

/// Where the claims payload of a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimsSource {
    Body,
    Form,
    Query,
    Absent,
}

impl fmt::Display for ClaimsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClaimsSource::Body => "body",
            ClaimsSource::Form => "form",
            ClaimsSource::Query => "query",
            ClaimsSource::Absent => "absent",
        })
    }
}

/// `user_id` and `oidc_claims` from a urlencoded query or form body.
/// The first occurrence of each key wins.
#[derive(Debug, Default)]
struct RegisterParams {
    user_id: Option<String>,
    oidc_claims: Option<String>,
}

impl RegisterParams {
    fn parse(input: &[u8]) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(input) {
            let slot = match key.as_ref() {
                "user_id" => &mut params.user_id,
                "oidc_claims" => &mut params.oidc_claims,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.trim_start()
                .to_ascii_lowercase()
                .starts_with("application/x-www-form-urlencoded")
        })
}

#[tracing::instrument(name = "registeruser", skip_all, fields(%method))]
pub async fn register_user(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<String, RegisterError> {
    let policy = state.provisioning.config();
    let query = RegisterParams::parse(uri.query().unwrap_or_default().as_bytes());

    let (form, json_body) = if is_form(&headers) {
        (RegisterParams::parse(&body), None)
    } else {
        let body = Some(body).filter(|b| !b.trim_ascii().is_empty());
        (RegisterParams::default(), body)
    };

    let user_id = form
        .user_id
        .or(query.user_id)
        .filter(|id| !id.is_empty())
        .ok_or(RegisterError::MissingUserId)?;

    let (source, raw_claims): (ClaimsSource, Option<Bytes>) = match (json_body, form.oidc_claims)
    {
        (Some(body), _) => (ClaimsSource::Body, Some(body)),
        (None, Some(value)) => (ClaimsSource::Form, Some(Bytes::from(value))),
        (None, None) => match query.oidc_claims {
            Some(value) => (ClaimsSource::Query, Some(Bytes::from(value))),
            None => (ClaimsSource::Absent, None),
        },
    };

    info!(user_id = %user_id, claims_source = %source, "Registration requested");

    if matches!(source, ClaimsSource::Form | ClaimsSource::Query) && !policy.legacy_form_claims {
        return Err(RegisterError::LegacyClaimsDisabled);
    }

    let claims = claims::decode(raw_claims.as_deref(), policy.strict_claims)?;
    let user_id: UserId = user_id.parse().map_err(RegisterError::InvalidUserId)?;

    let outcome = state.provisioning.register(user_id, claims).await?;
    Ok(format!("{outcome}\n"))
}
