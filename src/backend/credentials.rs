//! Bearer credentials attached to backend calls.
//!
//! A [`Credential`] belongs to exactly one session. Login tokens are never
//! stored beyond the session that obtained them.

use http::{HeaderName, HeaderValue};

use super::BackendError;

/// A bearer credential bound to one backend session.
#[derive(Clone)]
pub struct Credential {
    header: HeaderName,
    value: HeaderValue,
}

impl Credential {
    /// Build a credential that sends `Bearer <token>` in `header`.
    pub fn bearer(header: HeaderName, token: &str) -> Result<Self, BackendError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            BackendError::InvalidResponse("token contains characters not allowed in a header".into())
        })?;
        value.set_sensitive(true);
        Ok(Self { header, value })
    }

    /// Attach this credential to an outgoing request.
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header(self.header.clone(), self.value.clone())
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.header
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("header", &self.header)
            .field("value", &"****")
            .finish()
    }
}
