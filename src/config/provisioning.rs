use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Provisioning policy applied to every `/registeruser` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisioningConfig {
    /// Reject requests that carry no claims at all.
    ///
    /// - `true` (default): a missing or empty claims payload is a client error.
    /// - `false`: the request is acknowledged without touching the backend.
    #[serde(default = "default_true")]
    pub strict_claims: bool,

    /// Accept claims as an `oidc_claims` form or query value in addition to a JSON body.
    #[serde(default = "default_true")]
    pub legacy_form_claims: bool,

    /// Create the organization when no organization with the exact home
    /// organization name exists. When disabled the request is rejected instead.
    #[serde(default = "default_true")]
    pub create_missing_tenants: bool,

    /// Serialize organization lookup-and-create per organization name within
    /// this process, so concurrent first registrations do not create duplicates.
    #[serde(default = "default_true")]
    pub serialize_tenant_creation: bool,

    /// Affiliations that may not be provisioned automatically.
    /// Matching is exact and case-sensitive.
    #[serde(default = "default_denied_affiliations")]
    pub denied_affiliations: Vec<String>,

    /// Prefix written in front of the principal name in the user's note field.
    #[serde(default = "default_note_prefix")]
    pub note_prefix: String,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            strict_claims: true,
            legacy_form_claims: true,
            create_missing_tenants: true,
            serialize_tenant_creation: true,
            denied_affiliations: default_denied_affiliations(),
            note_prefix: default_note_prefix(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_denied_affiliations() -> Vec<String> {
    vec!["student".to_string()]
}

fn default_note_prefix() -> String {
    "eduperson_principal_name: ".to_string()
}

impl ProvisioningConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.denied_affiliations.iter().any(|a| a.is_empty()) {
            return Err(ConfigError::Validation(
                "provisioning.denied_affiliations cannot contain empty entries".into(),
            ));
        }
        Ok(())
    }

    /// Note field contents recording where the account came from.
    pub fn note_for(&self, principal_name: &str) -> String {
        format!("{}{}", self.note_prefix, principal_name)
    }
}
