//! Decoding of the federated identity claims forwarded by the access proxy.
//!
//! Only three eduPerson/SCHAC attributes are consumed: the home organization,
//! the affiliation set and the principal name. Everything else in the payload
//! is ignored.

use serde::Deserialize;

/// The claims a registration decision is based on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimsRecord {
    /// `schac_home_organization`: display name of the user's organization.
    pub home_organization: String,
    /// `eduperson_affiliation`, in the order the identity provider sent them.
    pub affiliations: Vec<String>,
    /// `eduperson_principal_name`.
    pub principal_name: String,
}

impl ClaimsRecord {
    /// Exact, case-sensitive membership test.
    pub fn has_affiliation(&self, affiliation: &str) -> bool {
        self.affiliations.iter().any(|a| a == affiliation)
    }

    /// First affiliation that appears in `denied`, if any.
    pub fn denied_affiliation<'a>(&'a self, denied: &[String]) -> Option<&'a str> {
        self.affiliations
            .iter()
            .find(|a| denied.iter().any(|d| d == *a))
            .map(String::as_str)
    }

    pub fn has_home_organization(&self) -> bool {
        !self.home_organization.trim().is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimsError {
    #[error("missing oidc_claims parameter")]
    Missing,

    #[error("invalid oidc_claims: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Wire shape of the claims object.
#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    schac_home_organization: Option<String>,
    #[serde(default)]
    eduperson_affiliation: Option<Affiliations>,
    #[serde(default)]
    eduperson_principal_name: Option<String>,
}

/// Some identity providers send a single-valued affiliation as a bare string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Affiliations {
    Many(Vec<String>),
    One(String),
}

impl From<Affiliations> for Vec<String> {
    fn from(value: Affiliations) -> Self {
        match value {
            Affiliations::Many(list) => list,
            Affiliations::One(single) => vec![single],
        }
    }
}

/// Decode a raw claims payload.
///
/// `Ok(None)` means no claims were supplied and `strict` is off; with `strict`
/// set an absent, blank or `null` payload is [`ClaimsError::Missing`].
pub fn decode(raw: Option<&[u8]>, strict: bool) -> Result<Option<ClaimsRecord>, ClaimsError> {
    let payload = raw.filter(|bytes| !bytes.trim_ascii().is_empty());

    let Some(payload) = payload else {
        return absent(strict);
    };

    let value: serde_json::Value = serde_json::from_slice(payload)?;
    let parsed: RawClaims = match value {
        serde_json::Value::Null => return absent(strict),
        serde_json::Value::Object(_) => serde_json::from_value(value)?,
        _ => {
            return Err(ClaimsError::Malformed(serde::de::Error::custom(
                "claims must be a JSON object",
            )));
        }
    };

    Ok(Some(ClaimsRecord {
        home_organization: parsed.schac_home_organization.unwrap_or_default(),
        affiliations: parsed
            .eduperson_affiliation
            .map(Vec::from)
            .unwrap_or_default(),
        principal_name: parsed.eduperson_principal_name.unwrap_or_default(),
    }))
}

fn absent(strict: bool) -> Result<Option<ClaimsRecord>, ClaimsError> {
    if strict {
        Err(ClaimsError::Missing)
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const ACME: &str = r#"{
        "schac_home_organization": "Acme U",
        "eduperson_affiliation": ["faculty", "member"],
        "eduperson_principal_name": "alice@acme.edu",
        "sub": "ignored"
    }"#;

    #[test]
    fn test_decode_full_claims() {
        let claims = decode(Some(ACME.as_bytes()), true).unwrap().unwrap();

        assert_eq!(claims.home_organization, "Acme U");
        assert_eq!(claims.affiliations, vec!["faculty", "member"]);
        assert_eq!(claims.principal_name, "alice@acme.edu");
        assert!(claims.has_home_organization());
    }

    #[test]
    fn test_single_affiliation_string() {
        let claims = decode(Some(br#"{"eduperson_affiliation": "staff"}"#), true)
            .unwrap()
            .unwrap();
        assert_eq!(claims.affiliations, vec!["staff"]);
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let claims = decode(Some(b"{}"), true).unwrap().unwrap();
        assert_eq!(claims, ClaimsRecord::default());
        assert!(!claims.has_home_organization());
    }

    #[rstest]
    #[case::none(None)]
    #[case::empty(Some(&b""[..]))]
    #[case::whitespace(Some(&b"  \n"[..]))]
    #[case::null(Some(&b"null"[..]))]
    fn test_absent_claims(#[case] raw: Option<&[u8]>) {
        assert!(matches!(decode(raw, true), Err(ClaimsError::Missing)));
        assert_eq!(decode(raw, false).unwrap(), None);
    }

    #[rstest]
    #[case::truncated(r#"{"schac_home_organization": "Acme"#)]
    #[case::array(r#"["Acme U"]"#)]
    #[case::string(r#""Acme U""#)]
    #[case::wrong_type(r#"{"eduperson_principal_name": 42}"#)]
    fn test_malformed_claims(#[case] raw: &str) {
        let err = decode(Some(raw.as_bytes()), false).unwrap_err();
        assert!(matches!(err, ClaimsError::Malformed(_)));
        assert!(err.to_string().starts_with("invalid oidc_claims: "));
    }

    #[rstest]
    #[case::only(&["student"], true)]
    #[case::last(&["member", "student"], true)]
    #[case::capitalized(&["Student"], false)]
    #[case::substring(&["students"], false)]
    #[case::prefixed(&["former-student"], false)]
    fn test_has_affiliation_is_exact(#[case] affiliations: &[&str], #[case] expected: bool) {
        let claims = ClaimsRecord {
            affiliations: affiliations.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        };
        assert_eq!(claims.has_affiliation("student"), expected);
        assert_eq!(
            claims
                .denied_affiliation(&["student".to_string()])
                .is_some(),
            expected
        );
    }

    #[test]
    fn test_blank_organization_is_not_an_organization() {
        let claims = ClaimsRecord {
            home_organization: "   ".into(),
            ..Default::default()
        };
        assert!(!claims.has_home_organization());
    }
}
