//! Identity claims and the providers that produce them.

use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::errors::IdentityError;

/// Who the front-door proxy says the caller is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaim {
    /// Email address.
    pub email: String,
    /// Stable user identifier, if the proxy supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Whether the user administers the application.
    #[serde(default)]
    pub is_admin: bool,
}

impl IdentityClaim {
    /// Creates a non-admin claim for `email`.
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            user_id: None,
            is_admin: false,
        }
    }

    /// Sets the user id.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the admin flag.
    #[must_use]
    pub const fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    /// Local part of the email address.
    #[must_use]
    pub fn nickname(&self) -> &str {
        self.email.split('@').next().unwrap_or(&self.email)
    }
}

/// Header names the proxy uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityHeaders {
    /// Email header.
    #[serde(default = "default_email_header")]
    pub email: String,
    /// User id header.
    #[serde(default = "default_user_id_header")]
    pub user_id: String,
    /// Admin flag header.
    #[serde(default = "default_admin_header")]
    pub is_admin: String,
}

fn default_email_header() -> String {
    "X-Appengine-User-Email".to_string()
}

fn default_user_id_header() -> String {
    "X-Appengine-User-Id".to_string()
}

fn default_admin_header() -> String {
    "X-Appengine-User-Is-Admin".to_string()
}

impl Default for IdentityHeaders {
    fn default() -> Self {
        Self {
            email: default_email_header(),
            user_id: default_user_id_header(),
            is_admin: default_admin_header(),
        }
    }
}

/// Turns request headers into an identity claim.
///
/// This is the trust boundary: implementations decide which headers, if
/// any, are believed.
pub trait ClaimsProvider: Send + Sync {
    /// Returns the claim for a request.
    ///
    /// `Ok(None)` means no user is signed in.
    ///
    /// # Errors
    ///
    /// An [`IdentityError`] when identity headers are present but malformed.
    fn claims(&self, headers: &HeaderMap) -> Result<Option<IdentityClaim>, IdentityError>;
}

/// Trusts the headers injected by the front-door proxy.
///
/// Only sound behind a gateway that authenticates users and strips any
/// client-supplied copies of these headers. Nothing here verifies them.
#[derive(Debug, Clone, Default)]
pub struct HeaderClaimsProvider {
    headers: IdentityHeaders,
}

impl HeaderClaimsProvider {
    /// Creates a provider with the default header names.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider reading custom header names.
    #[must_use]
    pub const fn with_headers(headers: IdentityHeaders) -> Self {
        Self { headers }
    }

    fn text<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, IdentityError> {
        headers
            .get(name)
            .map(|value| {
                value.to_str().map_err(|_| IdentityError::InvalidHeaderValue {
                    header: name.to_string(),
                })
            })
            .transpose()
    }
}

/// Parses an admin flag value.
pub(crate) fn parse_admin_flag(header: &str, value: &str) -> Result<bool, IdentityError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(IdentityError::MalformedAdminFlag {
            header: header.to_string(),
            value: value.to_string(),
        }),
    }
}

impl ClaimsProvider for HeaderClaimsProvider {
    fn claims(&self, headers: &HeaderMap) -> Result<Option<IdentityClaim>, IdentityError> {
        let Some(email) = Self::text(headers, &self.headers.email)?.filter(|e| !e.is_empty())
        else {
            return Ok(None);
        };

        let user_id = Self::text(headers, &self.headers.user_id)?
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let is_admin = Self::text(headers, &self.headers.is_admin)?
            .map(|flag| parse_admin_flag(&self.headers.is_admin, flag))
            .transpose()?
            .unwrap_or(false);

        Ok(Some(IdentityClaim {
            email: email.to_string(),
            user_id,
            is_admin,
        }))
    }
}

/// Returns a preset claim regardless of the request.
#[derive(Debug, Clone, Default)]
pub struct FixedClaimsProvider {
    claim: Option<IdentityClaim>,
}

impl FixedClaimsProvider {
    /// A provider that always reports `claim`.
    #[must_use]
    pub const fn new(claim: IdentityClaim) -> Self {
        Self { claim: Some(claim) }
    }

    /// A provider that always reports no user.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self { claim: None }
    }
}

impl ClaimsProvider for FixedClaimsProvider {
    fn claims(&self, _headers: &HeaderMap) -> Result<Option<IdentityClaim>, IdentityError> {
        Ok(self.claim.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use pretty_assertions::assert_eq;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_no_headers_is_anonymous() {
        let claim = HeaderClaimsProvider::new().claims(&HeaderMap::new()).unwrap();
        assert_eq!(claim, None);
    }

    #[test]
    fn test_full_claim() {
        let claim = HeaderClaimsProvider::new()
            .claims(&headers(&[
                ("x-appengine-user-email", "ada@example.com"),
                ("x-appengine-user-id", "1234"),
                ("x-appengine-user-is-admin", "1"),
            ]))
            .unwrap()
            .unwrap();

        assert_eq!(claim.email, "ada@example.com");
        assert_eq!(claim.user_id.as_deref(), Some("1234"));
        assert!(claim.is_admin);
        assert_eq!(claim.nickname(), "ada");
    }

    #[test]
    fn test_admin_flag_values() {
        assert!(parse_admin_flag("h", "TRUE").unwrap());
        assert!(parse_admin_flag("h", "1").unwrap());
        assert!(!parse_admin_flag("h", "false").unwrap());
        assert!(!parse_admin_flag("h", "0").unwrap());
        assert!(matches!(
            parse_admin_flag("h", "yes"),
            Err(IdentityError::MalformedAdminFlag { .. })
        ));
    }

    #[test]
    fn test_missing_admin_header_is_not_admin() {
        let claim = HeaderClaimsProvider::new()
            .claims(&headers(&[("x-appengine-user-email", "bob@example.com")]))
            .unwrap()
            .unwrap();
        assert!(!claim.is_admin);
        assert_eq!(claim.user_id, None);
    }

    #[test]
    fn test_malformed_admin_flag_is_an_error() {
        let err = HeaderClaimsProvider::new()
            .claims(&headers(&[
                ("x-appengine-user-email", "bob@example.com"),
                ("x-appengine-user-is-admin", "maybe"),
            ]))
            .unwrap_err();
        assert!(matches!(err, IdentityError::MalformedAdminFlag { ref value, .. } if value == "maybe"));
    }

    #[test]
    fn test_non_text_header_is_an_error() {
        let mut map = HeaderMap::new();
        map.insert(
            "x-appengine-user-email",
            HeaderValue::from_bytes(b"caf\xe9@example.com").unwrap(),
        );
        let err = HeaderClaimsProvider::new().claims(&map).unwrap_err();
        assert!(matches!(err, IdentityError::InvalidHeaderValue { .. }));
    }

    #[test]
    fn test_custom_header_names() {
        let provider = HeaderClaimsProvider::with_headers(IdentityHeaders {
            email: "X-Goog-Authenticated-User-Email".to_string(),
            ..IdentityHeaders::default()
        });
        let claim = provider
            .claims(&headers(&[("x-goog-authenticated-user-email", "eve@example.com")]))
            .unwrap();
        assert_eq!(claim.map(|c| c.email), Some("eve@example.com".to_string()));
    }

    #[test]
    fn test_fixed_provider_ignores_headers() {
        let provider = FixedClaimsProvider::new(IdentityClaim::new("root@example.com").with_admin(true));
        let claim = provider
            .claims(&headers(&[("x-appengine-user-email", "other@example.com")]))
            .unwrap()
            .unwrap();
        assert_eq!(claim.email, "root@example.com");

        assert_eq!(FixedClaimsProvider::anonymous().claims(&HeaderMap::new()).unwrap(), None);
    }
}
