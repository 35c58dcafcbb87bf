//! Request identity shim.
//!
//! Answers "who is the current user, and are they an administrator" from
//! headers a trusted front-door proxy attaches to each request. Parsing is
//! pure and request-scoped; nothing is cached between requests.
//!
//! ## Deployment precondition
//!
//! [`HeaderClaimsProvider`] believes whatever the identity headers say. Run it
//! only behind a gateway that authenticates users, injects these headers and
//! strips any copies sent by the client. To verify signed tokens instead,
//! implement [`ClaimsProvider`] and pass that provider to
//! [`RequestIdentity::from_headers`].

mod claims;
mod urls;

use http::HeaderMap;
use tracing::debug;

use crate::errors::IdentityError;

pub use claims::{
    ClaimsProvider, FixedClaimsProvider, HeaderClaimsProvider, IdentityClaim, IdentityHeaders,
};
pub use urls::{create_login_url, create_logout_url};

/// The identity attached to one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    claim: Option<IdentityClaim>,
}

impl RequestIdentity {
    /// Resolves the identity of a request through `provider`.
    ///
    /// # Errors
    ///
    /// Propagates the provider's [`IdentityError`] for malformed headers.
    pub fn from_headers(
        provider: &dyn ClaimsProvider,
        headers: &HeaderMap,
    ) -> Result<Self, IdentityError> {
        Ok(Self {
            claim: provider.claims(headers)?,
        })
    }

    /// An identity with no signed-in user.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self { claim: None }
    }

    /// Wraps an existing claim.
    #[must_use]
    pub const fn from_claim(claim: IdentityClaim) -> Self {
        Self { claim: Some(claim) }
    }

    /// The signed-in user, if any.
    #[must_use]
    pub const fn current_identity(&self) -> Option<&IdentityClaim> {
        self.claim.as_ref()
    }

    /// True only for a signed-in administrator.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.claim.as_ref().is_some_and(|c| c.is_admin)
    }
}

/// Outcome of an administrator gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAccess {
    /// The user is an administrator.
    Allowed,
    /// Nobody is signed in; redirect to `login_url`.
    LoginRequired {
        /// Sign-in URL returning to the requested page.
        login_url: String,
    },
    /// The user is signed in but not an administrator.
    Forbidden,
}

/// Gates an administrator-only page.
#[must_use]
pub fn require_admin(identity: &RequestIdentity, request_url: &str) -> AdminAccess {
    match identity.current_identity() {
        None => AdminAccess::LoginRequired {
            login_url: create_login_url(request_url),
        },
        Some(claim) if claim.is_admin => AdminAccess::Allowed,
        Some(claim) => {
            debug!(email = %claim.email, "User is not admin");
            AdminAccess::Forbidden
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_absent_identity_is_never_admin() {
        let mut headers = HeaderMap::new();
        headers.insert("x-appengine-user-is-admin", HeaderValue::from_static("1"));

        let identity = RequestIdentity::from_headers(&HeaderClaimsProvider::new(), &headers).unwrap();

        assert!(identity.current_identity().is_none());
        assert!(!identity.is_admin());
    }

    #[test]
    fn test_admin_flag_flows_through() {
        let mut headers = HeaderMap::new();
        headers.insert("x-appengine-user-email", HeaderValue::from_static("a@b.c"));
        headers.insert("x-appengine-user-is-admin", HeaderValue::from_static("true"));

        let identity = RequestIdentity::from_headers(&HeaderClaimsProvider::new(), &headers).unwrap();

        assert!(identity.is_admin());
        assert_eq!(identity.current_identity().map(IdentityClaim::nickname), Some("a"));
    }

    #[test]
    fn test_require_admin() {
        let anon = RequestIdentity::anonymous();
        assert_eq!(
            require_admin(&anon, "/_ah/pipeline/status"),
            AdminAccess::LoginRequired {
                login_url: "/_ah/login?continue=/_ah/pipeline/status".to_string()
            }
        );

        let user = RequestIdentity::from_claim(IdentityClaim::new("u@example.com"));
        assert_eq!(require_admin(&user, "/x"), AdminAccess::Forbidden);

        let admin = RequestIdentity::from_claim(IdentityClaim::new("a@example.com").with_admin(true));
        assert_eq!(require_admin(&admin, "/x"), AdminAccess::Allowed);
    }
}
