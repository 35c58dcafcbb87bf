//! Sign-in and sign-out redirect URLs.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left unescaped in the `continue` parameter: alphanumerics,
/// `_.-~` and `/`.
const CONTINUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

fn quote(dest_url: &str) -> String {
    utf8_percent_encode(dest_url, CONTINUE).to_string()
}

/// URL that signs the user in and then returns to `dest_url`.
#[must_use]
pub fn create_login_url(dest_url: &str) -> String {
    format!("/_ah/login?continue={}", quote(dest_url))
}

/// URL that signs the user out and then returns to `dest_url`.
#[must_use]
pub fn create_logout_url(dest_url: &str) -> String {
    format!("/_ah/logout?continue={}", quote(dest_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_url_quotes_destination() {
        assert_eq!(
            create_login_url("https://app.example.com/_ah/pipeline/status?root=abc"),
            "/_ah/login?continue=https%3A//app.example.com/_ah/pipeline/status%3Froot%3Dabc"
        );
    }

    #[test]
    fn test_logout_url_keeps_path() {
        assert_eq!(
            create_logout_url("/_ah/pipeline/list"),
            "/_ah/logout?continue=/_ah/pipeline/list"
        );
    }

    #[test]
    fn test_unicode_and_spaces() {
        assert_eq!(create_login_url("/a b/é"), "/_ah/login?continue=/a%20b/%C3%A9");
    }
}
