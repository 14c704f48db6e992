//! Redirect policy for the client stack
//!
//! - Follows at most `max_redirects` hops; past that the 3xx response is
//!   handed to the classifier
//! - Once a hop leaves the original origin, `Authorization`, `Cookie` and
//!   `Proxy-Authorization` are removed from every following request
//! - HTTPS to HTTP downgrades are never followed

use http::{Request, Uri, header};
use tower_http::follow_redirect::policy::{Action, Attempt, Policy};

/// Headers removed once a redirect chain crosses origins
const CREDENTIAL_HEADERS: &[header::HeaderName] = &[
    header::AUTHORIZATION,
    header::COOKIE,
    header::PROXY_AUTHORIZATION,
];

/// Redirect policy that keeps session credentials on their origin
///
/// `FollowRedirect` clones the policy per request, so the counters start
/// fresh for every call.
#[derive(Debug, Clone)]
pub struct CredentialRedirectPolicy {
    max_redirects: usize,
    followed: usize,
    crossed_origin: bool,
}

impl CredentialRedirectPolicy {
    #[must_use]
    pub fn new(max_redirects: usize) -> Self {
        Self {
            max_redirects,
            followed: 0,
            crossed_origin: false,
        }
    }

    /// Scheme, host and port match; a missing scheme counts as https.
    fn is_same_origin(from: &Uri, to: &Uri) -> bool {
        let from_scheme = from.scheme_str().unwrap_or("https");
        let to_scheme = to.scheme_str().unwrap_or("https");
        from_scheme == to_scheme
            && from.host() == to.host()
            && port_or_default(from, from_scheme) == port_or_default(to, to_scheme)
    }

    fn is_downgrade(from: &Uri, to: &Uri) -> bool {
        from.scheme_str().unwrap_or("https") == "https" && to.scheme_str() == Some("http")
    }
}

fn port_or_default(uri: &Uri, scheme: &str) -> Option<u16> {
    uri.port_u16().or(match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    })
}

impl<B: Clone, E> Policy<B, E> for CredentialRedirectPolicy {
    fn redirect(&mut self, attempt: &Attempt<'_>) -> Result<Action, E> {
        if self.followed >= self.max_redirects {
            tracing::debug!(max = self.max_redirects, "redirect not followed, limit reached");
            return Ok(Action::Stop);
        }

        let from = attempt.previous();
        let to = attempt.location();
        if Self::is_downgrade(from, to) {
            tracing::warn!(from = %from, to = %to, "refusing HTTPS to HTTP redirect");
            return Ok(Action::Stop);
        }

        if !Self::is_same_origin(from, to) {
            tracing::debug!(from = %from, to = %to, "cross-origin redirect, dropping credentials");
            self.crossed_origin = true;
        }
        self.followed += 1;
        Ok(Action::Follow)
    }

    fn on_request(&mut self, request: &mut Request<B>) {
        if !self.crossed_origin {
            return;
        }
        let headers = request.headers_mut();
        for name in CREDENTIAL_HEADERS {
            headers.remove(name);
        }
    }

    fn clone_body(&self, body: &B) -> Option<B> {
        // 307/308 resend the body
        Some(body.clone())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn same_origin_rules() {
        let same = |a, b| CredentialRedirectPolicy::is_same_origin(&uri(a), &uri(b));
        assert!(same("https://api.test/a", "https://api.test/b"));
        assert!(same("https://api.test/a", "https://api.test:443/b"));
        assert!(!same("https://api.test/a", "https://files.test/b"));
        assert!(!same("https://api.test/a", "http://api.test/b"));
        assert!(!same("http://127.0.0.1:8080/a", "http://127.0.0.1:8081/b"));
    }

    #[test]
    fn downgrade_detected() {
        let down = |a, b| CredentialRedirectPolicy::is_downgrade(&uri(a), &uri(b));
        assert!(down("https://api.test/a", "http://api.test/b"));
        assert!(!down("http://api.test/a", "https://api.test/b"));
        assert!(!down("http://api.test/a", "http://other.test/b"));
    }

    #[test]
    fn credentials_kept_until_origin_changes() {
        let mut policy = CredentialRedirectPolicy::new(5);
        let mut req = Request::builder()
            .uri("https://api.test/x")
            .header(header::AUTHORIZATION, "Bearer t")
            .header(header::COOKIE, "sid=1")
            .header("tenantid", "7")
            .body(Full::new(Bytes::new()))
            .unwrap();

        Policy::<_, ()>::on_request(&mut policy, &mut req);
        assert!(req.headers().contains_key(header::AUTHORIZATION));

        policy.crossed_origin = true;
        Policy::<_, ()>::on_request(&mut policy, &mut req);
        assert!(!req.headers().contains_key(header::AUTHORIZATION));
        assert!(!req.headers().contains_key(header::COOKIE));
        assert_eq!(req.headers()["tenantid"], "7");
    }
}
