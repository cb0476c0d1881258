//! Redirect policy for the transport stack.
//!
//! Redirects are followed to any origin, up to a fixed number of hops. Once a
//! chain leaves the original origin, credential headers are dropped from every
//! following request. A 307/308 redirect is followed only when the request
//! body can be sent again; otherwise the redirect response is returned as is.

use crate::body::RequestBody;
use http::{Request, Uri, header};
use tower_http::follow_redirect::policy::{Action, Attempt, Policy};

/// Headers dropped once a redirect chain crosses origins
const SENSITIVE_HEADERS: &[header::HeaderName] = &[
    header::AUTHORIZATION,
    header::COOKIE,
    header::PROXY_AUTHORIZATION,
];

/// Hop-limited redirect policy. Cloned per request, so counters start at zero.
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    max_redirects: usize,
    hops: usize,
    cross_origin: bool,
}

impl RedirectPolicy {
    /// Follow at most `max_redirects` hops (0 returns every 3xx to the caller)
    #[must_use]
    pub fn new(max_redirects: usize) -> Self {
        Self {
            max_redirects,
            hops: 0,
            cross_origin: false,
        }
    }

    /// Missing schemes are treated as https.
    fn is_same_origin(original: &Uri, target: &Uri) -> bool {
        let origin = |uri: &Uri| {
            let scheme = uri.scheme_str().unwrap_or("https");
            let port = uri.port_u16().unwrap_or(match scheme {
                "http" => 80,
                "https" => 443,
                _ => 0,
            });
            (scheme.to_owned(), uri.host().unwrap_or("").to_ascii_lowercase(), port)
        };
        origin(original) == origin(target)
    }
}

impl<E> Policy<RequestBody, E> for RedirectPolicy {
    fn redirect(&mut self, attempt: &Attempt<'_>) -> Result<Action, E> {
        self.hops += 1;
        if self.hops > self.max_redirects {
            tracing::debug!(
                max = self.max_redirects,
                location = %attempt.location(),
                "redirect limit reached, returning redirect response"
            );
            return Ok(Action::Stop);
        }

        if !Self::is_same_origin(attempt.previous(), attempt.location()) {
            self.cross_origin = true;
        }

        tracing::debug!(
            hop = self.hops,
            status = attempt.status().as_u16(),
            from = %attempt.previous(),
            to = %attempt.location(),
            "following redirect"
        );
        Ok(Action::Follow)
    }

    fn on_request(&mut self, request: &mut Request<RequestBody>) {
        if self.cross_origin {
            let headers = request.headers_mut();
            for name in SENSITIVE_HEADERS {
                headers.remove(name);
            }
        }
    }

    fn clone_body(&self, body: &RequestBody) -> Option<RequestBody> {
        body.try_clone()
    }
}
