use crate::error::HttpError;
use http::{HeaderName, HeaderValue, Request};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that sets a header on every request that does not already carry it.
///
/// Caller-supplied values always win; the layer only fills gaps. The client
/// uses it for the default `User-Agent`.
#[derive(Debug, Clone)]
pub struct DefaultHeaderLayer {
    name: HeaderName,
    value: HeaderValue,
}

impl DefaultHeaderLayer {
    #[must_use]
    pub fn new(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }

    /// Default `User-Agent` layer
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if `user_agent` is not a valid header value
    pub fn user_agent(user_agent: &str) -> Result<Self, HttpError> {
        Ok(Self::new(
            http::header::USER_AGENT,
            HeaderValue::from_str(user_agent)?,
        ))
    }
}

impl<S> Layer<S> for DefaultHeaderLayer {
    type Service = DefaultHeaderService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DefaultHeaderService {
            inner,
            name: self.name.clone(),
            value: self.value.clone(),
        }
    }
}

/// Service produced by [`DefaultHeaderLayer`]
#[derive(Debug, Clone)]
pub struct DefaultHeaderService<S> {
    inner: S,
    name: HeaderName,
    value: HeaderValue,
}

impl<S, ReqBody> Service<Request<ReqBody>> for DefaultHeaderService<S>
where
    S: Service<Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        if let http::header::Entry::Vacant(slot) = req.headers_mut().entry(&self.name) {
            slot.insert(self.value.clone());
        }
        self.inner.call(req)
    }
}
