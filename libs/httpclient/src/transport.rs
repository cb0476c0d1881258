//! Transport assembly: connector, TLS, proxy routing and tower middleware.
//!
//! Request flow (outer to inner):
//!   `DefaultHeader(User-Agent)` -> `FollowRedirect` -> `Decompression`
//!   -> proxy credentials -> hyper `Client`
//!
//! The stack is boxed into a [`Transport`], a cloneable service whose errors
//! are already mapped to [`HttpError`]. Deadlines, cancellation and logging
//! wrap it in [`HttpClient`](crate::HttpClient).

use crate::body::{RequestBody, ResponseBody};
use crate::config::ClientConfig;
use crate::error::HttpError;
use crate::layers::{DefaultHeaderLayer, RedirectPolicy};
use crate::proxy::ProxyConfig;
use crate::tls;
use bytes::Bytes;
use http::header::PROXY_AUTHORIZATION;
use http::uri::Scheme;
use http::{HeaderValue, Request, Response};
use http_body_util::BodyExt;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::{Connect, HttpConnector};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tower::ServiceBuilder;
use tower::util::BoxCloneSyncService;
use tower_http::decompression::DecompressionLayer;
use tower_http::follow_redirect::FollowRedirectLayer;

/// Boxed request/response service every call goes through.
///
/// Tests can substitute their own via
/// [`HttpClientBuilder::transport`](crate::HttpClientBuilder::transport).
pub type Transport = BoxCloneSyncService<Request<RequestBody>, Response<ResponseBody>, HttpError>;

/// Build the transport described by `config`.
///
/// # Errors
/// Returns `HttpError::InvalidProxyUrl` for a bad proxy setting,
/// `HttpError::Tls` if the TLS configuration cannot be built, and
/// `HttpError::InvalidHeaderValue` for an unusable User-Agent.
pub fn build_transport(config: &ClientConfig) -> Result<Transport, HttpError> {
    let tls_config = tls::client_config(config.tls_roots, config.tls_verification)?;
    let proxy = ProxyConfig::from_client_config(config)?;

    // Plain http targets go through the same connector
    let mut http = HttpConnector::new();
    http.enforce_http(false);

    let https = HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_all_versions();

    match proxy {
        Some(proxy) => {
            tracing::debug!(
                proxy = %proxy.uri(),
                authenticated = proxy.has_credentials(),
                "routing requests through HTTP proxy"
            );
            let authorization = proxy.authorization().cloned();
            assemble(https.wrap_connector(proxy.connector(http)), config, authorization)
        }
        None => assemble(https.wrap_connector(http), config, None),
    }
}

fn assemble<C>(
    connector: C,
    config: &ClientConfig,
    proxy_authorization: Option<HeaderValue>,
) -> Result<Transport, HttpError>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    let client = Client::builder(TokioExecutor::new())
        .pool_timer(TokioTimer::new())
        .build::<_, RequestBody>(connector);

    let service = ServiceBuilder::new()
        .map_err(HttpError::from)
        .map_response(map_decompression_response)
        .layer(DefaultHeaderLayer::user_agent(&config.user_agent)?)
        .layer(FollowRedirectLayer::with_policy(RedirectPolicy::new(
            config.max_redirects,
        )))
        .layer(DecompressionLayer::new())
        .map_request(move |request| with_proxy_authorization(request, proxy_authorization.as_ref()))
        .service(client);

    Ok(BoxCloneSyncService::new(service))
}

/// Forwarded `http` requests carry the proxy credentials; tunnelled
/// `https` requests never do.
fn with_proxy_authorization(
    mut request: Request<RequestBody>,
    authorization: Option<&HeaderValue>,
) -> Request<RequestBody> {
    if let Some(value) = authorization
        && request.uri().scheme() == Some(&Scheme::HTTP)
    {
        request.headers_mut().insert(PROXY_AUTHORIZATION, value.clone());
    }
    request
}

/// Box the (possibly decompressed) body into [`ResponseBody`].
fn map_decompression_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, body.map_err(Into::into).boxed())
}

/// Map transport failures, surfacing handshake problems as `HttpError::Tls`.
pub(crate) fn map_transport_error(err: hyper_util::client::legacy::Error) -> HttpError {
    if is_tls_failure(&err) {
        HttpError::Tls(Box::new(err))
    } else {
        HttpError::Transport(Box::new(err))
    }
}

fn is_tls_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<rustls::Error>() {
            return true;
        }
        // io::Error::source skips the wrapped error itself
        if let Some(inner) = e
            .downcast_ref::<std::io::Error>()
            .and_then(std::io::Error::get_ref)
            && is_tls_failure(inner)
        {
            return true;
        }
        current = e.source();
    }
    false
}
