use crate::client::HttpClient;
use crate::config::{ClientConfig, LogEmission, TlsRootConfig, TlsVerification};
use crate::error::HttpError;
use crate::logging::{LogEmitter, LogSink, TracingSink};
use crate::proxy::ProxyConfig;
use crate::transport::{Transport, build_transport};
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`HttpClient`].
///
/// Starts from [`ClientConfig::default`]; every setter overrides one field.
/// The log sink defaults to a [`TracingSink`] derived from the configuration.
#[must_use]
pub struct HttpClientBuilder {
    config: ClientConfig,
    sink: Option<Arc<dyn LogSink>>,
    transport: Option<Transport>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClientBuilder {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            sink: None,
            transport: None,
        }
    }

    /// Deadline for the full request/response cycle; zero disables it
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Route every connection through an HTTP proxy
    pub fn proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.config.use_proxy = true;
        self.config.proxy_url = Some(proxy_url.into());
        self
    }

    pub fn no_proxy(mut self) -> Self {
        self.config.use_proxy = false;
        self
    }

    /// Emit an outcome record per call
    pub fn log_request_response(mut self, enabled: bool) -> Self {
        self.config.log_request_response = enabled;
        self
    }

    /// Include request/response bodies in outcome records
    pub fn log_body(mut self, enabled: bool) -> Self {
        self.config.log_body = enabled;
        self
    }

    pub fn log_emission(mut self, emission: LogEmission) -> Self {
        self.config.log_emission = emission;
        self
    }

    /// Server certificate verification policy
    ///
    /// `TlsVerification::AcceptInvalidCerts` logs a warning when the client is built.
    pub fn tls_verification(mut self, verification: TlsVerification) -> Self {
        self.config.tls_verification = verification;
        self
    }

    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Cap for captured and buffered bodies
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Return 5xx responses as `HttpError::HttpStatus`
    pub fn fail_on_server_error(mut self, enabled: bool) -> Self {
        self.config.fail_on_server_error = enabled;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set to `0` to hand 3xx responses back without following them
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.config.max_redirects = max_redirects;
        self
    }

    /// Replace the default tracing sink
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the hyper transport, e.g. with an in-process stub.
    ///
    /// Proxy, TLS, redirect and User-Agent settings are not applied to a
    /// custom transport; the proxy setting is still validated.
    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client.
    ///
    /// Nothing is returned on failure; no partially configured client exists.
    ///
    /// # Errors
    /// - `HttpError::InvalidProxyUrl` if `use_proxy` is set with a missing or malformed URL
    /// - `HttpError::Tls` if the TLS configuration cannot be built
    /// - `HttpError::InvalidHeaderValue` if the User-Agent is not a valid header value
    /// - `HttpError::LoggerInit` if the log sink fails its one-time configuration
    pub fn build(self) -> Result<HttpClient, HttpError> {
        let transport = match self.transport {
            Some(transport) => {
                ProxyConfig::from_client_config(&self.config)?;
                transport
            }
            None => build_transport(&self.config)?,
        };

        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(TracingSink::from_config(&self.config)));
        sink.configure()?;

        tracing::debug!(
            timeout = ?self.config.timeout,
            proxy = self.config.use_proxy,
            log_request_response = self.config.log_request_response,
            log_body = self.config.log_body,
            emission = ?self.config.log_emission,
            "http client built"
        );

        Ok(HttpClient {
            transport,
            emitter: LogEmitter::new(sink, self.config.log_emission),
            config: Arc::new(self.config),
        })
    }
}
