#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Calls routed through a local HTTP proxy.

mod common;

use common::{TestProxy, recording_client_with};
use httpclient::{ClientConfig, HttpClientBuilder, HttpError, NO_HEADERS, RequestContext};
use httpmock::prelude::*;

#[tokio::test]
async fn plain_http_request_is_forwarded_in_absolute_form() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/via-proxy");
        then.status(200).body("proxied");
    });
    let proxy = TestProxy::start().await;
    let (client, sink) = recording_client_with(
        HttpClientBuilder::with_config(ClientConfig::for_testing()).proxy(proxy.url()),
    );

    let url = server.url("/via-proxy");
    let resp = client
        .request(&RequestContext::new(), "GET", &url, NO_HEADERS, None)
        .await
        .unwrap();
    assert_eq!(&resp.bytes().await.unwrap()[..], b"proxied");
    mock.assert_calls(1);

    let heads = proxy.heads();
    assert_eq!(heads.len(), 1);
    assert!(heads[0].starts_with(&format!("GET {url} HTTP/1.1\r\n")), "head: {}", heads[0]);
    assert!(!heads[0].to_ascii_lowercase().contains("proxy-authorization"));
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test]
async fn forwarded_request_carries_proxy_credentials_to_proxy_only() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.path("/secure").header_missing("proxy-authorization");
        then.status(200);
    });
    let proxy = TestProxy::start().await;
    let (client, _sink) = recording_client_with(
        HttpClientBuilder::with_config(ClientConfig::for_testing())
            .proxy(proxy.url_with_credentials("user", "secret")),
    );

    client
        .request(&RequestContext::new(), "GET", &server.url("/secure"), NO_HEADERS, None)
        .await
        .unwrap();
    mock.assert_calls(1);

    // base64("user:secret")
    let heads = proxy.heads();
    assert!(
        heads[0]
            .to_ascii_lowercase()
            .contains("proxy-authorization: basic dxnlcjpzzwnyzxq=")
    );
}

#[tokio::test]
async fn https_request_opens_connect_tunnel_with_credentials() {
    // Plain-text origin: the tunnel is established, the TLS handshake then fails
    let server = MockServer::start();
    let proxy = TestProxy::start().await;
    let (client, sink) = recording_client_with(
        HttpClientBuilder::with_config(ClientConfig::for_testing())
            .proxy(proxy.url_with_credentials("user", "secret")),
    );

    let url = format!("https://127.0.0.1:{}/tunnelled", server.port());
    let err = client
        .request(&RequestContext::new(), "GET", &url, NO_HEADERS, None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, HttpError::Tls(_) | HttpError::Transport(_)),
        "unexpected error: {err:?}"
    );

    let heads = proxy.heads();
    assert_eq!(heads.len(), 1);
    assert!(heads[0].starts_with(&format!("CONNECT 127.0.0.1:{} ", server.port())));
    assert!(
        heads[0]
            .to_ascii_lowercase()
            .contains("proxy-authorization: basic dxnlcjpzzwnyzxq=")
    );
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test]
async fn unreachable_proxy_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (client, sink) = recording_client_with(
        HttpClientBuilder::with_config(ClientConfig::for_testing())
            .proxy(format!("http://127.0.0.1:{port}")),
    );

    let err = client
        .request(&RequestContext::new(), "GET", "http://upstream.invalid/", NO_HEADERS, None)
        .await
        .unwrap_err();
    assert!(matches!(err, HttpError::Transport(_)), "unexpected error: {err:?}");
    assert_eq!(sink.records().len(), 1);
}

#[test]
fn proxy_enabled_without_url_fails_build() {
    let mut config = ClientConfig::for_testing();
    config.use_proxy = true;
    config.proxy_url = None;

    let result = HttpClientBuilder::with_config(config).build();
    assert!(matches!(result, Err(HttpError::InvalidProxyUrl { .. })));
}
