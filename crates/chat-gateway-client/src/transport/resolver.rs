//! Gateway URL lookup

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use chat_common::ClientConfig;

use crate::error::{GatewayError, GatewayResult};

/// Finds the socket URL to connect to
#[async_trait]
pub trait GatewayUrlResolver: Send + Sync + 'static {
    async fn resolve(&self, token: &str) -> GatewayResult<String>;
}

/// Always returns the same URL
#[derive(Debug, Clone)]
pub struct StaticGatewayResolver {
    url: String,
}

impl StaticGatewayResolver {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl GatewayUrlResolver for StaticGatewayResolver {
    async fn resolve(&self, _token: &str) -> GatewayResult<String> {
        Ok(self.url.clone())
    }
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    url: String,
}

/// Asks the REST API for the gateway URL: `GET {base}/gateway`
#[derive(Debug, Clone)]
pub struct HttpGatewayResolver {
    client: reqwest::Client,
    base_url: String,
    protocol_version: u8,
}

impl HttpGatewayResolver {
    pub fn new(base_url: impl Into<String>, protocol_version: u8) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            protocol_version,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/gateway", self.base_url)
    }

    /// Append the protocol version and encoding unless the server already set a query
    fn socket_url(&self, url: &str) -> String {
        if url.contains('?') {
            url.to_string()
        } else {
            format!(
                "{}/?v={}&encoding=json",
                url.trim_end_matches('/'),
                self.protocol_version
            )
        }
    }
}

#[async_trait]
impl GatewayUrlResolver for HttpGatewayResolver {
    async fn resolve(&self, token: &str) -> GatewayResult<String> {
        let response = self
            .client
            .get(self.endpoint())
            .header(reqwest::header::AUTHORIZATION, token)
            .send()
            .await
            .map_err(|e| GatewayError::transport(format!("gateway lookup failed: {e}")))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                return Err(GatewayError::Authentication(
                    "token rejected by gateway lookup".to_string(),
                ))
            }
            status if !status.is_success() => {
                return Err(GatewayError::transport(format!(
                    "gateway lookup returned {status}"
                )))
            }
            _ => {}
        }

        let body: GatewayResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::transport(format!("invalid gateway lookup body: {e}")))?;

        let url = self.socket_url(&body.url);
        tracing::debug!(url = %url, "Resolved gateway URL");
        Ok(url)
    }
}

/// Resolver chosen by configuration: the fixed `GATEWAY_URL` if set, else the REST lookup
pub fn resolver_from_config(config: &ClientConfig) -> Arc<dyn GatewayUrlResolver> {
    match &config.api.gateway_url {
        Some(url) => Arc::new(StaticGatewayResolver::new(url.clone())),
        None => Arc::new(HttpGatewayResolver::new(
            config.api.base_url.clone(),
            config.gateway.protocol_version,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// One-shot HTTP server returning a canned response and reporting the request head
    async fn http_once(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&buf[..n]).to_string());

            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        (format!("http://{addr}"), rx)
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticGatewayResolver::new("ws://localhost:1");
        assert_eq!(resolver.resolve("tok").await.unwrap(), "ws://localhost:1");
    }

    #[tokio::test]
    async fn test_http_lookup_sends_token_and_appends_query() {
        let (base, request) = http_once("200 OK", r#"{"url":"wss://gateway.example"}"#).await;
        let resolver = HttpGatewayResolver::new(format!("{base}/"), 6);

        let url = resolver.resolve("secret-token").await.unwrap();
        assert_eq!(url, "wss://gateway.example/?v=6&encoding=json");

        let head = request.await.unwrap().to_lowercase();
        assert!(head.starts_with("get /gateway "));
        assert!(head.contains("authorization: secret-token"));
    }

    #[tokio::test]
    async fn test_http_lookup_keeps_existing_query() {
        let (base, _request) = http_once("200 OK", r#"{"url":"wss://g.example/?v=9"}"#).await;
        let url = HttpGatewayResolver::new(base, 6).resolve("t").await.unwrap();
        assert_eq!(url, "wss://g.example/?v=9");
    }

    #[tokio::test]
    async fn test_http_unauthorized_is_authentication_error() {
        let (base, _request) = http_once("401 Unauthorized", r#"{"message":"401: Unauthorized"}"#).await;
        let err = HttpGatewayResolver::new(base, 6).resolve("bad").await.unwrap_err();
        assert!(matches!(err, GatewayError::Authentication(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_http_server_error_is_transport_error() {
        let (base, _request) = http_once("502 Bad Gateway", "{}").await;
        let err = HttpGatewayResolver::new(base, 6).resolve("t").await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }

    #[tokio::test]
    async fn test_resolver_from_config_prefers_fixed_url() {
        let mut config = ClientConfig::default();
        config.api.gateway_url = Some("ws://fixed".into());
        let resolver = resolver_from_config(&config);
        assert_eq!(resolver.resolve("t").await.unwrap(), "ws://fixed");
    }
}
