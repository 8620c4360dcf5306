//! HTTP transport implementation

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::time::{Duration, Instant};

use super::request::Request;
use super::response::Response;
use crate::app::ScannerConfig;
use crate::error::HttpError;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

/// Sends a request and returns the response
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> Result<Response, HttpError>;
}

/// Transport settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upstream proxy
    pub proxy: Option<String>,

    /// Verify TLS certificates
    pub verify_tls: bool,

    /// Default timeout in seconds
    pub timeout: u64,

    /// Retries after a failed attempt
    pub retry: u32,

    /// User agent used when the request carries none
    pub user_agent: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from(&ScannerConfig::default())
    }
}

impl From<&ScannerConfig> for TransportConfig {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            proxy: config.proxy.clone(),
            verify_tls: config.verify_tls,
            timeout: config.timeout,
            retry: config.retry,
            user_agent: config.user_agent.clone(),
        }
    }
}

/// reqwest-backed transport
pub struct ReqwestTransport {
    /// Client that follows redirects
    following: reqwest::Client,

    /// Client that surfaces the first redirect response
    direct: reqwest::Client,

    config: TransportConfig,
}

impl ReqwestTransport {
    /// Create a new transport
    pub fn new(config: TransportConfig) -> Result<Self, HttpError> {
        let following = Self::client(&config, reqwest::redirect::Policy::limited(10))?;
        let direct = Self::client(&config, reqwest::redirect::Policy::none())?;

        Ok(Self {
            following,
            direct,
            config,
        })
    }

    fn client(
        config: &TransportConfig,
        policy: reqwest::redirect::Policy,
    ) -> Result<reqwest::Client, HttpError> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .redirect(policy)
            .danger_accept_invalid_certs(!config.verify_tls);

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| HttpError::InvalidUrl(format!("proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| HttpError::RequestFailed(format!("failed to create HTTP client: {}", e)))
    }

    fn user_agent(&self) -> String {
        match &self.config.user_agent {
            Some(ua) => ua.clone(),
            None => USER_AGENTS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(USER_AGENTS[0])
                .to_string(),
        }
    }

    async fn attempt(&self, request: &Request) -> Result<Response, HttpError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| HttpError::InvalidMethod(request.method.clone()))?;
        let url = url::Url::parse(&request.url)
            .map_err(|e| HttpError::InvalidUrl(format!("{}: {}", request.url, e)))?;

        let client = if request.follow_redirects {
            &self.following
        } else {
            &self.direct
        };
        let mut builder = client.request(method, url);

        for (key, value) in &request.headers {
            if key.eq_ignore_ascii_case("Content-Length") {
                continue;
            }
            builder = builder.header(key.as_str(), value.as_str());
        }
        if request.header("User-Agent").is_none() {
            builder = builder.header("User-Agent", self.user_agent());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let start = Instant::now();
        let response = builder.send().await.map_err(|e| self.classify(e, request))?;
        let status = response.status();
        let http_version = format!("{:?}", response.version());

        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).to_string(),
                )
            })
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| self.classify(e, request))?;
        let duration = start.elapsed();

        let mut built = Response::new(status.as_u16(), headers, String::from_utf8_lossy(&body));
        built.status_text = status.canonical_reason().unwrap_or("").to_string();
        built.http_version = http_version;
        built.duration_ms = duration.as_millis() as u64;
        Ok(built)
    }

    fn classify(&self, error: reqwest::Error, request: &Request) -> HttpError {
        if error.is_timeout() {
            HttpError::Timeout(request.timeout.unwrap_or(self.config.timeout))
        } else if error.is_connect() {
            HttpError::ConnectionError(error.to_string())
        } else {
            HttpError::RequestFailed(error.to_string())
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &Request) -> Result<Response, HttpError> {
        let mut attempt = 0;
        loop {
            match self.attempt(request).await {
                Ok(response) => return Ok(response),
                Err(e @ (HttpError::InvalidMethod(_) | HttpError::InvalidUrl(_))) => return Err(e),
                Err(e) if attempt < self.config.retry => {
                    attempt += 1;
                    tracing::debug!(url = %request.url, attempt, error = %e, "Retrying request");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_creation() {
        let transport = ReqwestTransport::new(TransportConfig::default());
        assert!(transport.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_method_is_not_retried() {
        let transport = ReqwestTransport::new(TransportConfig {
            retry: 3,
            ..Default::default()
        })
        .unwrap();
        let request = Request::new("GE T", "http://127.0.0.1:9/");
        let err = transport.send(&request).await.unwrap_err();
        assert!(matches!(err, HttpError::InvalidMethod(_)));
    }
}
