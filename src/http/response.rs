//! HTTP response types

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// HTTP response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// HTTP status code
    pub status: u16,

    /// Status text (e.g., "OK", "Not Found")
    pub status_text: String,

    /// Response headers in wire order
    pub headers: Vec<(String, String)>,

    /// Response body
    pub body: String,

    /// Response time in milliseconds
    pub duration_ms: u64,

    /// Body length plus the length of every header line
    pub size: usize,

    /// HTTP version
    pub http_version: String,
}

impl Response {
    /// Build a response and compute its size
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<String>) -> Self {
        let mut response = Self {
            status,
            status_text: reason_phrase(status).to_string(),
            headers,
            body: body.into(),
            ..Default::default()
        };
        response.size = response.compute_size();
        response
    }

    /// Check if response is redirect (3xx)
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Response time in seconds
    pub fn response_time(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }

    /// Get a specific header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Status line and headers
    pub fn headers_text(&self) -> String {
        let mut text = format!("{} {} {}\n", self.http_version, self.status, self.status_text);
        for (k, v) in &self.headers {
            text.push_str(&format!("{}: {}\n", k, v));
        }
        text
    }

    /// Render the full response as text
    pub fn to_raw(&self) -> String {
        format!("{}\n{}", self.headers_text(), self.body)
    }

    /// Hex SHA-256 of the body
    pub fn checksum(&self) -> String {
        format!("{:x}", Sha256::digest(self.body.as_bytes()))
    }

    pub(crate) fn compute_size(&self) -> usize {
        self.body.len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len() + 2)
                .sum::<usize>()
    }
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 0,
            status_text: String::new(),
            headers: Vec::new(),
            body: String::new(),
            duration_ms: 0,
            size: 0,
            http_version: "HTTP/1.1".to_string(),
        }
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}
