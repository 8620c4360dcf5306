//! HTTP request types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A concrete request produced from a signature template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique request ID
    pub id: String,

    /// HTTP method (empty for middleware-only requests)
    pub method: String,

    /// Request URL
    pub url: String,

    /// Request headers in wire order, duplicates allowed
    pub headers: Vec<(String, String)>,

    /// Request body
    pub body: String,

    /// Request timeout in seconds
    pub timeout: Option<u64>,

    /// Follow redirects
    pub follow_redirects: bool,

    /// Number of times the request is sent
    pub repeat: u32,

    /// Detection expressions
    pub detections: Vec<String>,

    /// Conclusion expressions
    pub conclusions: Vec<String>,

    /// Middleware expressions
    pub middlewares: Vec<String>,

    /// Gating expressions evaluated before sending
    pub conditions: Vec<String>,

    /// Raw response used instead of sending
    pub raw_response: Option<String>,

    /// Payload injected by a generator
    pub payload: Option<String>,

    /// Request only runs middlewares
    pub middleware_only: bool,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method: "GET".to_string(),
            url: String::new(),
            headers: Vec::new(),
            body: String::new(),
            timeout: None,
            follow_redirects: false,
            repeat: 1,
            detections: Vec::new(),
            conclusions: Vec::new(),
            middlewares: Vec::new(),
            conditions: Vec::new(),
            raw_response: None,
            payload: None,
            middleware_only: false,
        }
    }
}

impl Request {
    /// Create a new request
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Create a builder for constructing requests
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Get a specific header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace the first header with this name, or append it
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// Host portion of the URL
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
    }

    /// Give the copy a fresh id
    pub fn fork(&self) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ..self.clone()
        }
    }

    /// Render the request as HTTP/1.1 text
    pub fn to_raw(&self) -> String {
        let (target, host) = match url::Url::parse(&self.url) {
            Ok(u) => {
                let mut target = u.path().to_string();
                if let Some(q) = u.query() {
                    target.push('?');
                    target.push_str(q);
                }
                let host = match (u.host_str(), u.port()) {
                    (Some(h), Some(p)) => format!("{}:{}", h, p),
                    (Some(h), None) => h.to_string(),
                    _ => String::new(),
                };
                (target, host)
            }
            Err(_) => (self.url.clone(), String::new()),
        };

        let mut raw = format!("{} {} HTTP/1.1\n", self.method, target);
        if self.header("Host").is_none() && !host.is_empty() {
            raw.push_str(&format!("Host: {}\n", host));
        }
        for (k, v) in &self.headers {
            raw.push_str(&format!("{}: {}\n", k, v));
        }
        raw.push('\n');
        raw.push_str(&self.body);
        raw
    }
}

/// Builder for constructing requests
#[derive(Debug, Default)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Set the request method
    pub fn method(mut self, method: &str) -> Self {
        self.request.method = method.to_uppercase();
        self
    }

    /// Set the request URL
    pub fn url(mut self, url: &str) -> Self {
        self.request.url = url.to_string();
        self
    }

    /// Add a header
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.request.headers.push((key.to_string(), value.to_string()));
        self
    }

    /// Set the request body
    pub fn body(mut self, body: &str) -> Self {
        self.request.body = body.to_string();
        self
    }

    /// Add a detection expression
    pub fn detection(mut self, expression: &str) -> Self {
        self.request.detections.push(expression.to_string());
        self
    }

    /// Add a conclusion expression
    pub fn conclusion(mut self, expression: &str) -> Self {
        self.request.conclusions.push(expression.to_string());
        self
    }

    /// Set follow redirects
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.request.follow_redirects = follow;
        self
    }

    /// Build the request
    pub fn build(self) -> Request {
        self.request
    }
}
