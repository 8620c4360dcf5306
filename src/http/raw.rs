//! Raw HTTP message parsing
//!
//! Signatures may carry a request (or a canned response) as plain HTTP text,
//! the way it would be copied out of an intercepting proxy.

use super::{Request, Response};
use crate::error::HttpError;

/// Split raw text into start line, header lines and body
fn split_message(raw: &str) -> (String, Vec<(String, String)>, String) {
    let normalized = raw.replace("\r\n", "\n");
    let normalized = normalized.trim_start_matches('\n');
    let (head, body) = match normalized.split_once("\n\n") {
        Some((h, b)) => (h.to_string(), b.to_string()),
        None => (normalized.to_string(), String::new()),
    };

    let mut lines = head.lines();
    let start = lines.next().unwrap_or_default().trim().to_string();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect();

    (start, headers, body)
}

/// Parse a raw HTTP request into a structured request
pub fn parse_raw_request(raw: &str) -> Result<Request, HttpError> {
    let (start, mut headers, body) = split_message(raw);

    let mut parts = start.split_whitespace();
    let (method, target) = match (parts.next(), parts.next()) {
        (Some(m), Some(t)) => (m.to_uppercase(), t.to_string()),
        _ => return Err(HttpError::MalformedRaw(format!("bad request line '{}'", start))),
    };

    let url = if target.starts_with("http://") || target.starts_with("https://") {
        target
    } else {
        let host = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Host"))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| HttpError::MalformedRaw("missing Host header".to_string()))?;

        let plain = headers.iter().any(|(k, v)| {
            (k.eq_ignore_ascii_case("Referer") || k.eq_ignore_ascii_case("Origin"))
                && v.starts_with("http://")
        });
        let scheme = if plain { "http" } else { "https" };
        format!("{}://{}{}", scheme, host, target)
    };

    // Recomputed by the transport
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case("Content-Length"));

    Ok(Request {
        method,
        url,
        headers,
        body,
        ..Default::default()
    })
}

/// Parse a raw HTTP response
pub fn parse_raw_response(raw: &str) -> Result<Response, HttpError> {
    let (start, headers, body) = split_message(raw);

    let mut parts = start.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(HttpError::MalformedRaw(format!("bad status line '{}'", start)));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| HttpError::MalformedRaw(format!("bad status code in '{}'", start)))?;

    let mut response = Response::new(status, headers, body);
    response.http_version = version.to_string();
    if let Some(reason) = parts.next() {
        response.status_text = reason.to_string();
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_raw_request() {
        let raw = "POST /login?next=/ HTTP/1.1\r\nHost: example.com\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 7\r\n\r\nu=admin";
        let req = parse_raw_request(raw).unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.url, "https://example.com/login?next=/");
        assert_eq!(req.body, "u=admin");
        assert!(req.header("Content-Length").is_none());
        assert_eq!(req.header("content-type"), Some("application/x-www-form-urlencoded"));
    }

    #[test]
    fn test_parse_raw_request_plain_http_from_referer() {
        let raw = "GET / HTTP/1.1\nHost: a.test:8080\nReferer: http://a.test:8080/x\n\n";
        let req = parse_raw_request(raw).unwrap();
        assert_eq!(req.url, "http://a.test:8080/");
    }

    #[test]
    fn test_parse_raw_request_without_host() {
        assert!(parse_raw_request("GET / HTTP/1.1\n\n").is_err());
        assert!(parse_raw_request("garbage").is_err());
    }

    #[test]
    fn test_parse_raw_response() {
        let raw = "HTTP/1.1 403 Forbidden\nServer: nginx\n\n<h1>denied</h1>";
        let resp = parse_raw_response(raw).unwrap();
        assert_eq!(resp.status, 403);
        assert_eq!(resp.status_text, "Forbidden");
        assert_eq!(resp.header("server"), Some("nginx"));
        assert_eq!(resp.body, "<h1>denied</h1>");
    }
}
