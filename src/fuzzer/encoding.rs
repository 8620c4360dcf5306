//! Post-injection payload encoders
//!
//! A request template's `encoding` directive names the encoder applied to
//! every injected value before it is placed in the request.

use std::fmt;

/// Payload encoding types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// No encoding - raw payload
    #[default]
    None,
    /// Query escaping (space becomes `+`)
    Url,
    /// Query escaping applied twice
    DoubleUrl,
    /// Base64 encoding
    Base64,
    /// Lowercase hex of every byte
    Hex,
    /// HTML entity encoding
    HtmlEntity,
}

impl Encoding {
    /// Parse an `encoding` directive such as `URL` or `URL()`
    pub fn parse(directive: &str) -> Self {
        let name = directive.trim().trim_end_matches("()").to_lowercase();
        match name.as_str() {
            "" | "none" => Encoding::None,
            "url" | "urlencode" => Encoding::Url,
            "doubleurl" | "url2" => Encoding::DoubleUrl,
            "base64" | "b64" => Encoding::Base64,
            "hex" => Encoding::Hex,
            "html" => Encoding::HtmlEntity,
            other => {
                tracing::debug!(encoding = other, "Unknown encoding, sending payload raw");
                Encoding::None
            }
        }
    }

    /// Encode a payload using this encoding type
    pub fn encode(&self, payload: &str) -> String {
        match self {
            Encoding::None => payload.to_string(),
            Encoding::Url => query_escape(payload),
            Encoding::DoubleUrl => query_escape(&query_escape(payload)),
            Encoding::Base64 => base64_encode(payload),
            Encoding::Hex => payload.bytes().map(|b| format!("{:02x}", b)).collect(),
            Encoding::HtmlEntity => html_entity_encode(payload),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Encoding::None => "none",
            Encoding::Url => "url",
            Encoding::DoubleUrl => "doubleurl",
            Encoding::Base64 => "base64",
            Encoding::Hex => "hex",
            Encoding::HtmlEntity => "html",
        };
        write!(f, "{}", name)
    }
}

/// Escape a string for use in a query component
pub fn query_escape(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        match byte {
            // Unreserved characters (RFC 3986)
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            b' ' => encoded.push('+'),
            _ => {
                encoded.push('%');
                encoded.push_str(&format!("{:02X}", byte));
            }
        }
    }
    encoded
}

/// Base64 encode a string
pub fn base64_encode(input: &str) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.encode(input.as_bytes())
}

/// HTML entity encode (named entities for special chars, hex for others)
pub fn html_entity_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len() * 6);
    for ch in input.chars() {
        match ch {
            '<' => encoded.push_str("&lt;"),
            '>' => encoded.push_str("&gt;"),
            '&' => encoded.push_str("&amp;"),
            '"' => encoded.push_str("&quot;"),
            '\'' => encoded.push_str("&#x27;"),
            _ if !ch.is_alphanumeric() && !ch.is_whitespace() => {
                encoded.push_str(&format!("&#x{:X};", ch as u32));
            }
            _ => encoded.push(ch),
        }
    }
    encoded
}
