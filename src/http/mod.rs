//! HTTP module
//!
//! Request and response types, the transport seam used by the scanner,
//! and parsing of raw HTTP messages embedded in signatures.

mod client;
mod raw;
mod request;
mod response;

pub use client::{ReqwestTransport, Transport, TransportConfig};
pub use raw::{parse_raw_request, parse_raw_response};
pub use request::{Request, RequestBuilder};
pub use response::Response;
