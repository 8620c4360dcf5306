//! Checksum filtering
//!
//! Before a signature runs, a handful of paths that should not exist are
//! fetched from the target. Any later response whose body has the same
//! checksum is a catch-all page and never counts as a match.

use std::collections::HashSet;
use std::sync::Arc;

use crate::http::{Request, Transport};
use crate::signature::Signature;
use crate::template::random_string;

/// Collects "not found" checksums for a target
#[derive(Clone)]
pub struct ChecksumFilter {
    transport: Arc<dyn Transport>,
    /// Random paths fetched for every signature
    base_paths: Vec<String>,
}

impl ChecksumFilter {
    /// Filter without built-in paths; only signatures' own paths are fetched
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base_paths: Vec::new(),
        }
    }

    /// Also fetch a fixed set of random paths for every signature
    pub fn with_base_paths(mut self) -> Self {
        self.base_paths = base_paths();
        self
    }

    /// Paths to fetch for one signature
    pub fn paths_for(&self, signature: &Signature) -> Vec<String> {
        let mut paths = Vec::new();
        if !signature.override_filter_paths {
            paths.extend(self.base_paths.iter().cloned());
        }
        paths.extend(signature.filtering_paths.iter().cloned());
        paths
    }

    /// Fetch every filtering path under `url` and return the body checksums
    ///
    /// A send error stops collection and keeps what was gathered so far.
    pub async fn checksums(&self, url: &str, signature: &Signature) -> HashSet<String> {
        let mut checksums = HashSet::new();
        for path in self.paths_for(signature) {
            let request = Request::new("GET", &join_url(url, &path));
            match self.transport.send(&request).await {
                Ok(response) => {
                    let checksum = response.checksum();
                    tracing::debug!(url = %request.url, checksum = %checksum, "Filtering checksum");
                    checksums.insert(checksum);
                }
                Err(e) => {
                    tracing::debug!(url = %request.url, error = %e, "Filtering request failed");
                    break;
                }
            }
        }
        checksums
    }
}

fn base_paths() -> Vec<String> {
    vec![
        format!("hopetoget404{}", random_string(6)),
        format!("{}/{}", random_string(16), random_string(5)),
        format!("{}.html", random_string(16)),
        format!("{}.php~", random_string(16)),
        format!("{}.%00", random_string(16)),
        format!("{}.json", random_string(16)),
    ]
}

/// `url` and `path` joined by exactly one slash
fn join_url(url: &str, path: &str) -> String {
    format!("{}/{}", url.trim_end_matches('/'), path.trim_start_matches('/'))
}
