//! Payload loading for fuzz signatures

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{ResultExt, SigilError};
use crate::signature::{Signature, Target};
use crate::template::resolve;

/// A set of payloads for fuzzing
#[derive(Debug, Clone)]
pub struct PayloadSet {
    /// Name of the payload set
    pub name: String,
    /// List of payloads
    pub payloads: Vec<String>,
}

impl PayloadSet {
    /// Create a new payload set from a list
    pub fn new(name: &str, payloads: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            payloads,
        }
    }

    /// Load payloads from a wordlist file
    ///
    /// Blank lines and `#` comments are skipped.
    pub fn from_file(name: &str, path: &Path) -> Result<Self, SigilError> {
        let file = File::open(path)
            .with_context(format!("Failed to open wordlist: {}", path.display()))?;
        let reader = BufReader::new(file);

        let payloads: Vec<String> = reader
            .lines()
            .map_while(|line| line.ok())
            .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
            .collect();

        Ok(Self::new(name, payloads))
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

/// Inline payloads followed by every payload list
///
/// Payload list paths are template-resolved first. A signature without any
/// payload still runs its generators once with an empty payload.
pub fn load_payloads(signature: &Signature, target: &Target) -> Vec<String> {
    let mut payloads = signature.payloads.clone();

    for list in &signature.payload_lists {
        let path = resolve(list, target);
        match PayloadSet::from_file(&signature.id, Path::new(&path)) {
            Ok(set) => {
                tracing::debug!(signature = %signature.id, path = %path, count = set.len(), "Loaded payload list");
                payloads.extend(set.payloads);
            }
            Err(e) => tracing::warn!(signature = %signature.id, "Skipping payload list: {}", e),
        }
    }

    if payloads.is_empty() {
        payloads.push(String::new());
    }
    payloads
}
