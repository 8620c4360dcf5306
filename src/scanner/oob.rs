//! Out-of-band interaction lookup
//!
//! Blind issues are confirmed by checking whether a callback service saw a
//! token that was planted in a payload. The engine only needs the lookup
//! side; collecting interactions is left to whatever feeds the store.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Source of out-of-band evidence
pub trait OobPoller: Send + Sync {
    /// Whether an interaction carrying `token` was seen, plus its raw evidence
    fn lookup(&self, token: &str) -> (bool, String);
}

/// Poller used when no callback service is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPoller;

impl OobPoller for NullPoller {
    fn lookup(&self, token: &str) -> (bool, String) {
        tracing::debug!(token, "No out-of-band poller configured");
        (false, String::new())
    }
}

/// Type of OOB interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionType {
    Dns,
    Http,
    Smtp,
}

impl std::fmt::Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dns => write!(f, "DNS"),
            Self::Http => write!(f, "HTTP"),
            Self::Smtp => write!(f, "SMTP"),
        }
    }
}

/// A recorded OOB interaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    /// Type of interaction
    pub interaction_type: InteractionType,
    /// Source address
    pub remote_address: String,
    /// When it was received
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Raw data received
    pub raw_data: String,
}

impl Interaction {
    pub fn new(interaction_type: InteractionType, remote_address: &str, raw_data: &str) -> Self {
        Self {
            interaction_type,
            remote_address: remote_address.to_string(),
            timestamp: chrono::Utc::now(),
            raw_data: raw_data.to_string(),
        }
    }
}

/// In-memory interaction log
///
/// Interactions are matched by substring, so a token planted as a
/// subdomain is found in DNS names and HTTP Host headers alike.
#[derive(Debug, Default)]
pub struct InteractionStore {
    interactions: RwLock<Vec<Interaction>>,
}

impl InteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an interaction reported by a collector
    pub fn record(&self, interaction: Interaction) {
        tracing::debug!(
            kind = %interaction.interaction_type,
            from = %interaction.remote_address,
            "Recorded out-of-band interaction"
        );
        self.interactions.write().push(interaction);
    }

    pub fn len(&self) -> usize {
        self.interactions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.read().is_empty()
    }

    /// Interactions grouped by type
    pub fn by_type(&self) -> HashMap<InteractionType, usize> {
        let mut counts = HashMap::new();
        for interaction in self.interactions.read().iter() {
            *counts.entry(interaction.interaction_type).or_insert(0) += 1;
        }
        counts
    }
}

impl OobPoller for InteractionStore {
    fn lookup(&self, token: &str) -> (bool, String) {
        if token.is_empty() {
            return (false, String::new());
        }
        let evidence: Vec<String> = self
            .interactions
            .read()
            .iter()
            .filter(|i| i.raw_data.contains(token))
            .map(|i| {
                format!(
                    "[{}][{}] {} {}",
                    i.interaction_type,
                    i.timestamp.to_rfc3339(),
                    i.remote_address,
                    i.raw_data
                )
            })
            .collect();
        (!evidence.is_empty(), evidence.join("\n"))
    }
}
