//! Signature YAML schema
//!
//! Only the fields the engine reads are modelled; unknown keys are ignored.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::SignatureError;

/// How a signature's requests are expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignatureType {
    #[default]
    Single,
    List,
    Fuzz,
    Routine,
}

/// Aggregate policy of the precondition group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    #[default]
    All,
    Any,
}

/// Signature metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureInfo {
    pub name: String,
    pub author: String,
    pub risk: String,
    pub confidence: String,
    pub category: String,
    pub tech: String,
    pub os: String,
}

/// A request template as written in a signature
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestTemplate {
    pub method: String,

    #[serde(alias = "path")]
    pub url: String,

    /// Single-key maps so repeated header names survive
    pub headers: Vec<HashMap<String, String>>,

    pub body: String,

    /// Raw HTTP request text, authoritative when present
    pub raw: String,

    /// Raw HTTP response text analysed instead of sending
    pub res: String,

    pub redirect: bool,

    pub repeat: u32,

    pub timeout: Option<u64>,

    /// Post-injection encoder
    pub encoding: String,

    pub detections: Vec<String>,

    pub conclusions: Vec<String>,

    pub middlewares: Vec<String>,

    pub conditions: Vec<String>,

    pub generators: Vec<String>,
}

impl RequestTemplate {
    /// Headers flattened in declaration order
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .flat_map(|map| {
                let mut pairs: Vec<_> = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                pairs.sort();
                pairs
            })
            .collect()
    }

    /// Template only runs middlewares
    pub fn is_middleware_only(&self) -> bool {
        self.url.is_empty()
            && self.raw.is_empty()
            && self.body.is_empty()
            && !self.middlewares.is_empty()
    }
}

/// A labelled baseline request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginTemplate {
    pub label: String,
    pub origin_req: RequestTemplate,
}

/// A variable source as declared
#[derive(Debug, Clone, PartialEq)]
pub enum VariableSource {
    /// Source text to classify and evaluate
    Text(String),
    /// A YAML sequence, used as-is
    List(Vec<String>),
}

/// A declarative vulnerability test
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Signature {
    pub id: String,

    #[serde(rename = "type")]
    pub sign_type: SignatureType,

    pub level: u32,

    pub passive: bool,

    pub parallel: bool,

    /// Force sequential sending with one worker
    pub single: bool,

    /// Stop evaluating detections on a record after the first match
    pub donce: bool,

    /// Never store output for this signature
    pub noutput: bool,

    pub threads: usize,

    #[serde(rename = "match")]
    pub match_policy: MatchPolicy,

    pub info: SignatureInfo,

    pub origin: Option<RequestTemplate>,

    pub origins: Vec<OriginTemplate>,

    pub requests: Vec<RequestTemplate>,

    /// Precondition group
    pub crequests: Vec<RequestTemplate>,

    #[serde(deserialize_with = "lenient_strings")]
    pub payloads: Vec<String>,

    pub payload_lists: Vec<String>,

    pub variables: Vec<HashMap<String, serde_yaml::Value>>,

    /// Extra paths whose responses count as "not found"
    pub filtering_paths: Vec<String>,

    /// Use only `filtering_paths`, not the built-in random ones
    pub override_filter_paths: bool,

    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Signature {
    /// Parse a signature and apply metadata defaults
    pub fn from_yaml(content: &str, origin: &str) -> Result<Self, SignatureError> {
        let mut sign: Signature =
            serde_yaml::from_str(content).map_err(|e| SignatureError::ParseError {
                path: origin.to_string(),
                reason: e.to_string(),
            })?;

        if sign.id.trim().is_empty() {
            return Err(SignatureError::MissingId(origin.to_string()));
        }
        sign.apply_defaults();
        Ok(sign)
    }

    fn apply_defaults(&mut self) {
        if self.level == 0 {
            self.level = 1;
        }
        if self.info.name.is_empty() {
            self.info.name = self.id.clone();
        }
        if self.info.risk.is_empty() {
            self.info.risk = "Potential".to_string();
        }
        if self.info.confidence.is_empty() {
            self.info.confidence = "Firm".to_string();
        }
        if self.info.category.is_empty() {
            self.info.category = self
                .id
                .split('-')
                .next()
                .unwrap_or(&self.id)
                .to_string();
        }
    }

    /// Declared variables in order
    pub fn variable_sources(&self) -> Vec<(String, VariableSource)> {
        self.variables
            .iter()
            .flat_map(|map| map.iter())
            .filter_map(|(name, value)| {
                let source = match value {
                    serde_yaml::Value::Sequence(items) => {
                        VariableSource::List(items.iter().filter_map(scalar_to_string).collect())
                    }
                    other => VariableSource::Text(scalar_to_string(other)?),
                };
                Some((name.clone(), source))
            })
            .collect()
    }

    /// Any main request declares conclusions
    pub fn has_conclusions(&self) -> bool {
        self.requests.iter().any(|r| !r.conclusions.is_empty())
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values: Option<Vec<serde_yaml::Value>> = Option::deserialize(deserializer)?;
    Ok(values
        .unwrap_or_default()
        .iter()
        .filter_map(scalar_to_string)
        .collect())
}
