//! Scan output
//!
//! Matched records are stored as they are found through an `OutputSink`;
//! a `ScanReport` summarizes the whole run once every job is done.

mod hook;
mod sink;

pub use hook::{FoundHook, ShellHook};
pub use sink::FileSink;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use crate::error::OutputError;
use crate::scanner::{PassiveHit, Record, RecordState};

/// Persists matched records
pub trait OutputSink: Send + Sync {
    /// Store one matched record and return where it went
    fn store(&self, record: &Record) -> Result<PathBuf, OutputError>;

    /// Store one passive rule match and return where it went
    fn store_passive(&self, record: &Record, hit: &PassiveHit) -> Result<PathBuf, OutputError>;

    /// Tidy up once the scan is over
    fn finalize(&self) -> Result<(), OutputError>;
}

/// A confirmed match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Signature id
    pub signature: String,
    /// Signature risk
    pub risk: String,
    /// Signature confidence
    pub confidence: String,
    /// Request URL
    pub url: String,
    /// Detection that matched
    pub detect_string: String,
    /// Payload, for fuzz signatures
    pub payload: Option<String>,
    /// Stored record, when output is enabled
    pub output: Option<PathBuf>,
}

impl Finding {
    pub fn from_record(record: &Record) -> Self {
        Self {
            signature: record.signature.id.clone(),
            risk: record.signature.info.risk.clone(),
            confidence: record.signature.info.confidence.clone(),
            url: record.url().to_string(),
            detect_string: record.detect_string.clone(),
            payload: record.request.payload.clone(),
            output: record.raw_output.clone(),
        }
    }
}

/// Summary of a finished scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    /// Scan start time
    pub started_at: DateTime<Utc>,
    /// Scan end time
    pub finished_at: DateTime<Utc>,
    /// (url, signature) jobs run
    pub jobs: usize,
    /// Records that went through analysis
    pub analyzed: usize,
    /// Records dropped after a transport failure
    pub abandoned: usize,
    /// Passive rule matches
    #[serde(default)]
    pub passive: usize,
    /// Matches in discovery order
    pub findings: Vec<Finding>,
}

impl Default for ScanReport {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            jobs: 0,
            analyzed: 0,
            abandoned: 0,
            passive: 0,
            findings: Vec::new(),
        }
    }
}

impl ScanReport {
    /// Findings per risk level
    pub fn by_risk(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for finding in &self.findings {
            *counts.entry(finding.risk.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Number of distinct hosts with a finding
    pub fn unique_hosts(&self) -> usize {
        self.findings
            .iter()
            .filter_map(|f| url::Url::parse(&f.url).ok())
            .filter_map(|u| u.host_str().map(|h| h.to_string()))
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn duration_secs(&self) -> u64 {
        self.finished_at
            .signed_duration_since(self.started_at)
            .num_seconds()
            .max(0) as u64
    }

    /// Count one finished record
    pub fn add(&mut self, record: &Record) {
        match record.state {
            RecordState::Matched => {
                self.analyzed += 1;
                self.findings.push(Finding::from_record(record));
            }
            RecordState::NotMatched => self.analyzed += 1,
            RecordState::Abandoned => self.abandoned += 1,
            RecordState::Pending | RecordState::Sent => {}
        }
        self.passive += record.passive_hits;
    }

    /// Fold one job's counters into the report
    pub fn merge(&mut self, other: ScanReport) {
        self.jobs += other.jobs;
        self.analyzed += other.analyzed;
        self.abandoned += other.abandoned;
        self.passive += other.passive;
        self.findings.extend(other.findings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(signature: &str, risk: &str, url: &str) -> Finding {
        Finding {
            signature: signature.into(),
            risk: risk.into(),
            confidence: "Firm".into(),
            url: url.into(),
            detect_string: String::new(),
            payload: None,
            output: None,
        }
    }

    #[test]
    fn test_report_summary() {
        let mut report = ScanReport::default();
        report.merge(ScanReport {
            jobs: 2,
            analyzed: 5,
            findings: vec![
                finding("a", "High", "http://one.test/x"),
                finding("b", "High", "http://one.test/y"),
                finding("c", "Low", "http://two.test/"),
            ],
            ..Default::default()
        });

        assert_eq!(report.jobs, 2);
        assert_eq!(report.by_risk().get("High"), Some(&2));
        assert_eq!(report.unique_hosts(), 2);
    }

    #[test]
    fn test_report_serializes() {
        let report = ScanReport::default();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"findings\":[]"));
    }
}
