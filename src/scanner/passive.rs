//! Passive analysis
//!
//! Runs passive rule sets over records that already have a response.

use super::detector::{Evaluator, Writes};
use super::record::Record;
use crate::signature::{Passive, PassiveRule};

/// A passive rule that matched a record
#[derive(Debug, Clone, PartialEq)]
pub struct PassiveHit {
    pub rule_id: String,
    pub reason: String,
    pub risk: String,
    pub confidence: String,
    /// Detection that matched
    pub detection: String,
    /// Latest evidence produced by the rule's detections
    pub extra: String,
}

/// Evaluates passive rule sets
#[derive(Debug, Clone)]
pub struct PassiveScanner {
    passives: Vec<Passive>,
    level: u32,
    select: String,
}

impl PassiveScanner {
    pub fn new(passives: Vec<Passive>, level: u32) -> Self {
        Self {
            passives,
            level,
            select: "*".to_string(),
        }
    }

    /// Only run rules whose `name-ruleid` contains `select`; `*` runs all
    pub fn with_select(mut self, select: &str) -> Self {
        self.select = select.trim().to_lowercase();
        if self.select.is_empty() {
            self.select = "*".to_string();
        }
        self
    }

    /// Rules that pass the level and selection filters
    pub fn rules(&self) -> impl Iterator<Item = &PassiveRule> {
        self.passives
            .iter()
            .filter(|passive| passive.level <= self.level)
            .flat_map(|passive| passive.rules.iter().map(move |rule| (passive, rule)))
            .filter(|(_, rule)| !rule.detections.is_empty())
            .filter(|(passive, rule)| self.select == "*" || passive.qualified_id(rule).contains(&self.select))
            .map(|(_, rule)| rule)
    }

    /// Run every selected rule against a record
    ///
    /// Passive detections see the record but never write to the target.
    pub fn scan(&self, evaluator: &Evaluator, record: &Record) -> Vec<PassiveHit> {
        let mut hits = Vec::new();
        for rule in self.rules() {
            let mut extra = String::new();
            for detection in &rule.detections {
                tracing::trace!(rule = %rule.id, reason = %rule.reason, "Passive detection");
                let mut scratch = Writes::new();
                let (evidence, matched) = evaluator.detect(detection, record, &mut scratch);
                if !evidence.is_empty() {
                    extra = evidence;
                }
                if matched {
                    hits.push(PassiveHit {
                        rule_id: rule.id.clone(),
                        reason: rule.reason.clone(),
                        risk: rule.risk.clone(),
                        confidence: rule.confidence.clone(),
                        detection: detection.clone(),
                        extra: extra.clone(),
                    });
                }
            }
        }
        hits
    }
}
