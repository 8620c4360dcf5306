//! Scan records
//!
//! A record is one concrete request going through send and analysis, along
//! with everything detections can look at.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::http::{Request, Response};
use crate::reporting::ScanReport;
use crate::signature::{Signature, Target};

/// Lifecycle of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordState {
    #[default]
    Pending,
    Sent,
    Matched,
    NotMatched,
    /// Transport failed; never analyzed
    Abandoned,
}

/// A request and the response it produced
#[derive(Debug, Clone)]
pub struct Exchange {
    pub request: Request,
    pub response: Response,
}

/// Baseline exchanges sent before a signature's main requests
#[derive(Debug, Clone, Default)]
pub struct Origins {
    /// First origin sent
    pub primary: Option<Exchange>,
    /// Origins by label
    pub labelled: HashMap<String, Exchange>,
}

impl Origins {
    pub fn insert(&mut self, label: &str, exchange: Exchange) {
        if !label.is_empty() {
            self.labelled.insert(label.to_lowercase(), exchange.clone());
        }
        if self.primary.is_none() {
            self.primary = Some(exchange);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none()
    }
}

/// One request moving through the pipeline
#[derive(Debug, Clone)]
pub struct Record {
    /// Request as sent
    pub request: Request,

    /// Response, when one was received or parsed
    pub response: Option<Response>,

    /// Baseline exchanges for this signature run
    pub origins: Arc<Origins>,

    /// Owning signature
    pub signature: Arc<Signature>,

    /// Variables visible to this record's expressions
    pub vars: Target,

    /// Current lifecycle state
    pub state: RecordState,

    /// A detection matched
    pub vulnerable: bool,

    /// The detection that matched
    pub detect_string: String,

    /// Evidence produced by detection built-ins
    pub extra_output: String,

    /// Output of middleware commands
    pub middleware_output: String,

    /// Where the record was stored
    pub raw_output: Option<PathBuf>,

    /// Response body matches a filtering checksum
    pub filtered: bool,

    /// Passive rules that matched
    pub passive_hits: usize,
}

impl Record {
    pub fn new(request: Request, signature: Arc<Signature>, vars: Target, origins: Arc<Origins>) -> Self {
        Self {
            request,
            response: None,
            origins,
            signature,
            vars,
            state: RecordState::Pending,
            vulnerable: false,
            detect_string: String::new(),
            extra_output: String::new(),
            middleware_output: String::new(),
            raw_output: None,
            filtered: false,
            passive_hits: 0,
        }
    }

    /// URL shown in output, falling back to the target URL
    pub fn url(&self) -> &str {
        if self.request.url.is_empty() {
            self.vars.get("URL").map(String::as_str).unwrap_or("")
        } else {
            &self.request.url
        }
    }

    /// Text of a named component
    ///
    /// Names are case-insensitive. Unknown names that match no origin label
    /// fall back to the response.
    pub fn component(&self, name: &str) -> String {
        let name = name.trim().to_lowercase();
        match name.as_str() {
            "request" => self.request.to_raw(),
            "orequest" => self
                .origins
                .primary
                .as_ref()
                .map(|o| o.request.to_raw())
                .unwrap_or_default(),
            "oresponse" => self
                .origins
                .primary
                .as_ref()
                .map(|o| o.response.to_raw())
                .unwrap_or_default(),
            "resheader" | "resheaders" => self
                .response
                .as_ref()
                .map(|r| r.headers_text())
                .unwrap_or_default(),
            "resbody" => self.response.as_ref().map(|r| r.body.clone()).unwrap_or_default(),
            "middleware" => self.middleware_output.clone(),
            label => match self.origins.labelled.get(label) {
                Some(origin) => origin.response.to_raw(),
                None => self.response_text(),
            },
        }
    }

    fn response_text(&self) -> String {
        match &self.response {
            Some(response) => response.to_raw(),
            None => self.middleware_output.clone(),
        }
    }

    pub fn origin_response(&self) -> Option<&Response> {
        self.origins.primary.as_ref().map(|o| &o.response)
    }
}

/// Tallies a job's records as they complete
///
/// Full records are only held on to when the log was created with
/// [`RecordLog::retaining`].
#[derive(Clone, Default)]
pub struct RecordLog {
    inner: Arc<Mutex<LogState>>,
}

#[derive(Default)]
struct LogState {
    report: ScanReport,
    records: Option<Vec<Record>>,
}

impl RecordLog {
    /// Count records without keeping them
    pub fn tally() -> Self {
        Self::default()
    }

    /// Count records and keep every one of them
    pub fn retaining() -> Self {
        let log = Self::default();
        log.inner.lock().records = Some(Vec::new());
        log
    }

    pub fn push(&self, record: Record) {
        let mut state = self.inner.lock();
        state.report.add(&record);
        if let Some(records) = state.records.as_mut() {
            records.push(record);
        }
    }

    /// Counters so far and the kept records, leaving the log empty
    pub fn finish(&self) -> (ScanReport, Vec<Record>) {
        let mut state = self.inner.lock();
        let report = std::mem::take(&mut state.report);
        let records = state.records.as_mut().map(std::mem::take).unwrap_or_default();
        (report, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        let request = Request::new("GET", "http://x.test/a");
        let mut origins = Origins::default();
        origins.insert(
            "",
            Exchange {
                request: Request::new("GET", "http://x.test/"),
                response: Response::new(200, vec![], "baseline"),
            },
        );
        origins.insert(
            "Login",
            Exchange {
                request: Request::new("POST", "http://x.test/login"),
                response: Response::new(302, vec![], "login page"),
            },
        );
        let mut record = Record::new(request, Arc::new(Signature::default()), Target::new(), Arc::new(origins));
        record.response = Some(Response::new(
            500,
            vec![("Server".into(), "nginx".into())],
            "boom",
        ));
        record
    }

    #[test]
    fn test_components() {
        let record = record();
        assert!(record.component("RESPONSE").contains("boom"));
        assert!(record.component("").contains("500"));
        assert_eq!(record.component("resbody"), "boom");
        assert!(record.component("resheaders").contains("Server: nginx"));
        assert!(!record.component("resheader").contains("boom"));
        assert!(record.component("request").starts_with("GET /a HTTP/1.1"));
        assert!(record.component("oresponse").contains("baseline"));
        assert!(record.component("login").contains("login page"));
    }

    #[test]
    fn test_first_origin_is_primary() {
        let record = record();
        assert_eq!(record.origin_response().map(|r| r.status), Some(200));
    }

    #[test]
    fn test_middleware_output_stands_in_for_response() {
        let mut record = record();
        record.response = None;
        record.middleware_output = "uid=0(root)".into();
        assert_eq!(record.component("response"), "uid=0(root)");
        assert_eq!(record.component("middleware"), "uid=0(root)");
    }

    #[test]
    fn test_url_falls_back_to_target() {
        let mut record = record();
        record.request.url.clear();
        record.vars.insert("URL".into(), "http://x.test/".into());
        assert_eq!(record.url(), "http://x.test/");
    }

    #[test]
    fn test_tally_log_counts_without_keeping() {
        let log = RecordLog::tally();
        for state in [RecordState::Matched, RecordState::NotMatched, RecordState::Abandoned] {
            let mut record = record();
            record.state = state;
            log.clone().push(record);
        }
        let (report, records) = log.finish();
        assert!(records.is_empty());
        assert_eq!(report.analyzed, 2);
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].url, "http://x.test/a");
    }

    #[test]
    fn test_retaining_log_keeps_order() {
        let log = RecordLog::retaining();
        for path in ["one", "two"] {
            let mut record = record();
            record.request.url = format!("http://x.test/{}", path);
            record.state = RecordState::NotMatched;
            log.push(record);
        }
        let (report, records) = log.finish();
        assert_eq!(report.analyzed, 2);
        let urls: Vec<_> = records.iter().map(|r| r.request.url.as_str()).collect();
        assert_eq!(urls, vec!["http://x.test/one", "http://x.test/two"]);
    }
}
