//! Engine behavior across build, dispatch and analysis

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::app::Config;
use crate::error::HttpError;
use crate::http::{Request, Response, Transport};
use crate::scripting::{Functions, Value};
use crate::signature::{Passive, Signature};

/// Answers every request with its own URL as the body
#[derive(Default)]
struct StubTransport {
    sent: Mutex<Vec<String>>,
}

impl StubTransport {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&self, request: &Request) -> Result<Response, HttpError> {
        self.sent.lock().push(request.url.clone());
        if request.url.contains("unreachable") {
            return Err(HttpError::Timeout(1));
        }
        let status = if request.url.contains("missing") { 404 } else { 200 };
        Ok(Response::new(status, vec![], request.url.clone()))
    }
}

/// Holds each send open briefly and records the most sends in flight
#[derive(Default)]
struct SlowTransport {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowTransport {
    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for SlowTransport {
    async fn send(&self, request: &Request) -> Result<Response, HttpError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Response::new(200, vec![], request.url.clone()))
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.output.disabled = true;
    config.scanner.threads = 4;
    config.scanner.concurrency = 2;
    config
}

fn engine(transport: Arc<StubTransport>) -> ScanEngine {
    ScanEngine::builder(&config(), transport).build()
}

fn signature(yaml: &str) -> Arc<Signature> {
    Arc::new(Signature::from_yaml(yaml, "test").unwrap())
}

fn urls() -> Vec<String> {
    vec!["http://app.test".to_string()]
}

#[tokio::test]
async fn test_conclusion_visible_to_next_request() {
    let sign = signature(
        r#"
id: chain-token
parallel: true
requests:
  - url: "{{.BaseURL}}/login"
    conclusions:
      - "SetValue('token', 'abc')"
  - url: "{{.BaseURL}}/api?token={{.token}}"
    detections:
      - "StringSearch('resbody', 'token=abc')"
"#,
    );
    let transport = Arc::new(StubTransport::default());
    let report = engine(transport.clone()).scan(&urls(), &[sign]).await;

    assert_eq!(transport.sent(), vec!["http://app.test/login", "http://app.test/api?token=abc"]);
    assert_eq!(report.findings.len(), 1);
}

#[tokio::test]
async fn test_detect_once_stops_after_first_match() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut functions = Functions::new();
    functions.register("Mark", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Bool(true))
    });

    let sign = signature(
        r#"
id: detect-once-sig
donce: true
requests:
  - url: "{{.URL}}"
    detections:
      - "Mark()"
      - "Mark()"
      - "Mark()"
"#,
    );
    let transport = Arc::new(StubTransport::default());
    let engine = ScanEngine::builder(&config(), transport).functions(functions).build();
    let report = engine.scan(&urls(), &[sign]).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].detect_string, "Mark()");
}

const GATED: &str = r#"
id: gated
match: POLICY
crequests:
  - url: "{{.BaseURL}}/check-one"
    detections:
      - "StatusCode() == 200"
  - url: "{{.BaseURL}}/check-missing"
    detections:
      - "StatusCode() == 200"
requests:
  - url: "{{.BaseURL}}/main"
"#;

#[tokio::test]
async fn test_precondition_all_blocks_main_group() {
    let transport = Arc::new(StubTransport::default());
    let sign = signature(&GATED.replace("POLICY", "all"));
    engine(transport.clone()).scan(&urls(), &[sign]).await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(!sent.iter().any(|u| u.ends_with("/main")));
}

#[tokio::test]
async fn test_precondition_any_lets_main_group_run() {
    let transport = Arc::new(StubTransport::default());
    let sign = signature(&GATED.replace("POLICY", "any"));
    engine(transport.clone()).scan(&urls(), &[sign]).await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent.last().map(String::as_str), Some("http://app.test/main"));
}

#[tokio::test]
async fn test_empty_url_is_never_dispatched() {
    let sign = signature(
        r#"
id: optional
requests:
  - url: "{{.notDefined}}"
  - url: "{{.BaseURL}}/real"
"#,
    );
    let transport = Arc::new(StubTransport::default());
    engine(transport.clone()).scan(&urls(), &[sign]).await;
    assert_eq!(transport.sent(), vec!["http://app.test/real"]);
}

#[tokio::test]
async fn test_variable_rows_are_zipped() {
    let sign = signature(
        r#"
id: rows
single: true
variables:
  - a: "[1,2,3]"
  - b: "[x,y]"
requests:
  - url: "{{.BaseURL}}/{{.a}}/{{.b}}"
"#,
    );
    let transport = Arc::new(StubTransport::default());
    engine(transport.clone()).scan(&urls(), &[sign]).await;
    assert_eq!(
        transport.sent(),
        vec!["http://app.test/1/x", "http://app.test/2/y", "http://app.test/3/x"]
    );
}

#[tokio::test]
async fn test_fuzz_signature_end_to_end() {
    let sign = signature(
        r#"
id: reflect-fuzz
type: fuzz
payloads:
  - PWNED
requests:
  - url: "{{.BaseURL}}/search?a=1&b=2"
    generators:
      - "Query('{{.payload}}')"
    detections:
      - "StringSearch('resbody', '{{.payload}}')"
"#,
    );
    let transport = Arc::new(StubTransport::default());
    let report = engine(transport.clone()).scan(&urls(), &[sign]).await;

    let mut sent = transport.sent();
    sent.sort();
    assert_eq!(
        sent,
        vec!["http://app.test/search?a=1&b=PWNED", "http://app.test/search?a=PWNED&b=2"]
    );
    assert_eq!(report.findings.len(), 2);
    assert!(report.findings.iter().all(|f| f.payload.as_deref() == Some("PWNED")));
}

#[tokio::test]
async fn test_origin_available_to_detections() {
    let sign = signature(
        r#"
id: with-origin
origin:
  url: "{{.BaseURL}}/baseline"
requests:
  - url: "{{.BaseURL}}/health"
    detections:
      - "OriginStatusCode() == 200 && StringSearch('oresponse', 'baseline')"
"#,
    );
    let transport = Arc::new(StubTransport::default());
    let report = engine(transport.clone()).scan(&urls(), &[sign]).await;
    assert_eq!(transport.sent()[0], "http://app.test/baseline");
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].url, "http://app.test/health");
}

#[tokio::test]
async fn test_transport_failure_abandons_only_that_record() {
    let sign = signature(
        r#"
id: flaky
threads: 2
requests:
  - url: "http://unreachable.test/"
    detections:
      - "StatusCode() == 200"
  - url: "{{.BaseURL}}/ok"
    detections:
      - "StatusCode() == 200"
"#,
    );
    let transport = Arc::new(StubTransport::default());
    let report = engine(transport).scan(&urls(), &[sign]).await;
    assert_eq!(report.abandoned, 1);
    assert_eq!(report.analyzed, 1);
    assert_eq!(report.findings.len(), 1);
}

#[tokio::test]
async fn test_routine_keeps_records() {
    let routine = signature(
        r#"
id: routine-steps
type: routine
requests:
  - url: "{{.BaseURL}}/one"
  - url: "{{.BaseURL}}/two"
"#,
    );
    let single = signature("id: plain\nrequests:\n  - url: \"{{.URL}}\"\n");
    let engine = engine(Arc::new(StubTransport::default()));

    let outcome = engine.run_job(Job::new("http://app.test", routine)).await;
    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.records[1].request.url, "http://app.test/two");

    let outcome = engine.run_job(Job::new("http://app.test", single)).await;
    assert!(outcome.records.is_empty());
    assert_eq!(outcome.report.analyzed, 1);
}

#[tokio::test]
async fn test_fuzz_signature_origin_is_sent_once() {
    let sign = signature(
        r#"
id: fuzz-origin
type: fuzz
payloads:
  - PWNED
origin:
  url: "{{.BaseURL}}/baseline"
requests:
  - url: "{{.BaseURL}}/search?q=1"
    generators:
      - "Query('{{.payload}}')"
    detections:
      - "OriginStatusCode() == 200 && StringSearch('resbody', '{{.payload}}')"
"#,
    );
    let transport = Arc::new(StubTransport::default());
    let report = engine(transport.clone()).scan(&urls(), &[sign]).await;

    let sent = transport.sent();
    assert_eq!(sent, vec!["http://app.test/baseline", "http://app.test/search?q=PWNED"]);
    assert_eq!(report.findings.len(), 1);
}

#[tokio::test]
async fn test_fuzz_signature_precondition_gates_injection() {
    let sign = signature(
        r#"
id: fuzz-gated
type: fuzz
match: any
payloads:
  - PWNED
crequests:
  - url: "{{.BaseURL}}/check"
    detections:
      - "StatusCode() == 200"
requests:
  - url: "{{.BaseURL}}/search?q=1"
    generators:
      - "Query('{{.payload}}')"
    detections:
      - "StringSearch('resbody', '{{.payload}}')"
"#,
    );
    let transport = Arc::new(StubTransport::default());
    let report = engine(transport.clone()).scan(&urls(), &[sign]).await;

    assert_eq!(transport.sent(), vec!["http://app.test/check", "http://app.test/search?q=PWNED"]);
    assert_eq!(report.analyzed, 2);
    assert_eq!(report.findings.len(), 2);
}

#[tokio::test]
async fn test_path_traversal_payload_reaches_transport() {
    let sign = signature(
        r#"
id: traversal
type: fuzz
payloads:
  - ../../etc/passwd
requests:
  - url: "{{.BaseURL}}/static/app.js"
    generators:
      - "Path('{{.payload}}')"
"#,
    );
    let transport = Arc::new(StubTransport::default());
    engine(transport.clone()).scan(&urls(), &[sign]).await;
    assert_eq!(transport.sent(), vec!["http://app.test/static/../../etc/passwd"]);
}

fn fan_out(id: &str, extra: &str) -> Arc<Signature> {
    let requests: String = (0..8)
        .map(|i| format!("  - url: \"{{{{.BaseURL}}}}/{}\"\n", i))
        .collect();
    signature(&format!("id: {}\n{}requests:\n{}", id, extra, requests))
}

#[tokio::test]
async fn test_signature_threads_bound_requests_in_flight() {
    let transport = Arc::new(SlowTransport::default());
    let engine = ScanEngine::builder(&config(), transport.clone()).build();
    engine.scan(&urls(), &[fan_out("two-workers", "threads: 2\n")]).await;
    assert!(transport.peak() <= 2, "peak {}", transport.peak());
    assert!(transport.peak() > 1, "requests never overlapped");
}

#[tokio::test]
async fn test_single_signature_sends_one_at_a_time() {
    let transport = Arc::new(SlowTransport::default());
    let engine = ScanEngine::builder(&config(), transport.clone()).build();
    let report = engine.scan(&urls(), &[fan_out("one-worker", "single: true\n")]).await;
    assert_eq!(transport.peak(), 1);
    assert_eq!(report.analyzed, 8);
}

#[tokio::test]
async fn test_outer_pool_bounds_concurrent_jobs() {
    let transport = Arc::new(SlowTransport::default());
    let engine = ScanEngine::builder(&config(), transport.clone()).build();
    let signs: Vec<_> = (0..5).map(|i| signature(&format!("id: job-{}\nrequests:\n  - url: \"{{{{.URL}}}}\"\n", i))).collect();

    let report = engine.scan(&urls(), &signs).await;
    assert_eq!(report.jobs, 5);
    assert!(transport.peak() <= 2, "peak {} above concurrency 2", transport.peak());
    assert!(transport.peak() > 1, "jobs never overlapped");
}

#[tokio::test]
async fn test_passive_signature_counts_passive_hits() {
    let sign = signature(
        r#"
id: passive-errors
passive: true
requests:
  - url: "{{.BaseURL}}/java.lang.Exception"
  - url: "{{.BaseURL}}/clean"
"#,
    );
    let transport = Arc::new(StubTransport::default());
    let engine = ScanEngine::builder(&config(), transport)
        .passives(vec![Passive::defaults()])
        .build();
    let report = engine.scan(&urls(), &[sign]).await;
    assert_eq!(report.passive, 1);
    assert!(report.findings.is_empty());
}

#[tokio::test]
async fn test_filtering_paths_suppress_catch_all_matches() {
    let sign = signature(
        r#"
id: admin-page
filtering_paths:
  - soft404
requests:
  - url: "{{.BaseURL}}/soft404"
    detections:
      - "StatusCode() == 200"
  - url: "{{.BaseURL}}/admin"
    detections:
      - "StatusCode() == 200"
"#,
    );
    let transport = Arc::new(StubTransport::default());
    let report = engine(transport.clone()).scan(&urls(), &[sign]).await;

    assert_eq!(transport.sent()[0], "http://app.test/soft404");
    assert_eq!(report.analyzed, 2);
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].url, "http://app.test/admin");
}

#[test]
fn test_jobs_filter_level_and_passive() {
    let engine = engine(Arc::new(StubTransport::default()));
    let signs = vec![
        signature("id: low\nrequests:\n  - url: \"{{.URL}}\"\n"),
        signature("id: deep\nlevel: 3\nrequests:\n  - url: \"{{.URL}}\"\n"),
        signature("id: passive-only\npassive: true\n"),
    ];
    let urls = vec!["http://a.test".to_string(), "http://b.test".to_string()];
    let jobs = engine.jobs(&urls, &signs);

    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.signature().id == "low"));
    assert!(matches!(jobs[0], Job::Signature { .. }));
}
