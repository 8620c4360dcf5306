//! Request dispatch
//!
//! One request's lifecycle is: second-pass resolution, conditions, delay,
//! middlewares, send, analysis, then applying the analysis writes to the
//! signature's target. Groups of requests run either in order or on a
//! bounded pool.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::analyzer::Analyzer;
use super::detector::Writes;
use super::middleware;
use super::record::{Origins, Record, RecordLog, RecordState};
use crate::http::{parse_raw_response, Request, Transport};
use crate::signature::{Signature, Target};
use crate::template::alt_resolve;

/// State shared by every request of one signature run
#[derive(Clone)]
pub struct RunContext {
    pub signature: Arc<Signature>,
    /// Live target; conclusion writes land here
    pub target: Arc<RwLock<Target>>,
    pub origins: Arc<Origins>,
    /// Body checksums of known "not found" pages
    pub checksums: Arc<HashSet<String>>,
}

impl RunContext {
    pub fn new(signature: Arc<Signature>, target: Target) -> Self {
        Self {
            signature,
            target: Arc::new(RwLock::new(target)),
            origins: Arc::new(Origins::default()),
            checksums: Arc::new(HashSet::new()),
        }
    }

    /// Current target with a variable row layered on top
    pub fn snapshot(&self, row: &Target) -> Target {
        let mut vars = self.target.read().clone();
        vars.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars
    }

    pub fn apply(&self, writes: Writes) {
        if writes.is_empty() {
            return;
        }
        let mut target = self.target.write();
        for (key, value) in writes {
            target.insert(key, value);
        }
    }
}

/// Sends requests and hands them to the analyzer
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    analyzer: Arc<Analyzer>,
    delay: Duration,
    follow_redirects: bool,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, analyzer: Arc<Analyzer>) -> Self {
        Self {
            transport,
            analyzer,
            delay: Duration::ZERO,
            follow_redirects: false,
        }
    }

    /// Sleep this long before every send
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Follow redirects even when a request does not ask to
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Run one request, once per `repeat`
    pub async fn execute(&self, request: Request, vars: Target, ctx: &RunContext) -> Vec<Record> {
        let repeat = request.repeat.max(1);
        let mut records = Vec::with_capacity(repeat as usize);
        for i in 0..repeat {
            let request = if i == 0 { request.clone() } else { request.fork() };
            // Later repeats see writes from earlier ones
            let vars = if i == 0 { vars.clone() } else { merge(&vars, &ctx.target.read()) };
            if let Some(record) = self.execute_once(request, vars, ctx).await {
                records.push(record);
            }
        }
        records
    }

    async fn execute_once(&self, request: Request, vars: Target, ctx: &RunContext) -> Option<Record> {
        let request = resolve_request(request, &vars);
        let mut record = Record::new(request, ctx.signature.clone(), vars, ctx.origins.clone());
        let evaluator = self.analyzer.evaluator();

        let mut scratch = Writes::new();
        for condition in &record.request.conditions {
            if !evaluator.check_condition(condition, &record, &mut scratch) {
                tracing::debug!(signature = %ctx.signature.id, condition = %condition, "Condition not met, skipping request");
                return None;
            }
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if !record.request.middlewares.is_empty() {
            let (request, output) = middleware::apply(record.request.clone(), evaluator.allow_commands()).await;
            record.request = request;
            record.middleware_output = output;
        }

        if let Some(raw) = record.request.raw_response.clone() {
            match parse_raw_response(&raw) {
                Ok(response) => record.response = Some(response),
                Err(e) => tracing::debug!(error = %e, "Canned response not parseable"),
            }
        } else if record.middleware_output.is_empty() && !record.request.method.is_empty() {
            if self.follow_redirects {
                record.request.follow_redirects = true;
            }
            match self.transport.send(&record.request).await {
                Ok(response) => {
                    record.filtered = !ctx.checksums.is_empty() && ctx.checksums.contains(&response.checksum());
                    record.response = Some(response);
                }
                Err(e) => {
                    tracing::debug!(
                        signature = %ctx.signature.id,
                        url = %record.request.url,
                        error = %e,
                        "Request abandoned"
                    );
                    record.state = RecordState::Abandoned;
                    return Some(record);
                }
            }
        }
        record.state = RecordState::Sent;

        let analyzer = self.analyzer.clone();
        let analyzed = tokio::task::spawn_blocking(move || {
            let writes = analyzer.analyze(&mut record);
            (record, writes)
        })
        .await;

        match analyzed {
            Ok((record, writes)) => {
                ctx.apply(writes);
                Some(record)
            }
            Err(e) => {
                tracing::warn!(signature = %ctx.signature.id, error = %e, "Analysis task failed");
                None
            }
        }
    }

    /// Run requests one at a time, in order
    pub async fn run_sequential(&self, requests: Vec<(Request, Target)>, ctx: &RunContext, log: &RecordLog) {
        for (request, vars) in requests {
            for record in self.execute(request, vars, ctx).await {
                log.push(record);
            }
        }
    }

    /// Run requests on a pool of `threads` workers
    ///
    /// Returns once every request has finished. Records reach the log in
    /// completion order, not submission order.
    pub async fn run_parallel(
        &self,
        requests: Vec<(Request, Target)>,
        ctx: &RunContext,
        threads: usize,
        log: &RecordLog,
    ) {
        let semaphore = Arc::new(Semaphore::new(threads.max(1)));
        let mut handles = Vec::with_capacity(requests.len());

        for (request, vars) in requests {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let dispatcher = self.clone();
            let ctx = ctx.clone();
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                for record in dispatcher.execute(request, vars, &ctx).await {
                    log.push(record);
                }
                drop(permit);
            }));
        }

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Request task failed");
            }
        }
    }
}

fn merge(base: &Target, overlay: &Target) -> Target {
    let mut vars = base.clone();
    vars.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    vars
}

/// Second resolution pass with `[[.Key]]` placeholders
fn resolve_request(mut request: Request, vars: &Target) -> Request {
    let all = |items: &[String]| -> Vec<String> { items.iter().map(|i| alt_resolve(i, vars)).collect() };
    request.url = alt_resolve(&request.url, vars);
    request.body = alt_resolve(&request.body, vars);
    request.headers = request
        .headers
        .iter()
        .map(|(k, v)| (alt_resolve(k, vars), alt_resolve(v, vars)))
        .collect();
    request.detections = all(&request.detections);
    request.conclusions = all(&request.conclusions);
    request.middlewares = all(&request.middlewares);
    request.conditions = all(&request.conditions);
    request.raw_response = request.raw_response.as_deref().map(|r| alt_resolve(r, vars));
    request
}
