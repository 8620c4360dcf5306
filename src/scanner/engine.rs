//! Scan engine orchestration
//!
//! Every (url, signature) pair becomes a job. Jobs run on a pool bounded by
//! the configured concurrency, and `scan` returns only once all of them
//! have finished.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::analyzer::Analyzer;
use super::detector::Evaluator;
use super::dispatcher::Dispatcher;
use super::filter::ChecksumFilter;
use super::oob::{NullPoller, OobPoller};
use super::passive::PassiveScanner;
use super::record::{Record, RecordLog};
use super::runner::{Runner, RunnerOptions};
use crate::app::Config;
use crate::http::Transport;
use crate::reporting::{FileSink, OutputSink, ScanReport, ShellHook};
use crate::scripting::Functions;
use crate::signature::{Catalog, Passive, Signature, SignatureType};

/// Unit of work for the outer pool
#[derive(Debug, Clone)]
pub enum Job {
    /// Single, list and fuzz signatures
    Signature { url: String, signature: Arc<Signature> },
    /// Routine signatures run in order and keep their records
    Routine { url: String, signature: Arc<Signature> },
}

impl Job {
    pub fn new(url: &str, signature: Arc<Signature>) -> Self {
        let url = url.to_string();
        match signature.sign_type {
            SignatureType::Routine => Job::Routine { url, signature },
            _ => Job::Signature { url, signature },
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Job::Signature { url, .. } | Job::Routine { url, .. } => url,
        }
    }

    pub fn signature(&self) -> &Arc<Signature> {
        match self {
            Job::Signature { signature, .. } | Job::Routine { signature, .. } => signature,
        }
    }
}

/// What one job produced
#[derive(Debug, Default)]
pub struct JobOutcome {
    pub report: ScanReport,
    /// Every record, kept for routine jobs only
    pub records: Vec<Record>,
}

/// Builder for [`ScanEngine`]
pub struct ScanEngineBuilder {
    config: Config,
    transport: Arc<dyn Transport>,
    poller: Arc<dyn OobPoller>,
    functions: Functions,
    sink: Option<Arc<dyn OutputSink>>,
    passives: Option<Vec<Passive>>,
}

impl ScanEngineBuilder {
    /// Source of out-of-band evidence for `Collab`
    pub fn poller(mut self, poller: Arc<dyn OobPoller>) -> Self {
        self.poller = poller;
        self
    }

    /// Extra functions for detections and conclusions
    pub fn functions(mut self, functions: Functions) -> Self {
        self.functions = functions;
        self
    }

    /// Replace the configured file sink
    pub fn sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Use these passive rule sets instead of loading them from disk
    pub fn passives(mut self, passives: Vec<Passive>) -> Self {
        self.passives = Some(passives);
        self
    }

    pub fn build(self) -> ScanEngine {
        let config = self.config;
        let allow_commands = config.scripting.allow_external_commands;

        let sink: Option<Arc<dyn OutputSink>> = if config.output.disabled {
            None
        } else {
            Some(
                self.sink
                    .unwrap_or_else(|| Arc::new(FileSink::from_config(&config.output))),
            )
        };

        let evaluator = Evaluator::new(allow_commands, self.poller).with_functions(self.functions);
        let mut analyzer = Analyzer::new(evaluator).with_quiet_format(config.output.quiet_format.clone());
        if let Some(sink) = &sink {
            analyzer = analyzer.with_sink(sink.clone());
        }
        if let Some(cmd) = &config.output.found_cmd {
            analyzer = analyzer.with_hook(Arc::new(ShellHook::new(cmd, allow_commands)));
        }

        let passives = self
            .passives
            .unwrap_or_else(|| Catalog::new().load_passives(config.passive.dir.as_deref()));
        let passive = PassiveScanner::new(passives, config.scanner.level).with_select(&config.passive.select);
        analyzer = analyzer.with_passive(Arc::new(passive), config.passive.enabled);

        let mut filter = ChecksumFilter::new(self.transport.clone());
        if config.scanner.filtering {
            filter = filter.with_base_paths();
        }

        let dispatcher = Dispatcher::new(self.transport, Arc::new(analyzer))
            .with_delay(Duration::from_millis(config.scanner.delay_ms))
            .with_follow_redirects(config.scanner.follow_redirects);

        ScanEngine {
            runner: Runner::new(dispatcher, RunnerOptions::from_config(&config)).with_filter(filter),
            concurrency: config.scanner.concurrency.max(1),
            level: config.scanner.level,
            sink,
        }
    }
}

/// Main scan engine
#[derive(Clone)]
pub struct ScanEngine {
    runner: Runner,
    concurrency: usize,
    level: u32,
    sink: Option<Arc<dyn OutputSink>>,
}

impl ScanEngine {
    pub fn builder(config: &Config, transport: Arc<dyn Transport>) -> ScanEngineBuilder {
        ScanEngineBuilder {
            config: config.clone(),
            transport,
            poller: Arc::new(NullPoller),
            functions: Functions::new(),
            sink: None,
            passives: None,
        }
    }

    /// Jobs for every url and every runnable signature
    pub fn jobs(&self, urls: &[String], signatures: &[Arc<Signature>]) -> Vec<Job> {
        let runnable: Vec<&Arc<Signature>> = signatures
            .iter()
            .filter(|sign| {
                if sign.level > self.level {
                    tracing::debug!(signature = %sign.id, level = sign.level, "Skipping signature above scan level");
                    return false;
                }
                if sign.passive && sign.requests.is_empty() {
                    tracing::debug!(signature = %sign.id, "Skipping passive signature without requests");
                    return false;
                }
                true
            })
            .collect();

        urls.iter()
            .flat_map(|url| runnable.iter().map(move |sign| Job::new(url, (*sign).clone())))
            .collect()
    }

    /// Scan every url with every signature
    pub async fn scan(&self, urls: &[String], signatures: &[Arc<Signature>]) -> ScanReport {
        let mut report = ScanReport::default();
        let jobs = self.jobs(urls, signatures);
        tracing::info!(jobs = jobs.len(), concurrency = self.concurrency, "Starting scan");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let engine = self.clone();
            handles.push(tokio::spawn(async move {
                let outcome = engine.run_job(job).await;
                drop(permit);
                outcome
            }));
        }

        for result in futures::future::join_all(handles).await {
            match result {
                Ok(outcome) => report.merge(outcome.report),
                Err(e) => tracing::warn!(error = %e, "Job failed"),
            }
        }

        report.finished_at = chrono::Utc::now();
        self.finalize();
        tracing::info!(
            findings = report.findings.len(),
            analyzed = report.analyzed,
            abandoned = report.abandoned,
            passive = report.passive,
            seconds = report.duration_secs(),
            "Scan finished"
        );
        report
    }

    /// Run one job to completion
    pub async fn run_job(&self, job: Job) -> JobOutcome {
        tracing::debug!(signature = %job.signature().id, url = job.url(), "Running job");
        let log = match job {
            Job::Routine { .. } => RecordLog::retaining(),
            Job::Signature { .. } => RecordLog::tally(),
        };
        self.runner.run(job.url(), job.signature().clone(), &log).await;

        let (mut report, records) = log.finish();
        report.jobs = 1;
        JobOutcome { report, records }
    }

    fn finalize(&self) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.finalize() {
                tracing::warn!("Could not finalize output: {}", e);
            }
        }
    }
}
