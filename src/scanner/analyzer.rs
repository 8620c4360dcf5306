//! Record analysis
//!
//! Runs detections on a sent record, reports a match, runs passive rules
//! when asked to, then runs the record's conclusions whatever the outcome.

use std::sync::Arc;

use super::detector::{Evaluator, Writes};
use super::passive::{PassiveHit, PassiveScanner};
use super::record::{Record, RecordState};
use crate::reporting::{FoundHook, OutputSink};
use crate::template::resolve;

/// Decides and reports matches
#[derive(Clone)]
pub struct Analyzer {
    evaluator: Evaluator,
    sink: Option<Arc<dyn OutputSink>>,
    hook: Option<Arc<dyn FoundHook>>,
    quiet_format: Option<String>,
    passive: Option<Arc<PassiveScanner>>,
    /// Run passive rules on every record, not only passive signatures
    passive_always: bool,
}

impl Analyzer {
    pub fn new(evaluator: Evaluator) -> Self {
        Self {
            evaluator,
            sink: None,
            hook: None,
            quiet_format: None,
            passive: None,
            passive_always: false,
        }
    }

    /// Run these passive rules on records of passive signatures, on records
    /// whose `DoPassive()` detection matched, or on all of them with `always`
    pub fn with_passive(mut self, scanner: Arc<PassiveScanner>, always: bool) -> Self {
        self.passive = Some(scanner);
        self.passive_always = always;
        self
    }

    /// Store matched records through this sink
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Notify this hook of every match
    pub fn with_hook(mut self, hook: Arc<dyn FoundHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Print this template instead of the default match line
    pub fn with_quiet_format(mut self, format: Option<String>) -> Self {
        self.quiet_format = format;
        self
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Analyze a sent record and return the target writes it produced
    pub fn analyze(&self, record: &mut Record) -> Writes {
        let mut writes = Writes::new();

        if record.filtered {
            tracing::debug!(signature = %record.signature.id, url = %record.url(), "Response matches a filtering checksum");
            record.state = RecordState::NotMatched;
            self.conclude(record, &mut writes);
            return writes;
        }

        let mut do_passive = false;
        let detections = record.request.detections.clone();
        for detection in &detections {
            let (extra, matched) = self.evaluator.detect(detection, record, &mut writes);
            tracing::trace!(signature = %record.signature.id, detection = %detection, matched, "Detection");
            if !extra.is_empty() {
                record.extra_output = extra;
            }
            if !matched {
                continue;
            }
            if detection.to_lowercase().contains("dopassive") {
                do_passive = true;
            }
            if !record.vulnerable {
                record.vulnerable = true;
                record.detect_string = detection.clone();
            }
            if record.signature.donce {
                break;
            }
        }

        if record.vulnerable {
            record.state = RecordState::Matched;
            writes.push(("IsVulnerable".to_string(), "true".to_string()));
            self.report(record);
        } else {
            record.state = RecordState::NotMatched;
        }

        if do_passive || self.passive_always || record.signature.passive {
            self.run_passive(record);
        }

        self.conclude(record, &mut writes);
        writes
    }

    fn conclude(&self, record: &Record, writes: &mut Writes) {
        for conclusion in &record.request.conclusions {
            self.evaluator.conclude(conclusion, record, writes);
        }
    }

    fn run_passive(&self, record: &mut Record) {
        let Some(scanner) = &self.passive else {
            return;
        };
        if record.response.is_none() {
            return;
        }

        let hits = scanner.scan(&self.evaluator, record);
        for hit in &hits {
            self.report_passive(record, hit);
        }
        record.passive_hits = hits.len();
    }

    fn report_passive(&self, record: &Record, hit: &PassiveHit) {
        tracing::info!(rule = %hit.rule_id, reason = %hit.reason, url = %record.url(), "Passive match");
        let mut output = String::new();
        if let Some(sink) = &self.sink {
            match sink.store_passive(record, hit) {
                Ok(path) => output = path.display().to_string(),
                Err(e) => tracing::warn!(rule = %hit.rule_id, "{}", e),
            }
        }
        println!("[Passive][{}] {} {}", hit.rule_id, record.url(), output);
    }

    fn report(&self, record: &mut Record) {
        tracing::info!(
            signature = %record.signature.id,
            url = %record.url(),
            detection = %record.detect_string,
            "Found"
        );

        if !record.signature.noutput {
            if let Some(sink) = &self.sink {
                match sink.store(record) {
                    Ok(path) => record.raw_output = Some(path),
                    Err(e) => tracing::warn!(signature = %record.signature.id, "{}", e),
                }
            }
        }

        let output = record
            .raw_output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        match &self.quiet_format {
            Some(format) => println!("{}", resolve(format, &quiet_vars(record, &output))),
            None => println!(
                "[Vulnerable][{}][{}] {} {}",
                record.signature.id,
                record.signature.info.risk,
                record.url(),
                output
            ),
        }

        if let Some(hook) = &self.hook {
            hook.found(record, record.raw_output.as_deref());
        }
    }
}

fn quiet_vars(record: &Record, output: &str) -> crate::signature::Target {
    let mut vars = record.vars.clone();
    let payload = record.request.payload.clone().unwrap_or_default();
    vars.insert("VulnURL".into(), record.url().to_string());
    vars.insert("SignID".into(), record.signature.id.clone());
    vars.insert("Risk".into(), record.signature.info.risk.clone());
    vars.insert("Output".into(), output.to_string());
    vars.insert("Payload".into(), payload.clone());
    vars.insert("payload".into(), payload);
    if let Some(response) = &record.response {
        vars.insert("Status".into(), response.status.to_string());
        vars.insert("Length".into(), response.size.to_string());
        vars.insert("Words".into(), response.body.split_whitespace().count().to_string());
        vars.insert("Time".into(), response.response_time().to_string());
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OutputError;
    use crate::http::{Request, Response};
    use crate::scanner::oob::NullPoller;
    use crate::scanner::record::Origins;
    use crate::scripting::{Functions, Value};
    use crate::signature::{Passive, Signature, Target};
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemorySink {
        stored: Mutex<Vec<String>>,
        passive: Mutex<Vec<String>>,
    }

    impl OutputSink for MemorySink {
        fn store(&self, record: &Record) -> Result<PathBuf, OutputError> {
            self.stored.lock().push(record.detect_string.clone());
            Ok(PathBuf::from("/out/record"))
        }

        fn store_passive(&self, _record: &Record, hit: &PassiveHit) -> Result<PathBuf, OutputError> {
            self.passive.lock().push(hit.rule_id.clone());
            Ok(PathBuf::from("/out/passive"))
        }

        fn finalize(&self) -> Result<(), OutputError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingHook {
        calls: AtomicUsize,
    }

    impl FoundHook for CountingHook {
        fn found(&self, _record: &Record, output: Option<&Path>) {
            assert_eq!(output, Some(Path::new("/out/record")));
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record(signature: Signature, detections: &[&str], conclusions: &[&str]) -> Record {
        let mut request = Request::new("GET", "http://x.test/");
        request.detections = detections.iter().map(|d| d.to_string()).collect();
        request.conclusions = conclusions.iter().map(|c| c.to_string()).collect();
        let mut record = Record::new(request, Arc::new(signature), Target::new(), Arc::new(Origins::default()));
        record.response = Some(Response::new(200, vec![], "welcome admin"));
        record
    }

    fn analyzer() -> Analyzer {
        Analyzer::new(Evaluator::new(false, Arc::new(NullPoller)))
    }

    #[test]
    fn test_match_is_stored_once_and_hooked() {
        let sink = Arc::new(MemorySink::default());
        let hook = Arc::new(CountingHook::default());
        let analyzer = analyzer().with_sink(sink.clone()).with_hook(hook.clone());

        let mut record = record(
            Signature::default(),
            &["StringSearch('response', 'admin')", "StatusCode() == 200"],
            &[],
        );
        let writes = analyzer.analyze(&mut record);

        assert_eq!(record.state, RecordState::Matched);
        assert_eq!(record.detect_string, "StringSearch('response', 'admin')");
        assert_eq!(record.raw_output, Some(PathBuf::from("/out/record")));
        assert_eq!(sink.stored.lock().len(), 1);
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
        assert_eq!(writes, vec![("IsVulnerable".to_string(), "true".to_string())]);
    }

    #[test]
    fn test_noutput_skips_sink() {
        let sink = Arc::new(MemorySink::default());
        let analyzer = analyzer().with_sink(sink.clone());
        let signature = Signature {
            noutput: true,
            ..Default::default()
        };
        let mut record = record(signature, &["StatusCode() == 200"], &[]);
        analyzer.analyze(&mut record);
        assert!(record.vulnerable);
        assert!(sink.stored.lock().is_empty());
    }

    #[test]
    fn test_detect_once_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut functions = Functions::new();
        functions.register("Mark", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Bool(true))
        });
        let analyzer = Analyzer::new(Evaluator::new(false, Arc::new(NullPoller)).with_functions(functions));

        let donce = Signature {
            donce: true,
            ..Default::default()
        };
        let mut once = record(donce, &["Mark()", "Mark()", "Mark()"], &[]);
        analyzer.analyze(&mut once);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut every = record(Signature::default(), &["Mark()", "Mark()", "Mark()"], &[]);
        analyzer.analyze(&mut every);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_conclusions_run_without_match() {
        let mut record = record(
            Signature::default(),
            &["StatusCode() == 404"],
            &["SetValue('seen', 'yes')"],
        );
        let writes = analyzer().analyze(&mut record);
        assert_eq!(record.state, RecordState::NotMatched);
        assert_eq!(writes, vec![("seen".to_string(), "yes".to_string())]);
    }

    #[test]
    fn test_quiet_vars() {
        let mut record = record(Signature::default(), &[], &[]);
        record.request.payload = Some("'".into());
        let vars = quiet_vars(&record, "/out/x");
        assert_eq!(vars["Status"], "200");
        assert_eq!(vars["Words"], "2");
        assert_eq!(vars["payload"], "'");
        assert_eq!(vars["Output"], "/out/x");
    }

    #[test]
    fn test_extra_output_comes_from_latest_evidence() {
        let mut record = record(
            Signature::default(),
            &[
                "StatusCode() == 200",
                "RegexSearch('resbody', 'adm[a-z]+') && StatusCode() == 500",
            ],
            &[],
        );
        analyzer().analyze(&mut record);
        assert_eq!(record.state, RecordState::Matched);
        assert_eq!(record.detect_string, "StatusCode() == 200");
        assert_eq!(record.extra_output, "admin");
    }

    fn passive_analyzer(sink: Arc<MemorySink>, always: bool) -> Analyzer {
        let scanner = PassiveScanner::new(vec![Passive::defaults()], 1);
        analyzer().with_sink(sink).with_passive(Arc::new(scanner), always)
    }

    fn java_error(signature: Signature, detections: &[&str]) -> Record {
        let mut record = record(signature, detections, &[]);
        record.response = Some(Response::new(500, vec![], "java.lang.Exception: boom"));
        record
    }

    #[test]
    fn test_passive_runs_for_passive_signature_or_do_passive() {
        let sink = Arc::new(MemorySink::default());
        let analyzer = passive_analyzer(sink.clone(), false);

        let mut plain = java_error(Signature::default(), &["StatusCode() == 200"]);
        analyzer.analyze(&mut plain);
        assert_eq!(plain.passive_hits, 0);

        let passive = Signature {
            passive: true,
            ..Default::default()
        };
        let mut flagged = java_error(passive, &[]);
        analyzer.analyze(&mut flagged);
        assert_eq!(flagged.passive_hits, 1);

        let mut asked = java_error(Signature::default(), &["StatusCode() == 500 && DoPassive()"]);
        analyzer.analyze(&mut asked);
        assert_eq!(asked.state, RecordState::Matched);
        assert_eq!(asked.passive_hits, 1);

        assert_eq!(*sink.passive.lock(), vec!["default-error-04", "default-error-04"]);
    }

    #[test]
    fn test_passive_everywhere_when_enabled() {
        let sink = Arc::new(MemorySink::default());
        let mut record = java_error(Signature::default(), &[]);
        passive_analyzer(sink.clone(), true).analyze(&mut record);
        assert_eq!(record.passive_hits, 1);
        assert_eq!(record.state, RecordState::NotMatched);
    }

    #[test]
    fn test_filtered_record_never_matches() {
        let sink = Arc::new(MemorySink::default());
        let analyzer = analyzer().with_sink(sink.clone());
        let mut record = record(Signature::default(), &["StatusCode() == 200"], &["SetValue('seen', 'yes')"]);
        record.filtered = true;

        let writes = analyzer.analyze(&mut record);
        assert_eq!(record.state, RecordState::NotMatched);
        assert!(sink.stored.lock().is_empty());
        assert_eq!(writes, vec![("seen".to_string(), "yes".to_string())]);
    }
}
