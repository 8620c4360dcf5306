//! File-backed output sink

use base64::Engine as _;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::OutputSink;
use crate::error::OutputError;
use crate::scanner::{PassiveHit, Record};

const RULE_WIDTH: usize = 50;

/// JSON form of a stored record
#[derive(Debug, Serialize)]
struct JsonRecord<'a> {
    signature: &'a str,
    risk: &'a str,
    confidence: &'a str,
    url: &'a str,
    detect_string: &'a str,
    extra: &'a str,
    /// Base64 of the raw request
    request: String,
    /// Base64 of the raw response
    response: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// Writes one file per matched record plus two summary files
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
    json: bool,
    summary_file: String,
    vuln_summary_file: String,
    passive_summary_file: String,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            json: false,
            summary_file: "sigil-summary.txt".to_string(),
            vuln_summary_file: "vuln-summary.txt".to_string(),
            passive_summary_file: "passive-summary.txt".to_string(),
        }
    }

    pub fn from_config(config: &crate::app::OutputConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            json: config.json,
            summary_file: config.summary_file.clone(),
            vuln_summary_file: config.vuln_summary_file.clone(),
            passive_summary_file: config.passive_summary_file.clone(),
        }
    }

    pub fn json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(&self.summary_file)
    }

    pub fn vuln_summary_path(&self) -> PathBuf {
        self.dir.join(&self.vuln_summary_file)
    }

    fn render_text(record: &Record) -> String {
        let sign = &record.signature;
        let rule = "-".repeat(RULE_WIDTH);
        let source = sign
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let mut content = format!(
            "[Vuln-Info][{}][{}-{}] - {}\n",
            sign.id,
            sign.info.confidence,
            sign.info.risk,
            record.url()
        );
        content.push_str(&format!(
            "[Sign-Info][{}-{}] - {} - {}\n",
            sign.info.confidence, sign.info.risk, source, sign.info.name
        ));
        content.push_str(&format!("[Detect-String] - {}\n\n", record.detect_string));

        if !record.middleware_output.is_empty() {
            content.push_str("[Middleware-Output]\n");
            content.push_str(&record.request.middlewares.join("\n"));
            content.push_str(&format!("\n<<{}>>\n", rule));
            content.push_str(&record.middleware_output);
            content.push('\n');
        }

        if !record.extra_output.is_empty() {
            content.push_str(&format!("{}\n[Matches String]\n", rule));
            content.push_str(record.extra_output.trim());
            content.push('\n');
        }

        content.push_str(&format!(">>>>{}\n", rule));
        if record.middleware_output.is_empty() {
            content.push_str(&record.request.to_raw());
            content.push_str(&format!("\n{}<<<<\n", rule));
            if let Some(response) = &record.response {
                content.push_str(&response.to_raw());
            }
        }
        content
    }

    pub fn passive_summary_path(&self) -> PathBuf {
        self.dir.join(&self.passive_summary_file)
    }

    fn render_passive(record: &Record, hit: &PassiveHit) -> String {
        let rule = "-".repeat(RULE_WIDTH);
        let mut content = format!("[{}] - {}\n\n", hit.rule_id, record.url());
        content.push_str(&format!("[{}] - {}\n\n", hit.reason, hit.detection));

        if !hit.extra.is_empty() {
            content.push_str(&format!("{}\n[Matches String]\n", rule));
            content.push_str(hit.extra.trim());
            content.push_str(&format!("\n{}\n", rule));
        }
        if !record.middleware_output.is_empty() {
            content.push_str(&record.request.middlewares.join("\n"));
            content.push_str(&record.middleware_output);
            content.push_str(&format!("\n{}\n", rule));
        }

        content.push_str(&record.request.to_raw());
        content.push_str(&format!("\n{}\n", rule));
        if let Some(response) = &record.response {
            content.push_str(&response.to_raw());
        }
        content
    }

    fn render_json(record: &Record) -> Result<String, OutputError> {
        let engine = base64::engine::general_purpose::STANDARD;
        let json = JsonRecord {
            signature: &record.signature.id,
            risk: &record.signature.info.risk,
            confidence: &record.signature.info.confidence,
            url: record.url(),
            detect_string: &record.detect_string,
            extra: &record.extra_output,
            request: engine.encode(record.request.to_raw()),
            response: engine.encode(
                record
                    .response
                    .as_ref()
                    .map(|r| r.to_raw())
                    .unwrap_or_else(|| record.middleware_output.clone()),
            ),
            timestamp: chrono::Utc::now(),
        };
        serde_json::to_string_pretty(&json).map_err(|e| OutputError::SerializeError(e.to_string()))
    }

    /// Directory name for the record's host
    fn host_dir(record: &Record) -> String {
        let host = url::Url::parse(record.url())
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .or_else(|| record.vars.get("Domain").cloned())
            .unwrap_or_default();
        if host.is_empty() {
            crate::fuzzer::encoding::query_escape(record.url())
        } else {
            host
        }
    }

    fn append(path: &Path, line: &str) -> Result<(), OutputError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| write_error(path, e))?;
        writeln!(file, "{}", line).map_err(|e| write_error(path, e))
    }
}

fn write_error(path: &Path, source: std::io::Error) -> OutputError {
    OutputError::WriteError {
        path: path.display().to_string(),
        source,
    }
}

impl OutputSink for FileSink {
    fn store(&self, record: &Record) -> Result<PathBuf, OutputError> {
        let content = if self.json {
            Self::render_json(record)?
        } else {
            Self::render_text(record)
        };

        let digest = format!("{:x}", Sha256::digest(content.as_bytes()));
        let host_dir = self.dir.join(Self::host_dir(record));
        fs::create_dir_all(&host_dir).map_err(|e| write_error(&host_dir, e))?;

        let mut name = format!("{}-{}", record.signature.id, &digest[..16]);
        if self.json {
            name.push_str(".json");
        }
        let path = host_dir.join(name);
        fs::write(&path, content).map_err(|e| write_error(&path, e))?;

        let sign = &record.signature;
        let head = format!("[{}][{}] - {}", sign.id, sign.info.risk, record.url());
        Self::append(&self.summary_path(), &format!("{} - {}", head, path.display()))?;
        Self::append(&self.vuln_summary_path(), &head)?;

        tracing::debug!(path = %path.display(), "Stored record");
        Ok(path)
    }

    fn store_passive(&self, record: &Record, hit: &PassiveHit) -> Result<PathBuf, OutputError> {
        let content = Self::render_passive(record, hit);
        let digest = format!("{:x}", Sha256::digest(content.as_bytes()));
        let host_dir = self.dir.join("passive").join(Self::host_dir(record));
        fs::create_dir_all(&host_dir).map_err(|e| write_error(&host_dir, e))?;

        let name: String = hit
            .rule_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let path = host_dir.join(format!("{}-{}", name, &digest[..16]));
        fs::write(&path, content).map_err(|e| write_error(&path, e))?;

        let line = format!(
            "[{}|{}] - {} - {}",
            hit.rule_id,
            hit.reason.replace(' ', "_"),
            record.url(),
            path.display()
        );
        Self::append(&self.passive_summary_path(), &line)?;

        tracing::debug!(path = %path.display(), "Stored passive match");
        Ok(path)
    }

    fn finalize(&self) -> Result<(), OutputError> {
        if !self.dir.exists() {
            return Ok(());
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| write_error(&self.dir, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let empty = path.is_dir()
                && fs::read_dir(&path).map(|mut d| d.next().is_none()).unwrap_or(false);
            if empty {
                if let Err(e) = fs::remove_dir(&path) {
                    tracing::debug!(path = %path.display(), error = %e, "Could not remove empty directory");
                }
            }
        }

        let summary = self.vuln_summary_path();
        if summary.exists() {
            let content = fs::read_to_string(&summary).map_err(|e| write_error(&summary, e))?;
            let lines: BTreeSet<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
            let mut sorted = lines.into_iter().collect::<Vec<_>>().join("\n");
            if !sorted.is_empty() {
                sorted.push('\n');
            }
            fs::write(&summary, sorted).map_err(|e| write_error(&summary, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Request, Response};
    use crate::scanner::Origins;
    use crate::signature::{Signature, Target};
    use std::sync::Arc;

    fn record() -> Record {
        let signature = Signature::from_yaml("id: sqli-error\ninfo:\n  risk: High\n", "test").unwrap();
        let mut record = Record::new(
            Request::new("GET", "http://shop.test/item?id=1'"),
            Arc::new(signature),
            Target::new(),
            Arc::new(Origins::default()),
        );
        record.response = Some(Response::new(500, vec![], "You have an error in your SQL syntax"));
        record.detect_string = "StringSearch('response', 'SQL syntax')".into();
        record.vulnerable = true;
        record
    }

    #[test]
    fn test_store_text_record() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());
        let path = sink.store(&record()).unwrap();

        assert!(path.starts_with(dir.path().join("shop.test")));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("sqli-error-"));
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("[Vuln-Info][sqli-error][Firm-High] - http://shop.test/item?id=1'"));
        assert!(content.contains("[Detect-String] - StringSearch('response', 'SQL syntax')"));
        assert!(content.contains("You have an error"));

        let summary = fs::read_to_string(sink.summary_path()).unwrap();
        assert!(summary.contains(&path.display().to_string()));
    }

    #[test]
    fn test_store_json_record() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path()).json(true);
        let path = sink.store(&record()).unwrap();

        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("json"));
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["signature"], "sqli-error");
        assert_eq!(value["risk"], "High");
        let response = base64::engine::general_purpose::STANDARD
            .decode(value["response"].as_str().unwrap())
            .unwrap();
        assert!(String::from_utf8(response).unwrap().contains("SQL syntax"));
    }

    #[test]
    fn test_finalize_dedupes_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());
        sink.store(&record()).unwrap();
        sink.store(&record()).unwrap();
        fs::write(sink.vuln_summary_path(), "b\na\nb\n\n").unwrap();
        fs::create_dir(dir.path().join("empty.test")).unwrap();

        sink.finalize().unwrap();

        assert_eq!(fs::read_to_string(sink.vuln_summary_path()).unwrap(), "a\nb\n");
        assert!(!dir.path().join("empty.test").exists());
        assert!(dir.path().join("shop.test").exists());
    }

    #[test]
    fn test_store_passive_match() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());
        let hit = PassiveHit {
            rule_id: "default-error-01".into(),
            reason: "SQL Error".into(),
            risk: "Info".into(),
            confidence: "Tentative".into(),
            detection: "RegexSearch('resbody', 'SQL syntax')".into(),
            extra: "SQL syntax".into(),
        };
        let path = sink.store_passive(&record(), &hit).unwrap();

        assert!(path.starts_with(dir.path().join("passive").join("shop.test")));
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("[default-error-01] - http://shop.test/item?id=1'"));
        assert!(content.contains("[SQL Error] - RegexSearch('resbody', 'SQL syntax')"));
        assert!(content.contains("[Matches String]\nSQL syntax"));

        let summary = fs::read_to_string(sink.passive_summary_path()).unwrap();
        assert!(summary.starts_with("[default-error-01|SQL_Error] - http://shop.test/item?id=1' - "));
        assert!(!sink.vuln_summary_path().exists());
    }

    #[test]
    fn test_finalize_without_output_dir() {
        let sink = FileSink::new("/definitely/not/here");
        assert!(sink.finalize().is_ok());
    }
}
