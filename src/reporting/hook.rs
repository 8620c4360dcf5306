//! Found-command hook

use std::path::Path;

use crate::scanner::Record;
use crate::scripting::command;
use crate::template::resolve;

/// Side channel notified of every match
pub trait FoundHook: Send + Sync {
    fn found(&self, record: &Record, output: Option<&Path>);
}

/// Runs a shell command template on every match
///
/// The template sees the record's variables plus `vulnInfo`, `vulnOut`
/// and `notiText`.
#[derive(Debug, Clone)]
pub struct ShellHook {
    template: String,
    allow_commands: bool,
}

impl ShellHook {
    pub fn new(template: &str, allow_commands: bool) -> Self {
        Self {
            template: template.to_string(),
            allow_commands,
        }
    }

    /// Command line for a record
    pub fn command_for(&self, record: &Record, output: Option<&Path>) -> String {
        let info = format!(
            "[{}][{}] {}",
            record.signature.id,
            record.signature.info.risk,
            record.url()
        );
        let mut vars = record.vars.clone();
        vars.insert("vulnInfo".into(), info.clone());
        vars.insert(
            "vulnOut".into(),
            output.map(|p| p.display().to_string()).unwrap_or_default(),
        );
        vars.insert("notiText".into(), info);
        resolve(&self.template, &vars)
    }
}

impl FoundHook for ShellHook {
    fn found(&self, record: &Record, output: Option<&Path>) {
        let cmd = self.command_for(record, output);
        if let Err(e) = command::shell("found_cmd", &cmd, self.allow_commands) {
            tracing::warn!(signature = %record.signature.id, "Found command not run: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;
    use crate::scanner::Origins;
    use crate::signature::{Signature, Target};
    use std::sync::Arc;

    fn record() -> Record {
        let signature = Signature::from_yaml("id: cve-1\ninfo:\n  risk: Critical\n", "test").unwrap();
        let mut vars = Target::new();
        vars.insert("Domain".into(), "x.test".into());
        Record::new(
            Request::new("GET", "http://x.test/"),
            Arc::new(signature),
            vars,
            Arc::new(Origins::default()),
        )
    }

    #[test]
    fn test_command_template() {
        let hook = ShellHook::new("notify '{{.notiText}}' {{.vulnOut}} {{.Domain}}", false);
        let cmd = hook.command_for(&record(), Some(Path::new("/out/x.test/cve-1-abc")));
        assert_eq!(cmd, "notify '[cve-1][Critical] http://x.test/' /out/x.test/cve-1-abc x.test");
    }

    #[cfg(unix)]
    #[test]
    fn test_hook_runs_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("found.txt");
        let hook = ShellHook::new(&format!("echo '{{{{.vulnInfo}}}}' > {}", marker.display()), true);
        hook.found(&record(), None);
        let content = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(content.trim(), "[cve-1][Critical] http://x.test/");
    }

    #[test]
    fn test_hook_gated() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("found.txt");
        let hook = ShellHook::new(&format!("touch {}", marker.display()), false);
        hook.found(&record(), None);
        assert!(!marker.exists());
    }
}
