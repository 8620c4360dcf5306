//! Application configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Scanner settings
    pub scanner: ScannerConfig,

    /// Output settings
    pub output: OutputConfig,

    /// Scripting settings
    pub scripting: ScriptingConfig,

    /// Out-of-band settings
    pub oob: OobConfig,

    /// Passive analysis settings
    pub passive: PassiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Root directory exposed to signatures as `homePath`
    pub root_dir: Option<PathBuf>,

    /// Default signature directory
    pub signature_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Concurrent (url, signature) jobs
    pub concurrency: usize,

    /// Default per-signature worker count
    pub threads: usize,

    /// Signatures with a higher level are skipped
    pub level: u32,

    /// Delay before each send in milliseconds
    pub delay_ms: u64,

    /// Request timeout in seconds
    pub timeout: u64,

    /// Retries after a transport failure
    pub retry: u32,

    /// Upstream proxy
    pub proxy: Option<String>,

    /// Verify TLS certificates
    pub verify_tls: bool,

    /// Follow redirects when a request does not say otherwise
    pub follow_redirects: bool,

    /// User agent string (random browser agent when unset)
    pub user_agent: Option<String>,

    /// Fetch random paths first and ignore responses that look the same
    pub filtering: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output directory
    pub dir: PathBuf,

    /// Disable storing matched records
    pub disabled: bool,

    /// Store records as JSON
    pub json: bool,

    /// Running index of stored records
    pub summary_file: String,

    /// Plain vulnerability list, deduplicated at the end of a scan
    pub vuln_summary_file: String,

    /// Index of stored passive matches
    pub passive_summary_file: String,

    /// Command template run on every match
    pub found_cmd: Option<String>,

    /// Template printed on every match instead of the default line
    pub quiet_format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScriptingConfig {
    /// Allow built-ins that spawn processes or write files
    pub allow_external_commands: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PassiveConfig {
    /// Run passive rules on every record
    pub enabled: bool,

    /// Directory of passive rule sets, on top of the built-in rules
    pub dir: Option<PathBuf>,

    /// Only rules whose `name-ruleid` contains this; `*` selects all
    pub select: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OobConfig {
    /// Callback host exposed to signatures as `oob`
    pub callback_host: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            root_dir: Self::default_root(),
            signature_dir: Self::default_root().map(|r| r.join("signatures")),
        }
    }
}

impl GeneralConfig {
    fn default_root() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "sigil", "sigil").map(|d| d.data_dir().to_path_buf())
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            concurrency: 20,
            threads: 10,
            level: 1,
            delay_ms: 0,
            timeout: 20,
            retry: 0,
            proxy: None,
            verify_tls: false,
            follow_redirects: false,
            user_agent: None,
            filtering: false,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("out"),
            disabled: false,
            json: false,
            summary_file: "sigil-summary.txt".to_string(),
            vuln_summary_file: "vuln-summary.txt".to_string(),
            passive_summary_file: "passive-summary.txt".to_string(),
            found_cmd: None,
            quiet_format: None,
        }
    }
}

impl Default for PassiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: GeneralConfig::default_root().map(|r| r.join("passives")),
            select: "*".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {:?}", config_path))?;

            let config: Config = toml::from_str(&contents)
                .with_context(|| "Failed to parse configuration file")?;

            tracing::info!("Loaded configuration from {:?}", config_path);
            Ok(config)
        } else {
            tracing::debug!("No configuration file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Get default configuration file path
    fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "sigil", "sigil")
            .context("Failed to determine config directory")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "sigil", "sigil")
            .context("Failed to determine data directory")?;

        Ok(dirs.data_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [scanner]
            threads = 3
            proxy = "http://127.0.0.1:8080"

            [scripting]
            allow_external_commands = true
            "#,
        )
        .unwrap();

        assert_eq!(config.scanner.threads, 3);
        assert_eq!(config.scanner.concurrency, 20);
        assert_eq!(config.scanner.proxy.as_deref(), Some("http://127.0.0.1:8080"));
        assert!(config.scripting.allow_external_commands);
        assert_eq!(config.output.vuln_summary_file, "vuln-summary.txt");
        assert_eq!(config.passive.select, "*");
        assert!(!config.passive.enabled);
        assert!(!config.scanner.filtering);
    }

    #[test]
    fn test_default_roundtrips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.scanner.timeout, 20);
        assert!(!parsed.scripting.allow_external_commands);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load(path.to_str()).unwrap();
        assert_eq!(config.scanner.level, 1);
    }
}
