//! Sigil - signature-driven web vulnerability scanner
//!
//! Command line entry point: loads configuration and signatures, then runs
//! the scan engine against the given targets.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sigil::app::Config;
use sigil::error::{ConfigError, SigilError};
use sigil::http::{ReqwestTransport, TransportConfig};
use sigil::reporting::ScanReport;
use sigil::scanner::ScanEngine;
use sigil::signature::Catalog;

/// Signature-driven web vulnerability scanner
#[derive(Parser, Debug)]
#[command(name = "sigil")]
#[command(author, version, about = "Signature-driven web vulnerability scanner", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(long, global = true, env = "SIGIL_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "SIGIL_LOG_LEVEL")]
    log_level: String,

    /// Log file path (enables file logging)
    #[arg(long, global = true, env = "SIGIL_LOG_FILE")]
    log_file: Option<String>,

    /// Enable JSON structured logging
    #[arg(long, global = true, env = "SIGIL_LOG_JSON")]
    log_json: bool,

    /// Generate default configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan targets with signatures
    Scan(ScanArgs),
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Target URL (repeatable)
    #[arg(short = 'u', long = "url")]
    urls: Vec<String>,

    /// File with one target URL per line
    #[arg(short = 'U', long = "url-file")]
    url_file: Option<PathBuf>,

    /// Signature file or directory (repeatable)
    #[arg(short = 's', long = "signs")]
    signs: Vec<PathBuf>,

    /// Concurrent (url, signature) jobs
    #[arg(short = 'c', long, env = "SIGIL_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Default worker count per signature
    #[arg(long)]
    threads: Option<usize>,

    /// Skip signatures above this level
    #[arg(long)]
    level: Option<u32>,

    /// Delay before each request in milliseconds
    #[arg(long)]
    delay: Option<u64>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Upstream proxy
    #[arg(long, env = "SIGIL_PROXY")]
    proxy: Option<String>,

    /// Output directory
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Do not store matched records
    #[arg(long)]
    no_output: bool,

    /// Store matched records as JSON
    #[arg(long)]
    json: bool,

    /// Command run on every match
    #[arg(long)]
    found_cmd: Option<String>,

    /// Allow built-ins that run commands or write files
    #[arg(long)]
    allow_cmd: bool,

    /// Run passive rules on every response
    #[arg(long)]
    passive: bool,

    /// Directory of passive rule sets
    #[arg(long)]
    passive_dir: Option<PathBuf>,

    /// Only run passive rules whose `name-ruleid` contains this
    #[arg(long = "select-passive")]
    select_passive: Option<String>,

    /// Ignore responses identical to those of random missing paths
    #[arg(long)]
    filtering: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        return generate_default_config();
    }

    init_logging(&cli)?;
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "Starting Sigil");

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(Command::Scan(args)) = &cli.command {
        apply_overrides(&mut config, args);
    }
    if let Err(e) = validate_config(&config) {
        eprintln!("{}", SigilError::from(e).user_message());
        std::process::exit(2);
    }

    if cli.validate_config {
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    match cli.command {
        Some(Command::Scan(args)) => {
            if let Err(e) = run_scan(args, config).await {
                eprintln!("{}", e.user_message());
                std::process::exit(1);
            }
            Ok(())
        }
        None => {
            eprintln!("Nothing to do. Run `sigil scan --help` for usage.");
            Ok(())
        }
    }
}

/// Initialize the logging system
fn init_logging(cli: &Cli) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(log_path) = &cli.log_file {
        let path = std::path::Path::new(log_path);
        let file_appender = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => {
                let filename = path
                    .file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or("sigil.log");
                RollingFileAppender::new(Rotation::DAILY, dir, filename)
            }
            None => {
                let log_dir = Config::data_dir()
                    .map(|d| d.join("logs"))
                    .unwrap_or_else(|_| PathBuf::from("."));
                std::fs::create_dir_all(&log_dir).ok();
                RollingFileAppender::new(Rotation::DAILY, log_dir, log_path)
            }
        };

        if cli.log_json {
            let file_layer = fmt::layer().json().with_writer(file_appender).with_ansi(false);
            subscriber.with(file_layer).init();
        } else {
            let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);
            subscriber.with(file_layer).init();
        }
    } else if cli.log_json {
        subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        subscriber.with(fmt::layer().with_writer(std::io::stderr)).init();
    }

    Ok(())
}

/// Apply command line overrides to the loaded configuration
fn apply_overrides(config: &mut Config, args: &ScanArgs) {
    if let Some(concurrency) = args.concurrency {
        config.scanner.concurrency = concurrency;
    }
    if let Some(threads) = args.threads {
        config.scanner.threads = threads;
    }
    if let Some(level) = args.level {
        config.scanner.level = level;
    }
    if let Some(delay) = args.delay {
        config.scanner.delay_ms = delay;
    }
    if let Some(timeout) = args.timeout {
        config.scanner.timeout = timeout;
    }
    if args.proxy.is_some() {
        config.scanner.proxy = args.proxy.clone();
    }
    if let Some(output) = &args.output {
        config.output.dir = output.clone();
    }
    if args.no_output {
        config.output.disabled = true;
    }
    if args.json {
        config.output.json = true;
    }
    if args.found_cmd.is_some() {
        config.output.found_cmd = args.found_cmd.clone();
    }
    if args.allow_cmd {
        config.scripting.allow_external_commands = true;
    }
    if args.passive {
        config.passive.enabled = true;
    }
    if args.passive_dir.is_some() {
        config.passive.dir = args.passive_dir.clone();
    }
    if let Some(select) = &args.select_passive {
        config.passive.select = select.clone();
    }
    if args.filtering {
        config.scanner.filtering = true;
    }
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |field: &str, reason: &str| ConfigError::ValidationError {
        field: field.to_string(),
        reason: reason.to_string(),
    };

    if config.scanner.concurrency == 0 {
        return Err(invalid("scanner.concurrency", "must be greater than 0"));
    }
    if config.scanner.threads == 0 {
        return Err(invalid("scanner.threads", "must be greater than 0"));
    }
    if config.scanner.timeout == 0 {
        return Err(invalid("scanner.timeout", "must be greater than 0"));
    }
    if config.output.found_cmd.is_some() && !config.scripting.allow_external_commands {
        tracing::warn!("found_cmd is set but external commands are disabled; it will not run");
    }
    Ok(())
}

/// Generate default configuration file
fn generate_default_config() -> Result<()> {
    let config = Config::default();
    let toml = toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
    println!("{}", toml);
    Ok(())
}

/// Targets from `-u` followed by those in `-U`
fn read_targets(args: &ScanArgs) -> Result<Vec<String>, SigilError> {
    let mut urls: Vec<String> = args.urls.iter().map(|u| u.trim().to_string()).collect();
    if let Some(path) = &args.url_file {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SigilError::with_context(format!("Reading {}", path.display()), e))?;
        urls.extend(content.lines().map(str::trim).map(String::from));
    }
    urls.retain(|u| !u.is_empty());
    urls.dedup();
    Ok(urls)
}

async fn run_scan(args: ScanArgs, config: Config) -> Result<(), SigilError> {
    let urls = read_targets(&args)?;
    if urls.is_empty() {
        return Err(SigilError::with_context(
            "No targets",
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "pass -u <url> or -U <file>"),
        ));
    }

    let mut paths = args.signs.clone();
    if paths.is_empty() {
        paths.extend(config.general.signature_dir.clone());
    }
    let signatures = Catalog::new().load_all(&paths)?;

    let transport = Arc::new(ReqwestTransport::new(TransportConfig::from(&config.scanner))?);
    let engine = ScanEngine::builder(&config, transport).build();

    tracing::info!(targets = urls.len(), signatures = signatures.len(), "Scanning");
    let report = tokio::select! {
        report = engine.scan(&urls, &signatures) => report,
        _ = signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping scan");
            return Ok(());
        }
    };

    print_summary(&report);
    Ok(())
}

fn print_summary(report: &ScanReport) {
    eprintln!(
        "Scanned {} job(s) in {}s: {} analyzed, {} abandoned, {} finding(s) on {} host(s), {} passive match(es)",
        report.jobs,
        report.duration_secs(),
        report.analyzed,
        report.abandoned,
        report.findings.len(),
        report.unique_hosts(),
        report.passive
    );
    for (risk, count) in report.by_risk() {
        eprintln!("  {:<10} {}", risk, count);
    }
}
