//! Wildcert - Main entry point
//!
//! Interactive front end for the certificate engine: extract challenges,
//! wait for the operator to publish them, verify, issue and deploy.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use wildcert_common::{challenge_record_name, PropagationReport, VerificationReport};
use wildcert_config::{Config, ValidationOpts};
use wildcert_engine::{
    CertificateEngine, EngineError, ExtractRequest, HickoryTxtResolver, PropagationChecker,
    TxtLookup,
};

/// Wildcert - wildcard certificates over manual DNS-01
#[derive(Parser, Debug)]
#[command(name = "wildcert")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "WILDCERT_CONFIG", global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration and exit
    CheckConfig {
        /// Skip checks that touch the filesystem
        #[arg(long = "skip-paths")]
        skip_paths: bool,
    },
    /// Issue and deploy a certificate interactively
    Run {
        /// Base domain, e.g. example.com
        #[arg(short = 'd', long = "domain")]
        domain: String,

        /// ACME account contact address
        #[arg(short = 'e', long = "email")]
        email: String,

        /// Use the CA's staging environment
        #[arg(long = "staging")]
        staging: bool,

        /// Only cover the base domain, not *.domain
        #[arg(long = "no-wildcard")]
        no_wildcard: bool,
    },
    /// Regenerate the edge config for an installed certificate
    Resync {
        /// Base domain, e.g. example.com
        domain: String,
    },
    /// Show TXT values for a name across the resolver panel
    Lookup {
        /// Record name or base domain (expanded to its challenge record)
        name: String,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    // Lookup only reads the resolver panel, so the store need not exist yet
    let opts = match &cli.command {
        Commands::CheckConfig { skip_paths } => ValidationOpts {
            skip_paths: *skip_paths,
        },
        Commands::Lookup { .. } => ValidationOpts { skip_paths: true },
        Commands::Run { .. } | Commands::Resync { .. } => ValidationOpts::default(),
    };
    let config = load_config(cli.config.as_deref(), &opts)?;

    // Create runtime for the async pipeline
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    match cli.command {
        Commands::CheckConfig { .. } => check_config(&config, cli.config.as_deref()),
        Commands::Run {
            domain,
            email,
            staging,
            no_wildcard,
        } => {
            let request = ExtractRequest::new(domain, email)
                .staging(staging)
                .wildcard(!no_wildcard);
            runtime.block_on(run(&config, request))
        }
        Commands::Resync { domain } => runtime.block_on(resync(&config, &domain)),
        Commands::Lookup { name } => runtime.block_on(lookup(&config, &name)),
    }
}

/// Logs go to stderr so stdout carries only results
fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Config priority: --config / WILDCERT_CONFIG, then the embedded default.
///
/// Every command gets a validated config; warnings are logged, errors abort.
fn load_config(path: Option<&str>, opts: &ValidationOpts) -> Result<Config> {
    let config = match path {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            Config::from_file(path).context("Failed to load configuration file")?
        }
        None => {
            info!("No configuration specified, using embedded default configuration");
            Config::default_embedded().context("Failed to load embedded configuration")?
        }
    };

    let warnings = config
        .validate(opts)
        .context("Configuration validation failed")?;
    for warning in &warnings {
        warn!("{}", warning);
    }

    Ok(config)
}

fn check_config(config: &Config, path: Option<&str>) -> Result<ExitCode> {
    info!("Configuration test successful:");
    info!("  - ACME client: {}", config.acme_client.binary.display());
    info!(
        "  - {} propagation resolver(s), primary {}",
        config.dns.propagation_panel.len(),
        config.dns.primary
    );
    info!("  - store: {}", config.store.path.display());
    info!("  - edge fragments: {}", config.edge.fragment_dir.display());

    println!(
        "wildcert: configuration file {} test is successful",
        path.unwrap_or("(embedded)")
    );
    Ok(ExitCode::SUCCESS)
}

async fn run(config: &Config, request: ExtractRequest) -> Result<ExitCode> {
    let engine = CertificateEngine::from_config(config).context("Failed to start engine")?;
    let domain = request.domain.clone();

    let session = match engine.extract(request).await {
        Ok(session) => session,
        Err(e) => return report_failure(&engine, &domain, &e),
    };
    let domain = session.domain.clone();

    println!("Publish these TXT records, then press Enter (q to abort):\n");
    for record in &session.records {
        println!("  {}. {}  TXT  \"{}\"", record.ordinal, record.name, record.value);
    }
    println!();

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if !wait_for_operator(&mut stdin).await? {
            engine.cancel(&domain);
            println!("Aborted; challenge session discarded.");
            return Ok(ExitCode::FAILURE);
        }

        match engine.check_propagation(&domain).await {
            Ok(report) => print_propagation(&report),
            Err(e) => warn!(error = %e, "Propagation check failed"),
        }

        match engine.verify(&domain).await {
            Ok(_) => break,
            Err(EngineError::VerificationIncomplete { report }) => {
                print_verification(&report);
                println!("Press Enter to check again (q to abort).");
            }
            Err(e) => return report_failure(&engine, &domain, &e),
        }
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping issuance");
            on_interrupt.cancel();
        }
    });

    match engine.issue(&domain, &cancel).await {
        Ok(summary) => {
            for warning in &summary.warnings {
                warn!("{}", warning);
            }
            print_json(&summary)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => report_failure(&engine, &domain, &e),
    }
}

async fn resync(config: &Config, domain: &str) -> Result<ExitCode> {
    let engine = CertificateEngine::from_config(config).context("Failed to start engine")?;
    match engine.resync(domain).await {
        Ok(summary) => {
            print_json(&summary)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => report_failure(&engine, domain, &e),
    }
}

async fn lookup(config: &Config, name: &str) -> Result<ExitCode> {
    let name = if name.starts_with("_acme-challenge.") {
        name.to_string()
    } else {
        challenge_record_name(name)
    };

    let timeout = config.dns.query_timeout();
    let mut resolvers: Vec<Arc<dyn TxtLookup>> =
        vec![Arc::new(HickoryTxtResolver::new(config.dns.primary, timeout))];
    for ip in &config.dns.propagation_panel {
        if *ip != config.dns.primary {
            resolvers.push(Arc::new(HickoryTxtResolver::new(*ip, timeout)));
        }
    }

    let checker = PropagationChecker::new(
        resolvers,
        config.dns.max_concurrent_queries,
        config.dns.propagation_timeout(),
    );
    for sample in &checker.lookup(&name).await {
        match sample.error {
            Some(ref err) => println!("{:<18} error: {}", sample.resolver, err),
            None if sample.found.is_empty() => println!("{:<18} (no TXT records)", sample.resolver),
            None => println!("{:<18} {}", sample.resolver, sample.found.join(" ")),
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// `false` when the operator asked to abort or closed stdin
async fn wait_for_operator<R>(lines: &mut tokio::io::Lines<R>) -> Result<bool>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match lines.next_line().await.context("Failed to read from stdin")? {
        Some(line) => Ok(!line.trim().eq_ignore_ascii_case("q")),
        None => Ok(false),
    }
}

fn print_propagation(report: &PropagationReport) {
    println!(
        "Propagation: {}/{} resolvers ({:.0}%)",
        report.propagated,
        report.total,
        report.fraction() * 100.0
    );
    for sample in &report.samples {
        let state = if sample.propagated { "ok" } else { "pending" };
        println!("  {:<18} {}", sample.resolver, state);
    }
}

fn print_verification(report: &VerificationReport) {
    println!("Not all records are visible via {}:", report.resolver);
    for check in &report.records {
        let state = if check.matched { "matched" } else { "missing" };
        println!(
            "  {}. {} expected \"{}\" found {:?}: {}",
            check.ordinal, check.name, check.expected, check.found, state
        );
    }
}

fn report_failure(engine: &CertificateEngine, domain: &str, err: &EngineError) -> Result<ExitCode> {
    let phase = engine.session(domain).map(|s| s.phase);
    print_json(&err.to_failure_report(phase))?;
    Ok(ExitCode::FAILURE)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".kdl").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_invalid_fragment_template_rejected_on_load() {
        let file = config_file(
            r#"
edge {
    fragment-template "{domain} { respond 200 }"
}
"#,
        );
        let path = file.path().to_str().unwrap();

        let err = load_config(Some(path), &ValidationOpts { skip_paths: true }).unwrap_err();
        assert!(format!("{:#}", err).contains("fragment-template"));
    }

    #[test]
    fn test_valid_config_loads() {
        let file = config_file("session {\n    ttl-secs 600\n}\n");
        let path = file.path().to_str().unwrap();

        let config = load_config(Some(path), &ValidationOpts { skip_paths: true }).unwrap();
        assert_eq!(config.session.ttl_secs, 600);
        assert!(load_config(None, &ValidationOpts { skip_paths: true }).is_ok());
    }
}
