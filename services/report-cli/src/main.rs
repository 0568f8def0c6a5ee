//! Analytics report CLI
//!
//! Single binary that:
//! 1. Loads the client registration and report definition from TOML
//! 2. Obtains a valid OAuth credential, running browser consent if needed
//! 3. Runs the report through the rate limiter
//! 4. Prints normalized rows to stdout as a JSON array

mod config;
mod metrics;
mod prompt;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use analytics_auth::{CredentialManager, FileTokenStore, TokenStore};
use analytics_report::{RateLimiter, ReportClient};
use anyhow::{Context, Result, bail};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::prompt::TerminalPrompt;

/// Outbound HTTP timeout for token and report calls
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Time given to an interrupted run to release its listener before exit
const INTERRUPT_GRACE: Duration = Duration::from_secs(2);

const USAGE: &str = "usage: analytics-report [--config PATH] [--reset] [--check]";

/// Parsed command line
#[derive(Debug, Default, PartialEq, Eq)]
struct Cli {
    config: Option<String>,
    /// Clear the stored credential and exit
    reset: bool,
    /// Only verify the property is reachable
    check: bool,
}

impl Cli {
    fn parse(args: &[String]) -> Result<Self> {
        let mut cli = Cli::default();
        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => {
                    let path = iter
                        .next()
                        .with_context(|| format!("--config needs a path\n{USAGE}"))?;
                    cli.config = Some(path.clone());
                }
                "--reset" => cli.reset = true,
                "--check" => cli.check = true,
                "-h" | "--help" => bail!("{USAGE}"),
                other => bail!("unknown argument: {other}\n{USAGE}"),
            }
        }
        if cli.reset && cli.check {
            bail!("--reset and --check are mutually exclusive\n{USAGE}");
        }
        Ok(cli)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cli = Cli::parse(&args)?;

    let prometheus = metrics::install_recorder().context("failed to install metrics recorder")?;

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        property = %config.report.property_id,
        store = %config.store.path.display(),
        redirect_ports = ?config.client.redirect_ports,
        max_requests = config.rate_limit.max_requests,
        window_secs = config.rate_limit.window_secs,
        "configuration loaded"
    );

    if cli.reset {
        return reset_credentials(&config.store.path).await;
    }

    let http = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;

    let identity = config.identity()?;
    let mut manager = CredentialManager::new(
        identity,
        Arc::new(FileTokenStore::new(&config.store.path)),
        Arc::new(TerminalPrompt),
        http.clone(),
    );
    if let Some(timeout) = config.consent_timeout() {
        manager = manager.with_consent_timeout(timeout);
    }
    let manager = Arc::new(manager);

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.max_requests,
        config.rate_window(),
    ));
    let client = ReportClient::new(manager.clone(), limiter, http, &config.report.api_base);

    let outcome = tokio::select! {
        result = run(&cli, &config, &client) => result,
        _ = interrupted(&manager) => Err(anyhow::anyhow!("interrupted")),
    };

    if let Some(ref path) = config.metrics.textfile {
        if let Err(e) = metrics::write_textfile(&prometheus, path) {
            warn!(path = %path.display(), error = %e, "failed to write metrics textfile");
        }
    }

    if let Err(ref e) = outcome {
        error!(error = %format!("{e:#}"), state = %manager.state(), "run failed");
    }
    outcome
}

async fn run(cli: &Cli, config: &Config, client: &ReportClient) -> Result<()> {
    let property = &config.report.property_id;

    if cli.check {
        let reachable = client
            .check_connection(property)
            .await
            .context("connection check failed")?;
        println!(
            "{}",
            serde_json::json!({ "property_id": property, "reachable": reachable })
        );
        if !reachable {
            bail!("property {property} is not reachable with the current credential");
        }
        return Ok(());
    }

    let request = config.report_request();
    let rows = client
        .fetch_report(&request)
        .await
        .with_context(|| format!("failed to fetch report for property {property}"))?;
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

/// Clears the stored credential. Needs no client secret.
async fn reset_credentials(store_path: &Path) -> Result<()> {
    FileTokenStore::new(store_path)
        .clear()
        .await
        .context("failed to clear stored credential")?;
    info!(store = %store_path.display(), "stored credential removed");
    Ok(())
}

/// Resolves after Ctrl-C plus a grace period. The interrupt cancels any
/// consent wait first so the run can return on its own.
async fn interrupted(manager: &CredentialManager) {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    warn!("interrupt received, cancelling consent wait");
    manager.cancel_consent();
    tokio::time::sleep(INTERRUPT_GRACE).await;
}
