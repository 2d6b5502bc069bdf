//! VoucherSnap CLI - iNaturalist sign-in and upload history.
//!
//! This tool manages the cached iNaturalist credential and lets the user
//! inspect which images have already been sent to which observations.

mod config;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vouchersnap_auth::{AuthBroker, AuthStatus, ManualBrowser, TokenStore};
use vouchersnap_common::{paths, Error};
use vouchersnap_ledger::{LedgerIdentity, UploadLedger};

use config::AppConfig;

#[derive(Parser)]
#[command(name = "vouchersnap")]
#[command(about = "VoucherSnap - iNaturalist authentication and upload history")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in to iNaturalist through the browser.
    Login {
        /// Sign in again even if the cached credential is still valid.
        #[arg(short, long)]
        force: bool,

        /// Do not open a browser; print the sign-in URL instead.
        #[arg(long)]
        no_browser: bool,
    },

    /// Forget the cached credential.
    Logout,

    /// Show whether a usable credential is cached.
    Status,

    /// List recent uploads, newest first.
    History {
        /// Maximum number of entries to show.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only show uploads to this observation, oldest first.
        #[arg(short, long)]
        observation: Option<u64>,
    },

    /// Check whether an image was already uploaded to an observation.
    Check {
        /// iNaturalist observation id.
        #[arg(short, long)]
        observation: u64,

        /// Image file to check.
        file: PathBuf,
    },

    /// Show or change settings.
    Config {
        /// Application (client) id registered with iNaturalist.
        #[arg(long)]
        client_id: Option<String>,

        /// Loopback port of the registered redirect URI.
        #[arg(long)]
        port: Option<u16>,

        /// Seconds to wait for the browser to redirect back.
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
    }

    if let Err(err) = run(cli.command).await {
        eprintln!("Error: {:#}", err);
        if let Some(hint) = err.downcast_ref::<Error>().and_then(Error::hint) {
            eprintln!("Hint: {}", hint);
        }
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    let config_path = paths::config_path()?;
    let config = AppConfig::load(&config_path)
        .await
        .context("Failed to load settings")?;

    match command {
        Commands::Login { force, no_browser } => cmd_login(config, force, no_browser).await,
        Commands::Logout => cmd_logout().await,
        Commands::Status => cmd_status().await,
        Commands::History { limit, observation } => {
            let limit = limit.unwrap_or(config.history_limit);
            match observation {
                Some(observation) => cmd_observation_history(observation).await,
                None => cmd_history(limit).await,
            }
        }
        Commands::Check { observation, file } => cmd_check(observation, &file).await,
        Commands::Config {
            client_id,
            port,
            timeout,
        } => cmd_config(config, &config_path, client_id, port, timeout).await,
    }
}

/// Build a broker that prints the URL when no browser is opened and stops on Ctrl-C.
fn broker(config: AppConfig, no_browser: bool) -> Result<AuthBroker> {
    let store = TokenStore::default_location()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mut broker = AuthBroker::with_defaults(config.auth, store)?.with_cancellation(cancel);
    if no_browser {
        broker = broker.with_browser(Arc::new(ManualBrowser));
    }
    Ok(broker.with_manual_url_handler(|url| {
        println!("Open this URL in a browser to sign in:");
        println!("\n  {}\n", url);
    }))
}

/// Sign in, reusing a valid cached credential unless forced.
async fn cmd_login(config: AppConfig, force: bool, no_browser: bool) -> Result<()> {
    let broker = broker(config, no_browser)?;
    info!(
        "Waiting up to {}s for the browser to redirect to {}",
        broker.config().callback_timeout_secs,
        broker.config().redirect_uri()
    );

    let credential = if force {
        broker.login().await
    } else {
        broker.ensure_authenticated().await
    }
    .context("Login failed")?;

    println!("Logged in.");
    println!(
        "  Expires: {}",
        credential.expires_at().with_timezone(&Local).format("%Y-%m-%d %H:%M")
    );
    if let Some(scope) = &credential.scope {
        println!("  Scope: {}", scope);
    }

    Ok(())
}

/// Remove the cached credential.
async fn cmd_logout() -> Result<()> {
    let store = TokenStore::default_location()?;
    store.clear().await.context("Failed to remove credential")?;
    info!("Logged out");
    println!("Logged out.");
    Ok(())
}

async fn cmd_status() -> Result<()> {
    let store = TokenStore::default_location()?;
    match store.status().await {
        AuthStatus::LoggedOut => println!("Not logged in."),
        AuthStatus::Valid { expires_at } => println!(
            "Logged in until {}.",
            expires_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        ),
        AuthStatus::Expired { expired_at } => println!(
            "Login expired at {}. Run `vouchersnap login`.",
            expired_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        ),
    }

    let ledger = UploadLedger::open_default()
        .await
        .context("Failed to open upload history")?;
    println!("Uploads recorded: {}", ledger.len());

    Ok(())
}

/// Print the most recent uploads.
async fn cmd_history(limit: usize) -> Result<()> {
    let ledger = UploadLedger::open_default()
        .await
        .context("Failed to open upload history")?;

    if ledger.is_empty() {
        println!("No uploads recorded.");
        return Ok(());
    }

    println!("Recent uploads ({} of {}):", limit.min(ledger.len()), ledger.len());
    for entry in ledger.recent(limit) {
        let when = entry.recorded_at.with_timezone(&Local).format("%Y-%m-%d %H:%M");
        let name = entry.details.filename.as_deref().unwrap_or("-");
        let outcome = entry.outcome.to_string();
        println!("  {}  {:<14}  {}  {}", when, outcome, name, entry.identity);
        if let Some(caption) = &entry.details.caption {
            println!("      {}", caption);
        }
    }

    Ok(())
}

/// Print every upload attached to one observation.
async fn cmd_observation_history(observation: u64) -> Result<()> {
    let ledger = UploadLedger::open_default()
        .await
        .context("Failed to open upload history")?;

    let entries = ledger.for_observation(observation);
    if entries.is_empty() {
        println!("No uploads recorded for observation {}.", observation);
        return Ok(());
    }

    println!("Uploads to observation {} ({}):", observation, entries.len());
    for entry in entries {
        let when = entry.recorded_at.with_timezone(&Local).format("%Y-%m-%d %H:%M");
        let name = entry.details.filename.as_deref().unwrap_or("-");
        let outcome = entry.outcome.to_string();
        println!("  {}  {:<14}  {}", when, outcome, name);
    }

    Ok(())
}

/// Report whether `file` was already sent to `observation`.
async fn cmd_check(observation: u64, file: &Path) -> Result<()> {
    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let identity = LedgerIdentity::for_observation(observation, &content);

    let ledger = UploadLedger::open_default()
        .await
        .context("Failed to open upload history")?;

    match ledger.find(&identity) {
        Some(entry) => {
            warn!("Duplicate upload detected for observation {}", observation);
            println!(
                "Already uploaded to observation {} on {} ({}).",
                observation,
                entry.recorded_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                entry.outcome
            );
        }
        None => println!("Not yet uploaded to observation {}.", observation),
    }

    Ok(())
}

/// Update settings, or print them when nothing is given.
async fn cmd_config(
    mut config: AppConfig,
    path: &Path,
    client_id: Option<String>,
    port: Option<u16>,
    timeout: Option<u64>,
) -> Result<()> {
    if client_id.is_none() && port.is_none() && timeout.is_none() {
        println!("Settings ({}):", path.display());
        let client_id = if config.auth.client_id.is_empty() {
            "(not set)"
        } else {
            config.auth.client_id.as_str()
        };
        println!("  Client id: {}", client_id);
        println!("  Redirect URI: {}", config.auth.redirect_uri());
        println!("  Callback timeout: {}s", config.auth.callback_timeout_secs);
        return Ok(());
    }

    if let Some(client_id) = client_id {
        config.auth.client_id = client_id;
    }
    if let Some(port) = port {
        config.auth.redirect_port = port;
    }
    if let Some(timeout) = timeout {
        config.auth.callback_timeout_secs = timeout;
    }
    config.auth.validate().context("Invalid settings")?;

    config.save(path).await.context("Failed to save settings")?;
    println!("Settings saved to {}", path.display());
    println!("  Redirect URI: {}", config.auth.redirect_uri());

    Ok(())
}
