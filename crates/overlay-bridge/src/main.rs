//! overlay-bridge: command-line entry point.
//!
//! # Usage
//!
//! ```text
//! overlay-bridge [--config PATH] check
//! overlay-bridge [--config PATH] demo [--url URL] [--body TEXT] [--timeout-secs N]
//! ```
//!
//! `check` loads the configuration and the identity's credentials and
//! validates them.  `demo` runs a request through the interceptor over an
//! in-process overlay and prints the response.
//!
//! | Variable                | Description                           |
//! |-------------------------|---------------------------------------|
//! | `OVERLAY_BRIDGE_CONFIG` | Path of the TOML configuration file   |
//! | `RUST_LOG`              | Overrides `[logging] level`           |

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use http::Uri;
use overlay_bridge::config::AppConfig;
use overlay_bridge::demo::{self, DemoOptions};
use overlay_bridge::identity::load_identity;
use overlay_loop::FileCredentialStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "overlay-bridge",
    about = "Overlay event loop and HTTP(S) request interception",
    version
)]
struct Cli {
    /// TOML configuration file.  A missing file means defaults.
    #[arg(long, default_value = "overlay-bridge.toml", env = "OVERLAY_BRIDGE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and the identity's credentials.
    Check,
    /// Fetch a URL through the interceptor over an in-process overlay.
    Demo {
        /// URL whose origin the demo service intercepts.
        #[arg(long, default_value = "https://demo.internal/hello")]
        url: Uri,
        /// Body the demo service answers with.
        #[arg(long, default_value = "hello from the overlay\n")]
        body: String,
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    let store = FileCredentialStore::new(&config.identity.credentials_dir);
    let identity = load_identity(&config.identity, &store)
        .with_context(|| format!("identity '{}' is not usable", config.identity.name))?;

    match cli.command {
        Command::Check => {
            info!(
                "identity '{}' ok (controller {}, credentials in {})",
                identity.name,
                identity.controller_url,
                store.identity_dir(&identity.name).display()
            );
            println!("ok");
        }
        Command::Demo {
            url,
            body,
            timeout_secs,
        } => {
            let options = DemoOptions {
                url,
                body,
                timeout: Duration::from_secs(timeout_secs),
            };
            let outcome = demo::run(
                identity,
                config.loop_config(),
                config.interceptor_config(),
                &options,
            )?;
            if let Some(failure) = outcome.failure {
                anyhow::bail!(failure);
            }
            if let Some(status) = outcome.status {
                println!("{status}");
            }
            std::io::stdout()
                .write_all(&outcome.body)
                .context("failed to write response body")?;
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
