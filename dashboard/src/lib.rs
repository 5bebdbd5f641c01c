//! Library entry for the `fleetpulse_dashboard` crate.
//!
//! Exposes `inner_main` so a workspace-level shim binary can call into the dashboard logic,
//! and the hub, store and dispatcher for embedding and integration tests.
#![cfg_attr(
    test,
    expect(clippy::indexing_slicing, reason = "This is not problematic in tests",)
)]

extern crate alloc;
extern crate core;

pub mod app;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod fleet;
pub mod http;
pub mod hub;
pub mod source;
pub mod store;
pub mod tail;
pub mod websocket;

// for use in integration tests
pub use websocket::{ClientMessage, WsMessage};

use std::{env, path::Path, sync::Once};

use eyre::Result;
use tracing::{Instrument as _, info};
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

use cli::{Cli, Command, LogFormat};
use config::DashboardConfig;

static INIT_TRACING: Once = Once::new();

fn init_tracing(log_format: LogFormat) {
    INIT_TRACING.call_once(move || {
        let default_level = if env::var("FLEETPULSE_INTEGRATION_TEST").is_ok() {
            "error"
        } else {
            "info"
        };

        let builder = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
            )
            .with_timer(ChronoLocal::rfc_3339());

        match log_format {
            LogFormat::Compact => builder.compact().init(),
            LogFormat::Json => builder.json().init(),
            LogFormat::Pretty => builder.pretty().init(),
        }
    });
}

async fn load_config(path: Option<&Path>) -> Result<DashboardConfig> {
    match path {
        Some(path) => config::load(path).await,
        None => {
            info!("No config file given, using built-in defaults");
            Ok(DashboardConfig::default())
        }
    }
}

/// The dashboard's main function; can be called from a shim binary.
///
/// # Errors
///
/// Returns an error if the config cannot be loaded or the server fails to start.
pub async fn inner_main(invocation: Cli) -> Result<()> {
    match invocation.command {
        Command::Serve(args) => {
            init_tracing(args.log_format);
            let startup_span = tracing::info_span!(
                "fleetpulse.startup",
                config = ?args.config,
                pid = ?std::process::id(),
                version = env!("CARGO_PKG_VERSION")
            );
            let config = load_config(args.config.as_deref())
                .instrument(startup_span.clone())
                .await?;
            info!(parent: &startup_span, "Starting dashboard");
            app::start(&config, args.port, args.bind.as_deref())
                .instrument(startup_span)
                .await
        }
        Command::Tail(args) => {
            init_tracing(args.log_format);
            let config = load_config(args.config.as_deref()).await?;
            tail::run(&config, args.seconds).in_current_span().await;
            Ok(())
        }
    }
}
