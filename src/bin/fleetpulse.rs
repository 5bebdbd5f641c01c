//! Shim binary that calls into the `fleetpulse_dashboard` library's `inner_main`.
use clap::Parser as _;
use eyre::Result;
use fleetpulse_dashboard::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Delegate to library entrypoint
    fleetpulse_dashboard::inner_main(Cli::parse()).await
}
