//! Common utilities for integration tests.
//!
//! This module provides shared functions and types used across multiple integration test modules,
//! such as spawning the dashboard, managing ports, and waiting for it to be ready.

use core::time::Duration;
use std::{env, fs, net::TcpListener, path::Path};

use clap::Parser as _;
use tokio::{net::TcpStream, task, time};

use fleetpulse_dashboard::cli::Cli;

pub(crate) fn get_free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("failed to bind to address")
        .local_addr()
        .unwrap()
        .port()
}

/// Guard that stops the in-process dashboard when dropped.
pub(crate) struct KillOnDrop(task::JoinHandle<()>);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Spawn the dashboard from a given config string.
/// Writes the config to a temp file and runs `fleetpulse serve` against it.
pub(crate) fn spawn_dashboard_with_config(port: u16, config_toml: &str) -> KillOnDrop {
    let tmp = env::temp_dir().join(format!("fleetpulse_integration_config_{port}.toml"));
    fs::write(&tmp, config_toml).expect("failed to write config");

    spawn_dashboard_with_config_file(&tmp)
}

/// Spawn the dashboard from a given config file path.
pub(crate) fn spawn_dashboard_with_config_file(config_path: &Path) -> KillOnDrop {
    let cli = Cli::parse_from([
        "fleetpulse",
        "serve",
        "--config",
        config_path.to_str().unwrap(),
    ]);
    let handle = tokio::spawn(async move {
        // SAFETY: This is only used in integration tests and no user-facing code. It just tells the dashboard to log less verbose output.
        unsafe {
            env::set_var("FLEETPULSE_INTEGRATION_TEST", "1");
        }
        fleetpulse_dashboard::inner_main(cli)
            .await
            .expect("inner_main failed");
    });
    KillOnDrop(handle)
}

/// Wait until a TCP listener is accepting on `127.0.0.1:port` or panic after the timeout.
pub(crate) async fn wait_for_listening(port: u16, timeout_secs: u64) {
    let waited = time::timeout(Duration::from_secs(timeout_secs), async {
        while TcpStream::connect(("127.0.0.1", port)).await.is_err() {
            time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "server did not start within timeout");
}
