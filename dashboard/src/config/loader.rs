//! Configuration loading utilities.
//!
//! This module provides functions for reading, parsing and validating
//! configuration files from disk.

use std::path::Path;

use eyre::{WrapErr as _, ensure};
use tokio::fs;

use crate::config::DashboardConfig;

/// Reads and parses the dashboard config from a TOML file.
///
/// # Errors
///
/// Returns an error if the config file cannot be read, parsed, or fails validation.
pub async fn load<P: AsRef<Path>>(path: P) -> eyre::Result<DashboardConfig> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(path_ref).await.wrap_err(format!(
        "Failed to read config file at: {}",
        path_ref.display()
    ))?;
    let config = parse(&content).wrap_err(format!(
        "Failed to load config at: {}",
        path_ref.display()
    ))?;
    Ok(config)
}

/// Parses and validates a TOML document.
///
/// # Errors
///
/// Returns an error if the document is not valid TOML for [`DashboardConfig`] or fails validation.
pub fn parse(content: &str) -> eyre::Result<DashboardConfig> {
    let config: DashboardConfig = toml::from_str(content).wrap_err("Failed to parse config as TOML")?;
    validate(&config)?;
    Ok(config)
}

/// Rejects values the telemetry source or the store cannot work with.
///
/// # Errors
///
/// Returns an error naming the first offending key.
pub fn validate(config: &DashboardConfig) -> eyre::Result<()> {
    let telemetry = &config.telemetry;
    for (key, value) in [
        ("telemetry.device_interval_ms", telemetry.device_interval_ms),
        ("telemetry.analytics_interval_ms", telemetry.analytics_interval_ms),
        ("telemetry.alert_interval_ms", telemetry.alert_interval_ms),
    ] {
        ensure!(value > 0, "{key} must be greater than zero");
    }
    for (key, value) in [
        ("telemetry.online_probability", telemetry.online_probability),
        ("telemetry.alert_probability", telemetry.alert_probability),
    ] {
        ensure!(
            (0.0..=1.0).contains(&value),
            "{key} must be within 0.0..=1.0, got {value}"
        );
    }
    ensure!(
        !telemetry.devices.is_empty(),
        "telemetry.devices must name at least one device"
    );
    ensure!(
        config.store.display_limit > 0,
        "store.display_limit must be greater than zero"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{env, fs};

    use super::*;
    use crate::config::OrderingPolicy;

    #[tokio::test]
    async fn load_dashboard_config_file() {
        let toml_str = r#"
            [server]
            port = 9090
            bind = "0.0.0.0"

            [telemetry]
            device_interval_ms = 500
            devices = ["dev-001", "dev-002"]

            [store]
            display_limit = 5
            ordering = "reject_stale"
        "#;
        let tmp = env::temp_dir().join("fleetpulse_test_config.toml");
        fs::write(&tmp, toml_str).unwrap();
        let cfg = load(&tmp).await.unwrap();
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.bind, "0.0.0.0");
        assert_eq!(cfg.telemetry.device_interval_ms, 500);
        assert_eq!(cfg.telemetry.analytics_interval_ms, 5000);
        assert_eq!(cfg.telemetry.devices, vec!["dev-001", "dev-002"]);
        assert_eq!(cfg.store.display_limit, 5);
        assert_eq!(cfg.store.ordering, OrderingPolicy::RejectStale);
        assert_eq!(cfg.fleet.command_latency_ms, 800);
    }

    #[tokio::test]
    async fn load_dashboard_config_missing_file() {
        let tmp = env::temp_dir().join("fleetpulse_does_not_exist.toml");
        let res = load(&tmp).await;
        assert!(res.is_err(), "Expected error for missing file");
    }

    #[test]
    fn empty_document_uses_reference_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg, DashboardConfig::default());
        assert_eq!(cfg.telemetry.devices.len(), 15);
        assert_eq!(cfg.telemetry.devices.first().map(String::as_str), Some("dev-001"));
        assert_eq!(cfg.telemetry.devices.last().map(String::as_str), Some("dev-015"));
        assert!((cfg.telemetry.online_probability - 0.9).abs() < f64::EPSILON);
        assert_eq!(cfg.store.ordering, OrderingPolicy::LastWriteWins);
        assert_eq!(cfg.store.display_limit, 10);
    }

    #[test]
    fn invalid_toml_is_rejected() {
        assert!(parse("not valid toml").is_err(), "Expected error for invalid TOML");
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = parse("[telemetry]\nalert_interval_ms = 0").unwrap_err();
        assert!(
            format!("{err:#}").contains("telemetry.alert_interval_ms"),
            "error should name the key: {err:#}"
        );
    }

    #[test]
    fn out_of_range_probability_is_rejected() {
        assert!(parse("[telemetry]\nonline_probability = 1.5").is_err());
        assert!(parse("[telemetry]\nalert_probability = -0.1").is_err());
    }

    #[test]
    fn empty_device_set_is_rejected() {
        assert!(parse("[telemetry]\ndevices = []").is_err());
    }
}
