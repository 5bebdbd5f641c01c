//! Uses the single integration test approach.
//!
//! This improves parallelism when running the tests, and reduces the number of binaries that have to be built (and linked)
#![expect(
    clippy::tests_outside_test_module,
    reason = "This is the integration test binary, so it's expected that tests are outside of a test module"
)]
#![expect(clippy::unwrap_used, reason = "Using unwrap in tests is fine")]

extern crate alloc;
extern crate core;

mod common;
mod end_to_end;
mod websocket;

use common::{get_free_port, spawn_dashboard_with_config, wait_for_listening};

#[tokio::test]
async fn serve_listens_on_configured_port() {
    let port = get_free_port();
    let _server = spawn_dashboard_with_config(
        port,
        &format!(
            r#"
        [server]
        port = {port}
        bind = "127.0.0.1"
        "#
        ),
    );
    wait_for_listening(port, 5).await;
}
