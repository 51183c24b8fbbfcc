#![allow(dead_code)]

use std::time::Duration;

use remora::{Config, Endpoint, Result};

/// Log to the test output. Only the first call installs the subscriber.
pub fn trace() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Two endpoints connected through an in-memory duplex stream.
pub async fn pair(config: Config) -> Result<(Endpoint, Endpoint)> {
    trace();
    let (a, b) = tokio::io::duplex(64 * 1024);
    let (probe, client) = tokio::join!(
        Endpoint::connect(a, config.clone()),
        Endpoint::connect(b, config)
    );
    Ok((probe?, client?))
}

/// Poll `condition` until it holds, failing the test after a few seconds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
