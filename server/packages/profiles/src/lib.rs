use std::time::{Duration, Instant};

use reqwest::blocking::Client as HttpClient;
use thiserror::Error;

pub mod profile;
pub mod settings;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("could not determine the home directory")]
    NoHomeDir,
    #[error("relay is not running ({url} not OK); use --force to switch anyway")]
    RelayUnavailable { url: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Returns whether `GET <base_url>/health` answers 200 within the health check timeout.
pub fn relay_is_healthy(base_url: &str) -> Result<bool, ProfileError> {
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    let started_at = Instant::now();
    let client = HttpClient::builder()
        .connect_timeout(HEALTH_CHECK_TIMEOUT)
        .timeout(HEALTH_CHECK_TIMEOUT)
        .build()?;

    match client.get(&url).send() {
        Ok(response) if response.status().is_success() => {
            tracing::info!(
                url = %url,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "relay health check succeeded"
            );
            Ok(true)
        }
        Ok(response) => {
            tracing::warn!(
                url = %url,
                status = %response.status(),
                "relay health check returned non-success status"
            );
            Ok(false)
        }
        Err(err) => {
            tracing::warn!(url = %url, error = %err, "relay health check failed");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_relay_is_unhealthy() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let healthy = relay_is_healthy(&format!("http://127.0.0.1:{port}/")).expect("health check");
        assert!(!healthy);
    }
}
