//! Endpoint health probe.
//!
//! Asks the model to repeat a fixed word and accepts the endpoint only if it
//! does, retrying under the configured policy. A reachable server that loads
//! the wrong model or answers with garbage is reported as unhealthy, not
//! healthy.

use crate::client::ModelClient;
use crate::invoke::{RetryPolicy, retry_call};
use crate::models::SensemakeError;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{info, warn};

/// Word the model is asked to echo back.
pub const HEALTH_CHECK_WORD: &str = "ready";

/// Health check result.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Endpoint name
    pub endpoint: String,
    /// Health status
    pub status: HealthStatus,
    /// Latency of the whole probe in milliseconds (if reachable)
    pub latency_ms: Option<u64>,
    /// Error message (if unhealthy or unreachable)
    pub error: Option<String>,
}

/// Health status of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Endpoint answered as instructed
    Healthy,
    /// Endpoint answered, but never with the expected reply
    Unhealthy,
    /// Endpoint could not be reached
    Unreachable,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}

fn is_expected_reply(reply: &str) -> bool {
    reply
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c == '"')
        .eq_ignore_ascii_case(HEALTH_CHECK_WORD)
}

/// Probe `model` with a fixed prompt under `policy`.
pub async fn check_health(model: &dyn ModelClient, policy: &RetryPolicy) -> HealthCheckResult {
    let start = Instant::now();
    let prompt = format!("Reply with exactly one word, \"{HEALTH_CHECK_WORD}\", and nothing else.");

    // Transport error of the most recent attempt, if that attempt had one.
    let last_transport_error: Mutex<Option<String>> = Mutex::new(None);
    let (prompt, last) = (prompt.as_str(), &last_transport_error);
    let outcome = retry_call(
        move || async move {
            let result = model.generate_text(prompt).await;
            if let Ok(mut slot) = last.lock() {
                *slot = match &result {
                    Err(e) if e.is_transport() => Some(e.to_string()),
                    _ => None,
                };
            }
            result
        },
        |reply: &String| is_expected_reply(reply),
        policy,
        "Health check",
    )
    .await;

    let latency_ms = start.elapsed().as_millis() as u64;
    let endpoint = model.name().to_string();

    let result = match outcome {
        Ok(_) => HealthCheckResult {
            endpoint,
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            error: None,
        },
        Err(e @ SensemakeError::RetryExhausted { .. }) => match last_transport_error
            .into_inner()
            .ok()
            .flatten()
        {
            Some(transport) => HealthCheckResult {
                endpoint,
                status: HealthStatus::Unreachable,
                latency_ms: None,
                error: Some(transport),
            },
            None => HealthCheckResult {
                endpoint,
                status: HealthStatus::Unhealthy,
                latency_ms: Some(latency_ms),
                error: Some(e.to_string()),
            },
        },
        Err(e) => HealthCheckResult {
            endpoint,
            status: HealthStatus::Unhealthy,
            latency_ms: Some(latency_ms),
            error: Some(e.to_string()),
        },
    };

    match result.status {
        HealthStatus::Healthy => {
            info!(endpoint = %result.endpoint, latency_ms, "Endpoint healthy");
        }
        status => {
            warn!(
                endpoint = %result.endpoint,
                %status,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Endpoint not healthy"
            );
        }
    }

    result
}
