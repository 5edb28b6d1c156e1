//! HTTP health checker.
//!
//! One check is one GET bounded by the target's timeout. Every
//! execution path yields a [`CheckResult`]; the checker never fails
//! past its boundary.

use crate::model::{CheckResult, TargetConfig};

use std::time::{Duration, Instant};

/// Maximum response body size read per check. Anything larger is a
/// failing outcome, never a silently truncated success.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Executes health checks against monitored endpoints.
///
/// Holds two clients: the default verifying client and one that skips
/// certificate verification, used only for targets that opt in via
/// `ignore_tls_error`.
pub struct Checker {
    client: reqwest::Client,
    insecure_client: reqwest::Client,
}

impl Checker {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            insecure_client: reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .build()?,
        })
    }

    /// Run one check and classify the outcome.
    ///
    /// Latency is measured from request dispatch to the point the
    /// outcome is finalized, including on failure.
    pub async fn check(&self, target: &TargetConfig) -> CheckResult {
        let client = if target.ignore_tls_error {
            &self.insecure_client
        } else {
            &self.client
        };

        let timeout = Duration::from_millis(target.timeout_ms);
        let start = Instant::now();

        let response = match client.get(&target.url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => return transport_failure(target, start, e),
        };

        let status = response.status().as_u16();
        if status != target.expected_status {
            return CheckResult::failure(
                &target.id,
                elapsed_ms(start),
                Some(status),
                "Invalid Status Code",
            );
        }

        let body = match read_body_capped(response).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                return CheckResult::failure(
                    &target.id,
                    elapsed_ms(start),
                    Some(status),
                    "Response body exceeded 1 MiB limit",
                );
            }
            Err(e) => return transport_failure(target, start, e),
        };

        if !body.contains(&target.expected_content) {
            return CheckResult::failure(
                &target.id,
                elapsed_ms(start),
                Some(status),
                "Expected content not found",
            );
        }

        CheckResult::success(&target.id, elapsed_ms(start), status)
    }
}

/// Read the response body in chunks, stopping at [`MAX_BODY_BYTES`].
///
/// Returns `Ok(None)` when the body exceeds the cap.
async fn read_body_capped(mut response: reqwest::Response) -> Result<Option<String>, reqwest::Error> {
    let mut buf: Vec<u8> = Vec::new();

    while let Some(chunk) = response.chunk().await? {
        if buf.len() + chunk.len() > MAX_BODY_BYTES {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

fn transport_failure(target: &TargetConfig, start: Instant, e: reqwest::Error) -> CheckResult {
    let latency_ms = elapsed_ms(start);
    if e.is_timeout() {
        CheckResult::failure(&target.id, latency_ms, None, "Timeout")
    } else {
        CheckResult::failure(
            &target.id,
            latency_ms,
            None,
            format!("Connection Error: {e}"),
        )
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
