//! Connect retry as a decorator around the single-attempt
//! [`S7Client::connect`]. Retry is caller policy, not core behavior: the
//! core never retries on its own.

use crate::client::{ClientConfig, S7Client};
use crate::error::{Error, Result};
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connection attempts, including the first one
    pub attempts: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Attempt [`S7Client::connect`] up to `policy.attempts` times with a
/// fixed delay in between, returning the last error when every attempt
/// fails. Each failed attempt is logged.
pub fn connect_with_retry(config: &ClientConfig, policy: &RetryPolicy) -> Result<S7Client> {
    let attempts = policy.attempts.max(1);
    let mut last = None;
    for attempt in 1..=attempts {
        match S7Client::connect(config) {
            Ok(client) => return Ok(client),
            Err(e) => {
                warn!(
                    attempt,
                    attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %e,
                    "connect attempt failed"
                );
                last = Some(e);
                if attempt < attempts {
                    thread::sleep(policy.delay);
                }
            }
        }
    }
    Err(last.unwrap_or(Error::Connect {
        context: "no connection attempts were made",
        source: None,
    }))
}
