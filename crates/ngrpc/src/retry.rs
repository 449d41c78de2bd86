//! SPDX-FileCopyrightText: © 2025 Cory Parent <goedelsoup+orasi@goedelsoup.io>
//! SPDX-License-Identifier: Apache-2.0
//!

//! Call-level retries

use crate::config::RetryConfig;
use std::future::Future;
use std::time::Duration;
use tonic::{Code, Status};
use tracing::debug;

/// Retry settings for unary calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Fixed delay between attempts
    pub backoff: Duration,

    /// Deadline for a single attempt
    pub per_attempt_timeout: Option<Duration>,

    /// Status codes worth another attempt
    pub retryable_codes: Vec<Code>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
            per_attempt_timeout: None,
            retryable_codes: vec![
                Code::ResourceExhausted,
                Code::Unavailable,
                Code::DeadlineExceeded,
            ],
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            per_attempt_timeout: config.per_attempt_timeout_ms.map(Duration::from_millis),
            ..Self::default()
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn is_retryable(&self, status: &Status) -> bool {
        self.retryable_codes.contains(&status.code())
    }

    /// Run `operation` until it succeeds, fails with a non-retryable status
    /// or runs out of attempts. A timed-out attempt counts as
    /// `DeadlineExceeded`.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, Status>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match self.per_attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(Status::deadline_exceeded(format!(
                        "attempt {} timed out after {:?}",
                        attempt, limit
                    ))),
                },
                None => operation().await,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(status) if attempt < attempts && self.is_retryable(&status) => {
                    debug!(
                        "Retrying call after {:?} (attempt {}/{}): {}",
                        status.code(),
                        attempt + 1,
                        attempts,
                        status.message()
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(status) => return Err(status),
            }
        }
    }
}
