// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Exponential backoff for provisioning waits and Kubernetes API calls.
//!
//! A [`BackoffPolicy`] is a plain value describing a schedule; a [`Backoff`] walks one.
//! Two schedules are used:
//!
//! - [`lb_active_backoff`] paces the reads of a freshly created load balancer while it
//!   provisions. It is step bounded and unjittered.
//! - [`KUBE_API_RETRY`] drives [`retry_api_call`], which retries transient Kubernetes
//!   API errors (429, 5xx) and fails fast on permanent ones.

use crate::options::ActiveWaitOptions;
use anyhow::{anyhow, Result};
use rand::Rng;
use reqwest::StatusCode;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound of a single provisioning poll interval
const LB_ACTIVE_MAX_INTERVAL: Duration = Duration::from_secs(60);

/// Shape of an exponential schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    /// Cap applied to every interval after growth
    pub max_interval: Duration,
    pub factor: f64,
    /// Fraction of each interval used as symmetric jitter, `0.0` disables it
    pub jitter: f64,
    /// Stop once this much time has passed since the first interval
    pub max_elapsed: Option<Duration>,
    /// Stop after handing out this many intervals
    pub max_steps: Option<u32>,
}

/// Kubernetes API retries: 100ms doubling up to 10s, ±10% jitter, two minutes total.
pub const KUBE_API_RETRY: BackoffPolicy = BackoffPolicy {
    initial: Duration::from_millis(100),
    max_interval: Duration::from_secs(10),
    factor: 2.0,
    jitter: 0.1,
    max_elapsed: Some(Duration::from_secs(120)),
    max_steps: None,
};

/// Running state of one schedule.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    next: Duration,
    steps: u32,
    started: Instant,
}

impl Backoff {
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            next: policy.initial,
            policy,
            steps: 0,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Number of intervals handed out so far.
    #[must_use]
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Next delay, or `None` once the step or time budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let out_of_time = self
            .policy
            .max_elapsed
            .is_some_and(|limit| self.started.elapsed() >= limit);
        let out_of_steps = self.policy.max_steps.is_some_and(|limit| self.steps >= limit);
        if out_of_time || out_of_steps {
            return None;
        }

        self.steps += 1;
        let delay = self.next;
        self.next = delay
            .mul_f64(self.policy.factor)
            .min(self.policy.max_interval);
        Some(jitter(delay, self.policy.jitter))
    }
}

fn jitter(delay: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 {
        return delay;
    }
    let secs = delay.as_secs_f64();
    let spread = secs * fraction;
    let jittered = rand::thread_rng().gen_range((secs - spread)..=(secs + spread));
    Duration::from_secs_f64(jittered.max(0.0))
}

/// Schedule for waiting on a new load balancer to leave `PENDING_CREATE`.
///
/// With the defaults (1s, factor 1.2, 19 steps) the wait gives up after roughly
/// two and a half minutes of polling.
#[must_use]
pub fn lb_active_backoff(options: &ActiveWaitOptions) -> Backoff {
    Backoff::new(BackoffPolicy {
        initial: options.initial_delay(),
        max_interval: LB_ACTIVE_MAX_INTERVAL,
        factor: options.factor,
        jitter: 0.0,
        max_elapsed: None,
        max_steps: Some(options.steps),
    })
}

/// Whether a cloud API status is worth retrying (429 and the gateway/server 5xx family).
#[must_use]
pub fn is_retryable_http_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || matches!(status.as_u16(), 500 | 502 | 503 | 504)
}

/// Whether a Kubernetes client error is transient.
fn is_retryable_kube_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(response) => {
            response.code == 429 || (500..600).contains(&response.code)
        }
        kube::Error::Service(_) => true,
        _ => false,
    }
}

/// Run a Kubernetes API call, retrying transient failures on [`KUBE_API_RETRY`].
///
/// # Errors
///
/// Returns the first permanent error, or the last transient one once the schedule
/// is exhausted.
pub async fn retry_api_call<T, F, Fut>(mut call: F, operation: &str) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    let mut backoff = Backoff::new(KUBE_API_RETRY);
    loop {
        let err = match call().await {
            Ok(value) => {
                if backoff.steps() > 0 {
                    debug!(operation, attempts = backoff.steps() + 1, "Kubernetes API call recovered");
                }
                return Ok(value);
            }
            Err(err) => err,
        };
        if !is_retryable_kube_error(&err) {
            return Err(anyhow::Error::new(err).context(format!("{operation} failed")));
        }
        let Some(delay) = backoff.next_delay() else {
            return Err(anyhow!(
                "{operation} still failing after {} attempts: {err}",
                backoff.steps() + 1
            ));
        };
        warn!(operation, error = %err, retry_in = ?delay, "Transient Kubernetes API error");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
