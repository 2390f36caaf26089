//! ---
//! ems_section: "04-configuration-orchestration"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bounded health probing and per-realm probe history."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::time::{timeout, Instant};

use crate::realm::ServiceHandle;

/// Smallest per-probe timeout derived from a poll interval.
pub const MIN_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Number of samples retained per realm.
pub const HEALTH_HISTORY_CAPACITY: usize = 16;

/// Answer of a health probe that completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResult {
    pub healthy: bool,
    pub latency: Duration,
    pub detail: String,
}

/// The probe itself did not complete; distinct from an unhealthy answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("health callback failed: {0}")]
    Check(String),
    #[error("health callback did not answer within {0:?}")]
    Timeout(Duration),
    #[error("health callback panicked")]
    Panicked,
}

/// Polls a realm's health callback with a bounded wait.
#[derive(Debug, Clone, Copy)]
pub struct HealthProbe {
    timeout: Duration,
}

impl HealthProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Probe whose timeout follows the poll interval, floored at [`MIN_PROBE_TIMEOUT`].
    pub fn for_poll_interval(interval: Duration) -> Self {
        Self::new(interval.max(MIN_PROBE_TIMEOUT))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn probe(&self, handle: &ServiceHandle) -> Result<HealthResult, ProbeError> {
        self.probe_within(handle, self.timeout).await
    }

    /// Probe bounded by the smaller of the configured timeout and `budget`.
    pub async fn probe_within(
        &self,
        handle: &ServiceHandle,
        budget: Duration,
    ) -> Result<HealthResult, ProbeError> {
        let limit = self.timeout.min(budget);
        let started = Instant::now();
        match timeout(limit, handle.service().health()).await {
            Ok(Ok(report)) => Ok(HealthResult {
                healthy: report.healthy,
                latency: started.elapsed(),
                detail: report.detail,
            }),
            Ok(Err(err)) => Err(ProbeError::Check(format!("{err:#}"))),
            Err(_) => Err(ProbeError::Timeout(limit)),
        }
    }
}

/// What a single probe produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Reported(HealthResult),
    Failed { reason: String },
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Reported(result) if result.healthy)
    }
}

impl From<&Result<HealthResult, ProbeError>> for ProbeOutcome {
    fn from(value: &Result<HealthResult, ProbeError>) -> Self {
        match value {
            Ok(result) => ProbeOutcome::Reported(result.clone()),
            Err(err) => ProbeOutcome::Failed {
                reason: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSample {
    pub sequence: u64,
    pub observed_at: DateTime<Utc>,
    pub outcome: ProbeOutcome,
}

/// Ring of the most recent probe samples for one realm.
#[derive(Debug, Clone, Default)]
pub struct HealthHistory {
    samples: VecDeque<HealthSample>,
    next_sequence: u64,
}

impl HealthHistory {
    pub fn push(&mut self, outcome: ProbeOutcome) -> &HealthSample {
        let now = Utc::now();
        let observed_at = match self.samples.back() {
            Some(last) if last.observed_at > now => last.observed_at,
            _ => now,
        };
        if self.samples.len() == HEALTH_HISTORY_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(HealthSample {
            sequence: self.next_sequence,
            observed_at,
            outcome,
        });
        self.next_sequence += 1;
        &self.samples[self.samples.len() - 1]
    }

    pub fn samples(&self) -> impl Iterator<Item = &HealthSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Consecutive non-healthy samples at the tail.
    pub fn consecutive_failures(&self) -> usize {
        self.samples
            .iter()
            .rev()
            .take_while(|sample| !sample.outcome.is_healthy())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::{FnRealm, HealthReport};

    fn handle_with_health<F, Fut>(health: F) -> ServiceHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<HealthReport>> + Send + 'static,
    {
        ServiceHandle::from_service(
            "content",
            FnRealm::new(|| async { Ok(()) }, || async { Ok(()) }, health),
        )
    }

    #[tokio::test]
    async fn unhealthy_answer_is_not_a_probe_failure() {
        let handle = handle_with_health(|| async { Ok(HealthReport::unhealthy("indexing")) });
        let result = HealthProbe::new(Duration::from_secs(1))
            .probe(&handle)
            .await
            .expect("probe completes");
        assert!(!result.healthy);
        assert_eq!(result.detail, "indexing");
    }

    #[tokio::test]
    async fn callback_error_is_a_check_failure() {
        let handle = handle_with_health(|| async { Err(anyhow::anyhow!("db unreachable")) });
        let err = HealthProbe::new(Duration::from_secs(1))
            .probe(&handle)
            .await
            .expect_err("probe fails");
        assert_eq!(err, ProbeError::Check("db unreachable".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_callback_times_out_within_budget() {
        let handle = handle_with_health(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(HealthReport::healthy())
        });
        let probe = HealthProbe::new(Duration::from_secs(5));
        let err = probe
            .probe_within(&handle, Duration::from_millis(250))
            .await
            .expect_err("probe times out");
        assert_eq!(err, ProbeError::Timeout(Duration::from_millis(250)));
    }

    #[test]
    fn poll_interval_timeout_has_a_floor() {
        assert_eq!(
            HealthProbe::for_poll_interval(Duration::from_millis(10)).timeout(),
            MIN_PROBE_TIMEOUT
        );
        assert_eq!(
            HealthProbe::for_poll_interval(Duration::from_millis(500)).timeout(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn history_is_bounded_and_ordered() {
        let mut history = HealthHistory::default();
        for attempt in 0..20u64 {
            let outcome = if attempt % 2 == 0 {
                ProbeOutcome::Failed {
                    reason: "timeout".into(),
                }
            } else {
                ProbeOutcome::Reported(HealthResult {
                    healthy: true,
                    latency: Duration::from_millis(attempt),
                    detail: String::new(),
                })
            };
            history.push(outcome);
        }

        assert_eq!(history.len(), HEALTH_HISTORY_CAPACITY);
        let sequences: Vec<u64> = history.samples().map(|sample| sample.sequence).collect();
        assert_eq!(sequences.first(), Some(&4));
        assert_eq!(sequences.last(), Some(&19));
        assert!(history
            .samples()
            .zip(history.samples().skip(1))
            .all(|(a, b)| a.observed_at <= b.observed_at));
        assert_eq!(history.consecutive_failures(), 0);

        history.push(ProbeOutcome::Failed {
            reason: "timeout".into(),
        });
        assert_eq!(history.consecutive_failures(), 1);
    }
}
