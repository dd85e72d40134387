use crate::config::ReadinessConfig;
use crate::metrics_defs::READINESS_PROBES;
use async_trait::async_trait;
use shared::counter;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use url::Url;

/// Gate checked before an upload is forwarded.
#[async_trait]
pub trait Readiness: Send + Sync {
    /// Resolves to `true` once the inference service can take traffic.
    async fn wait_until_ready(&self) -> bool;
}

/// Gate for deployments whose backend is always warm.
pub struct AlwaysReady;

#[async_trait]
impl Readiness for AlwaysReady {
    async fn wait_until_ready(&self) -> bool {
        true
    }
}

/// Polls the health endpoint of a slow-to-wake inference service.
///
/// Probes run one after another with a fixed delay until one returns a
/// success status or the budget runs out. A failed probe of any kind only
/// means "not ready yet". The wait is an ordinary future: dropping it, for
/// instance when the client went away, stops probing immediately.
pub struct ReadinessProber {
    client: reqwest::Client,
    health_url: Url,
    budget: Duration,
    interval: Duration,
    probe_timeout: Duration,
}

impl ReadinessProber {
    pub fn new(client: reqwest::Client, health_url: Url, config: &ReadinessConfig) -> Self {
        ReadinessProber {
            client,
            health_url,
            budget: config.budget(),
            interval: config.interval(),
            probe_timeout: config.probe_timeout(),
        }
    }

    async fn probe(&self, timeout: Duration) -> bool {
        match self
            .client
            .get(self.health_url.clone())
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::debug!(status = %response.status(), "inference service not ready");
                false
            }
            Err(e) => {
                tracing::debug!(error = %e, "readiness probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl Readiness for ReadinessProber {
    async fn wait_until_ready(&self) -> bool {
        let deadline = Instant::now() + self.budget;
        let mut attempts: u32 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            attempts += 1;
            if self.probe(self.probe_timeout.min(remaining)).await {
                counter!(READINESS_PROBES, "result" => "ready").increment(1);
                tracing::debug!(attempts, "inference service is ready");
                return true;
            }
            counter!(READINESS_PROBES, "result" => "not_ready").increment(1);

            // Not ready is only reported once the whole budget is spent
            let remaining = deadline.saturating_duration_since(Instant::now());
            sleep(self.interval.min(remaining)).await;
        }

        tracing::warn!(
            attempts,
            budget_secs = self.budget.as_secs_f64(),
            "inference service did not become ready"
        );
        false
    }
}
