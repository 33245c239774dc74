//! Warmup Scheduler
//!
//! Drives `CacheWarmingService::run_scheduled_warmup` from a cron expression.

use crate::cache::warming::CacheWarmingService;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use croner::Cron;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Parse a cron expression, mapping failures to a typed error
pub fn parse_cron(expression: &str) -> Result<Cron> {
    Cron::new(expression)
        .parse()
        .map_err(|e| Error::CronParse {
            expression: expression.to_string(),
            reason: e.to_string(),
        })
}

/// Cron-driven trigger for scheduled warmups
pub struct WarmupScheduler {
    cron: Cron,
    expression: String,
    service: Arc<CacheWarmingService>,
    shutdown: CancellationToken,
}

impl WarmupScheduler {
    /// Create a scheduler from the service's `warmupCron`
    pub fn new(service: Arc<CacheWarmingService>, shutdown: CancellationToken) -> Result<Self> {
        let expression = service.config().warmup_cron.clone();
        let cron = parse_cron(&expression)?;
        Ok(Self {
            cron,
            expression,
            service,
            shutdown,
        })
    }

    /// Next trigger strictly after `after`
    pub fn next_run_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cron.find_next_occurrence(after, false).ok()
    }

    /// Run until the shutdown token is cancelled
    pub async fn run(self) {
        info!(cron = %self.expression, "Warmup scheduler started");

        loop {
            let now = Utc::now();
            let Some(next) = self.next_run_after(&now) else {
                warn!(cron = %self.expression, "Cron expression has no upcoming occurrence");
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            debug!(next = %next, wait_secs = wait.as_secs(), "Next scheduled warmup");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.service.run_scheduled_warmup().await;
                }
                _ = self.shutdown.cancelled() => break,
            }
        }

        info!("Warmup scheduler stopped");
    }

    /// Spawn onto the runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::layers::{MemoryLayer, MemoryLayerConfig};
    use crate::cache::warming::WarmingConfig;
    use crate::telemetry::NoopMetrics;
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Timelike};
    use std::time::Duration;

    fn service(cron: &str) -> Arc<CacheWarmingService> {
        let memory = Arc::new(MemoryLayer::new(
            MemoryLayerConfig::default(),
            NoopMetrics::shared(),
        ));
        Arc::new(CacheWarmingService::new(
            WarmingConfig {
                warmup_cron: cron.to_string(),
                ..Default::default()
            },
            memory,
            NoopMetrics::shared(),
        ))
    }

    #[test]
    fn test_parse_valid_expressions() {
        for expr in ["0 */6 * * *", "*/5 * * * *", "30 2 * * 1-5"] {
            assert!(parse_cron(expr).is_ok(), "{} should parse", expr);
        }
    }

    #[test]
    fn test_parse_invalid_expression() {
        assert_matches!(parse_cron("not a cron"), Err(Error::CronParse { .. }));
    }

    #[tokio::test]
    async fn test_default_schedule_every_six_hours() {
        let scheduler =
            WarmupScheduler::new(service("0 */6 * * *"), CancellationToken::new()).unwrap();
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 7, 15, 0).unwrap();
        let next = scheduler.next_run_after(&from).unwrap();
        assert_eq!(next.hour(), 12);
        assert_eq!(next.minute(), 0);
    }

    #[tokio::test]
    async fn test_invalid_cron_rejected_at_construction() {
        assert_matches!(
            WarmupScheduler::new(service("61 * * * *"), CancellationToken::new()).err(),
            Some(Error::CronParse { .. })
        );
    }

    #[tokio::test]
    async fn test_stops_on_cancellation() {
        let token = CancellationToken::new();
        let scheduler = WarmupScheduler::new(service("0 0 1 1 *"), token.clone()).unwrap();
        let handle = scheduler.spawn();

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
