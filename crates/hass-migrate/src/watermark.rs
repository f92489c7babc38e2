//! Watermark resolution.
//!
//! The watermark is the oldest point already present in the target's
//! watermark measurement. Only source rows strictly older than it are
//! migrated, so repeated runs grow the imported history backwards.

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::connectors::TargetConnector;
use crate::retry::{with_retry, RetryConfig};

/// Reads the watermark from the target store.
pub struct WatermarkResolver<'a> {
    target: &'a dyn TargetConnector,
    measurement: &'a str,
    retry: RetryConfig,
}

impl<'a> WatermarkResolver<'a> {
    /// Creates a resolver for `measurement` on `target`.
    #[must_use]
    pub fn new(target: &'a dyn TargetConnector, measurement: &'a str, retry: RetryConfig) -> Self {
        Self {
            target,
            measurement,
            retry,
        }
    }

    /// Earliest instant in the watermark measurement.
    ///
    /// Never fails: a query that still errors after retries is logged and
    /// treated as "no watermark", which re-migrates everything.
    pub async fn resolve(&self) -> Option<DateTime<Utc>> {
        let result = with_retry(&self.retry, "watermark query", || {
            self.target.earliest_time(self.measurement)
        })
        .await;

        match result {
            Ok(Some(instant)) => {
                info!(measurement = %self.measurement, watermark = %instant, "resolved watermark");
                Some(instant)
            }
            Ok(None) => {
                info!(measurement = %self.measurement, "target holds no data yet, migrating full history");
                None
            }
            Err(e) => {
                error!(
                    measurement = %self.measurement,
                    error = %e,
                    "watermark query failed, migrating full history"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::point::DataPoint;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers `earliest_time` from a scripted queue.
    struct ScriptedTarget {
        answers: Mutex<Vec<Result<Option<DateTime<Utc>>>>>,
        asked: Mutex<Vec<String>>,
    }

    impl ScriptedTarget {
        fn new(mut answers: Vec<Result<Option<DateTime<Utc>>>>) -> Self {
            answers.reverse();
            Self {
                answers: Mutex::new(answers),
                asked: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.asked.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TargetConnector for ScriptedTarget {
        fn target_type(&self) -> &'static str {
            "scripted"
        }

        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        async fn earliest_time(&self, measurement: &str) -> Result<Option<DateTime<Utc>>> {
            self.asked.lock().unwrap().push(measurement.to_string());
            self.answers.lock().unwrap().pop().unwrap_or(Ok(None))
        }

        async fn write(&self, _points: &[DataPoint]) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            add_jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resolve_returns_earliest_time() {
        let instant = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let target = ScriptedTarget::new(vec![Ok(Some(instant))]);

        let resolver = WatermarkResolver::new(&target, "units", fast_retry());
        assert_eq!(resolver.resolve().await, Some(instant));
        assert_eq!(target.asked.lock().unwrap().as_slice(), ["units"]);
    }

    #[tokio::test]
    async fn test_resolve_empty_target() {
        let target = ScriptedTarget::new(vec![Ok(None)]);
        let resolver = WatermarkResolver::new(&target, "units", fast_retry());
        assert_eq!(resolver.resolve().await, None);
    }

    #[tokio::test]
    async fn test_resolve_fails_open() {
        let target = ScriptedTarget::new(vec![Err(Error::Query("syntax error".to_string()))]);
        let resolver = WatermarkResolver::new(&target, "units", fast_retry());

        assert_eq!(resolver.resolve().await, None);
        assert_eq!(target.calls(), 1);
    }

    #[tokio::test]
    async fn test_resolve_retries_transient_failures() {
        let instant = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        let target = ScriptedTarget::new(vec![
            Err(Error::Query("InfluxDB query request failed: timed out".to_string())),
            Ok(Some(instant)),
        ]);
        let resolver = WatermarkResolver::new(&target, "units", fast_retry());

        assert_eq!(resolver.resolve().await, Some(instant));
        assert_eq!(target.calls(), 2);
    }

    #[tokio::test]
    async fn test_resolve_gives_up_after_retries() {
        let target = ScriptedTarget::new(vec![
            Err(Error::RateLimit(0)),
            Err(Error::RateLimit(0)),
            Err(Error::RateLimit(0)),
            Ok(Some(Utc::now())),
        ]);
        let resolver = WatermarkResolver::new(&target, "units", fast_retry());

        assert_eq!(resolver.resolve().await, None);
        assert_eq!(target.calls(), 3);
    }
}
