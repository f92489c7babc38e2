//! Migration pipeline orchestration.
//!
//! One run is strictly sequential: a batch is fetched, converted and written
//! before the next one is pulled from the source cursor.

use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::MigrationConfig;
use crate::connectors::{create_source, create_target, SourceConnector, SourceRecord, TargetConnector};
use crate::error::{Error, Result};
use crate::naming::POLICY_VERSION;
use crate::planner;
use crate::point::DataPoint;
use crate::retry::{with_retry, RetryConfig};
use crate::transform::{FieldWarning, PointBuilder, SkipReason};
use crate::watermark::WatermarkResolver;

/// Where the ingestion loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    /// Not started, or stopped during startup.
    Idle,
    /// Pulling the next batch from the source cursor.
    Fetching,
    /// Turning the batch into points.
    Converting,
    /// Sending the batch to the target.
    Writing,
    /// The cursor is exhausted.
    Done,
    /// The source cursor broke mid-run.
    Failed,
}

/// Rows skipped, by reason.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SkipCounts {
    /// Sentinel states such as `unavailable`.
    pub unavailable: u64,
    /// NULL states.
    pub missing_state: u64,
    /// Unusable update times.
    pub invalid_timestamp: u64,
}

impl SkipCounts {
    fn record(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::Unavailable => self.unavailable += 1,
            SkipReason::MissingState => self.missing_state += 1,
            SkipReason::InvalidTimestamp => self.invalid_timestamp += 1,
        }
    }
}

/// Migration statistics.
#[derive(Debug, Default, Clone, Serialize)]
pub struct MigrationStats {
    /// Watermark the run was bounded by.
    pub watermark: Option<DateTime<Utc>>,
    /// Rows pulled from the source.
    pub rows_read: u64,
    /// Points acknowledged by the target (or converted, in a dry run).
    pub points_written: u64,
    /// Points lost with a failed batch.
    pub points_failed: u64,
    /// Rows that produced no point.
    pub rows_skipped: u64,
    /// Skipped rows by reason.
    pub skipped: SkipCounts,
    /// Attribute fields dropped because a numeric attribute was not numeric.
    pub field_conversion: u64,
    /// Attribute fields dropped because their name belongs to the state.
    pub reserved_name: u64,
    /// Attribute fields dropped because another attribute took the name.
    pub name_collision: u64,
    /// Rows whose attribute blob could not be parsed.
    pub malformed_attributes: u64,
    /// Non-empty batches fetched.
    pub batches: u64,
    /// Batches whose write failed after retries.
    pub failed_batches: u64,
    /// Batches the target stored only in part (field type conflicts).
    pub partial_batches: u64,
    /// Points sent in partially stored batches; how many landed is unknown.
    pub points_partial: u64,
    /// Duration in seconds.
    pub duration_secs: f64,
}

impl MigrationStats {
    /// Calculate throughput (rows per second).
    #[must_use]
    pub fn throughput(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.rows_read as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}

/// Migration pipeline.
pub struct Pipeline {
    config: MigrationConfig,
    source: Box<dyn SourceConnector>,
    target: Box<dyn TargetConnector>,
    state: IngestState,
}

impl Pipeline {
    /// Create a pipeline over the recorder database and InfluxDB named in
    /// `config`.
    #[must_use]
    pub fn new(config: MigrationConfig) -> Self {
        let source = create_source(&config.source);
        let target = create_target(&config.destination);
        Self::with_connectors(config, source, target)
    }

    /// Create a pipeline over explicit connectors.
    #[must_use]
    pub fn with_connectors(
        config: MigrationConfig,
        source: Box<dyn SourceConnector>,
        target: Box<dyn TargetConnector>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            state: IngestState::Idle,
        }
    }

    /// Current ingestion state.
    #[must_use]
    pub fn state(&self) -> IngestState {
        self.state
    }

    /// Run the migration pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, either store cannot
    /// be reached at startup, or the source cursor fails mid-run. Failed
    /// batch writes are counted, not returned.
    pub async fn run(&mut self) -> Result<MigrationStats> {
        let start = std::time::Instant::now();
        let mut stats = MigrationStats::default();

        let result = self.execute(&mut stats).await;
        self.close().await;
        stats.duration_secs = start.elapsed().as_secs_f64();

        match result {
            Ok(()) => {
                self.state = IngestState::Done;
                info!(
                    "Migration complete: {} rows read, {} points written, {} skipped, {} failed in {:.2}s ({:.0} rows/sec)",
                    stats.rows_read,
                    stats.points_written,
                    stats.rows_skipped,
                    stats.points_failed,
                    stats.duration_secs,
                    stats.throughput()
                );
                Ok(stats)
            }
            Err(e) => {
                error!(state = ?self.state, error = %e, "migration aborted");
                Err(e)
            }
        }
    }

    #[allow(clippy::cognitive_complexity)] // Reason: Pipeline orchestration requires sequential steps, refactoring would fragment the migration flow
    async fn execute(&mut self, stats: &mut MigrationStats) -> Result<()> {
        self.config.validate()?;
        let options = &self.config.options;

        info!(
            policy_version = POLICY_VERSION,
            numeric_field = %options.naming.numeric_state_field,
            text_field = %options.naming.text_state_field,
            text_suffix = %options.naming.text_suffix,
            "Starting migration pipeline"
        );
        if options.dry_run {
            info!("Dry run mode - not writing to destination");
        }

        self.source.connect().await?;
        self.target.connect().await?;

        let source = &*self.source;
        let target = &*self.target;

        let schema = source.inspect().await?;
        info!(
            layout = ?schema.layout,
            rows = schema.total_rows,
            entities = schema.entities,
            oldest = ?schema.oldest,
            newest = ?schema.newest,
            "Source database inspected"
        );

        let retry = RetryConfig::with_max_retries(options.max_retries);
        let watermark =
            WatermarkResolver::new(target, &options.watermark_measurement, retry.clone())
                .resolve()
                .await;
        stats.watermark = watermark;

        let query = planner::plan(schema.layout, watermark);
        let total = source.count(&query).await?;
        info!(rows = total, "Rows to migrate");

        let progress = if options.progress {
            create_progress_bar(total)
        } else {
            ProgressBar::hidden()
        };
        let builder = PointBuilder::new(options);
        let mut rows = source.fetch(&query);

        loop {
            self.state = IngestState::Fetching;
            let batch = match next_batch(&mut rows, options.batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    self.state = IngestState::Failed;
                    progress.abandon();
                    return Err(e);
                }
            };
            if batch.is_empty() {
                break;
            }
            stats.batches += 1;
            stats.rows_read += batch.len() as u64;

            self.state = IngestState::Converting;
            let points = convert_batch(&builder, &batch, stats);

            self.state = IngestState::Writing;
            if options.dry_run {
                stats.points_written += points.len() as u64;
            } else if !points.is_empty() {
                let batch_no = stats.batches;
                match with_retry(&retry, "batch write", || target.write(&points)).await {
                    Ok(()) => {
                        stats.points_written += points.len() as u64;
                        debug!(batch = batch_no, points = points.len(), "batch written");
                    }
                    Err(Error::PartialWrite(body)) => {
                        stats.partial_batches += 1;
                        stats.points_partial += points.len() as u64;
                        warn!(
                            batch = batch_no,
                            points = points.len(),
                            response = %body,
                            "batch partially rejected by InfluxDB"
                        );
                    }
                    Err(e) => {
                        stats.failed_batches += 1;
                        stats.points_failed += points.len() as u64;
                        error!(
                            batch = batch_no,
                            points = points.len(),
                            error = %e,
                            "batch write failed, dropping batch"
                        );
                    }
                }
            }

            progress.inc(batch.len() as u64);
        }

        progress.finish_with_message("Migration complete");
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.source.close().await {
            warn!(error = %e, "failed to close source");
        }
        if let Err(e) = self.target.close().await {
            warn!(error = %e, "failed to close target");
        }
    }
}

/// Pulls up to `size` records; an empty batch means the cursor is exhausted.
async fn next_batch(
    rows: &mut BoxStream<'_, Result<SourceRecord>>,
    size: usize,
) -> Result<Vec<SourceRecord>> {
    let mut batch = Vec::with_capacity(size.min(4096));
    while batch.len() < size {
        match rows.next().await {
            Some(row) => batch.push(row?),
            None => break,
        }
    }
    Ok(batch)
}

fn convert_batch(
    builder: &PointBuilder<'_>,
    batch: &[SourceRecord],
    stats: &mut MigrationStats,
) -> Vec<DataPoint> {
    let mut points = Vec::with_capacity(batch.len());
    for record in batch {
        let conversion = builder.convert(record);
        if conversion.malformed_attributes {
            stats.malformed_attributes += 1;
        }
        match conversion.outcome {
            Ok(built) => {
                for warning in &built.warnings {
                    match warning {
                        FieldWarning::Conversion { .. } => stats.field_conversion += 1,
                        FieldWarning::ReservedName { .. } => stats.reserved_name += 1,
                        FieldWarning::NameCollision { .. } => stats.name_collision += 1,
                    }
                }
                points.push(built.point);
            }
            Err(reason) => {
                debug!(
                    entity_id = %record.entity_id,
                    row_id = record.row_id,
                    %reason,
                    "row skipped"
                );
                stats.rows_skipped += 1;
                stats.skipped.record(reason);
            }
        }
    }
    points
}

fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = if total > 0 {
        ProgressBar::new(total)
    } else {
        ProgressBar::new_spinner()
    };

    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    pb
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
