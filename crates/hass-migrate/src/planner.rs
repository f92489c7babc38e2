//! Extraction query planning.
//!
//! The watermark is the oldest point already in the target, so a run copies
//! everything strictly older than it: history grows backwards from the first
//! import.

use chrono::{DateTime, Utc};

use crate::connectors::SourceLayout;

/// A planned extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceQuery {
    /// Row query. Columns: state, entity_id, last_updated_ts, shared_attrs, state_id.
    pub sql: String,
    /// Matching `COUNT(*)` query.
    pub count_sql: String,
    /// Exclusive upper bound on `last_updated_ts`, bound as the only parameter
    /// of both queries when present.
    pub upper_bound: Option<f64>,
}

const STATES_META_FROM: &str = "FROM states s \
     LEFT JOIN state_attributes sa ON sa.attributes_id = s.attributes_id \
     JOIN states_meta sm ON sm.metadata_id = s.metadata_id";

const LEGACY_FROM: &str = "FROM states s \
     LEFT JOIN state_attributes sa ON sa.attributes_id = s.attributes_id";

/// Plans the extraction query for a source layout and an optional watermark.
#[must_use]
pub fn plan(layout: SourceLayout, watermark: Option<DateTime<Utc>>) -> SourceQuery {
    let (entity_col, from) = match layout {
        SourceLayout::StatesMeta => ("sm.entity_id", STATES_META_FROM),
        SourceLayout::Legacy => ("s.entity_id", LEGACY_FROM),
    };

    let upper_bound = watermark.map(epoch_seconds);
    let filter = if upper_bound.is_some() {
        " WHERE s.last_updated_ts < ?"
    } else {
        ""
    };

    let sql = format!(
        "SELECT s.state, {entity_col}, s.last_updated_ts, sa.shared_attrs, s.state_id \
         {from}{filter} \
         ORDER BY s.last_updated_ts ASC, s.state_id ASC"
    );
    let count_sql = format!("SELECT COUNT(*) {from}{filter}");

    SourceQuery {
        sql,
        count_sql,
        upper_bound,
    }
}

/// Epoch seconds with microsecond precision, as the recorder stores them.
#[must_use]
pub fn epoch_seconds(instant: DateTime<Utc>) -> f64 {
    instant.timestamp() as f64 + f64::from(instant.timestamp_subsec_micros()) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_plan_without_watermark_is_unbounded() {
        let query = plan(SourceLayout::StatesMeta, None);
        assert_eq!(query.upper_bound, None);
        assert!(!query.sql.contains("WHERE"));
        assert!(!query.count_sql.contains("WHERE"));
        assert!(query.sql.contains("JOIN states_meta sm"));
        assert!(query
            .sql
            .ends_with("ORDER BY s.last_updated_ts ASC, s.state_id ASC"));
    }

    #[test]
    fn test_plan_with_watermark_bounds_strictly() {
        let watermark = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let query = plan(SourceLayout::StatesMeta, Some(watermark));
        assert_eq!(query.upper_bound, Some(1_704_067_200.0));
        assert!(query.sql.contains("WHERE s.last_updated_ts < ?"));
        assert!(query.count_sql.contains("WHERE s.last_updated_ts < ?"));
    }

    #[test]
    fn test_plan_legacy_layout() {
        let query = plan(SourceLayout::Legacy, None);
        assert!(query.sql.contains("s.entity_id"));
        assert!(!query.sql.contains("states_meta"));
        assert!(query.sql.contains("LEFT JOIN state_attributes"));
    }

    #[test]
    fn test_epoch_seconds_keeps_micros() {
        let instant = Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap();
        assert!((epoch_seconds(instant) - 1_700_000_000.25).abs() < 1e-6);
    }
}
