//! Timestamp oracle and datetime filter grammar (SPEC_FULL.md §4.10).
//! spec.md §6 lists datetime helpers as an external collaborator the query
//! composer calls into without owning; `TimestampOracle` is that seam, with
//! [`ChronoTimestampOracle`] as the one shipped implementation, the way the
//! engine's KV store is a trait even though only one backend exists.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

use crate::document::DocumentMetadata;
use crate::error::{Result, ValidationError};
use crate::Oid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatetimeAction {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Today,
    Yesterday,
    ThisWeek,
    ThisMonth,
    ThisYear,
}

#[derive(Debug, Clone)]
pub enum DatetimeBound {
    Timeframe(Timeframe),
    Range(DateTime<Utc>, DateTime<Utc>),
}

#[derive(Debug, Clone)]
pub struct DatetimeFilter {
    pub action: DatetimeAction,
    pub bound: DatetimeBound,
}

impl DatetimeFilter {
    /// Parses `datetime:<action>:<timeframe>` or
    /// `datetime:<action>:range:<ISO start>:<ISO end>` (spec.md §7).
    pub fn parse(filter: &str) -> Result<DatetimeFilter> {
        let mut parts = filter.splitn(4, ':');
        let tag = parts.next().unwrap_or("");
        if tag != "datetime" {
            return Err(ValidationError::Other(format!("not a datetime filter: `{filter}`")).into());
        }

        let action = match parts.next() {
            Some("created") => DatetimeAction::Created,
            Some("updated") => DatetimeAction::Updated,
            Some("deleted") => DatetimeAction::Deleted,
            other => {
                return Err(ValidationError::Other(format!("unknown datetime action: `{other:?}`")).into())
            }
        };

        let third = parts.next().ok_or_else(|| ValidationError::Other(format!("malformed datetime filter: `{filter}`")))?;
        let bound = if third == "range" {
            let remainder = parts
                .next()
                .ok_or_else(|| ValidationError::Other(format!("missing range bounds in `{filter}`")))?;
            let (start_str, end_str) = split_range_bounds(remainder)
                .ok_or_else(|| ValidationError::Other(format!("malformed datetime range in `{filter}`")))?;
            DatetimeBound::Range(parse_iso(start_str)?, parse_iso(end_str)?)
        } else {
            DatetimeBound::Timeframe(match third {
                "today" => Timeframe::Today,
                "yesterday" => Timeframe::Yesterday,
                "thisWeek" => Timeframe::ThisWeek,
                "thisMonth" => Timeframe::ThisMonth,
                "thisYear" => Timeframe::ThisYear,
                other => return Err(ValidationError::Other(format!("unknown timeframe: `{other}`")).into()),
            })
        };

        Ok(DatetimeFilter { action, bound })
    }
}

/// Splits `"<ISO start>:<ISO end>"` at the boundary between the two
/// RFC3339 timestamps. Both halves contain colons of their own (the
/// time-of-day, and any explicit zone offset), so a plain `split_once(':')`
/// lands inside the first timestamp instead of at the real boundary; this
/// tries every `:` in turn and keeps the first split where both sides
/// parse as RFC3339.
fn split_range_bounds(remainder: &str) -> Option<(&str, &str)> {
    remainder.match_indices(':').find_map(|(idx, _)| {
        let start = &remainder[..idx];
        let end = &remainder[idx + 1..];
        if parse_iso(start).is_ok() && parse_iso(end).is_ok() {
            Some((start, end))
        } else {
            None
        }
    })
}

fn parse_iso(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ValidationError::Other(format!("invalid ISO 8601 timestamp `{s}`: {e}")).into())
}

pub trait TimestampOracle: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Resolves a timeframe to its `[start, end)` bounds relative to `now`.
    fn timeframe_bounds(&self, timeframe: Timeframe) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = self.now();
        let today_start = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
            .single()
            .unwrap_or(now);

        match timeframe {
            Timeframe::Today => (today_start, today_start + Duration::days(1)),
            Timeframe::Yesterday => (today_start - Duration::days(1), today_start),
            Timeframe::ThisWeek => {
                let days_since_monday = now.weekday().num_days_from_monday() as i64;
                let week_start = today_start - Duration::days(days_since_monday);
                (week_start, week_start + Duration::days(7))
            }
            Timeframe::ThisMonth => {
                let month_start = Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0).single().unwrap_or(now);
                let next_month_start = if now.month() == 12 {
                    Utc.with_ymd_and_hms(now.year() + 1, 1, 1, 0, 0, 0).single().unwrap_or(now)
                } else {
                    Utc.with_ymd_and_hms(now.year(), now.month() + 1, 1, 0, 0, 0).single().unwrap_or(now)
                };
                (month_start, next_month_start)
            }
            Timeframe::ThisYear => {
                let year_start = Utc.with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0).single().unwrap_or(now);
                let next_year_start = Utc.with_ymd_and_hms(now.year() + 1, 1, 1, 0, 0, 0).single().unwrap_or(now);
                (year_start, next_year_start)
            }
        }
    }

    /// Tests whether `metadata`'s timestamp for `filter.action` falls
    /// within `filter`'s bound. Documents with no timestamp for the
    /// requested action (e.g. `deleted` on a still-active document) never
    /// match.
    fn matches(&self, filter: &DatetimeFilter, metadata: &DocumentMetadata) -> bool {
        let timestamp = match filter.action {
            DatetimeAction::Created => Some(metadata.created_at),
            DatetimeAction::Updated => Some(metadata.updated_at),
            DatetimeAction::Deleted => metadata.deleted_at,
        };
        let Some(timestamp) = timestamp else { return false };

        let (start, end) = match &filter.bound {
            DatetimeBound::Timeframe(tf) => self.timeframe_bounds(*tf),
            DatetimeBound::Range(start, end) => (*start, *end),
        };
        timestamp >= start && timestamp < end
    }
}

pub struct ChronoTimestampOracle;

impl TimestampOracle for ChronoTimestampOracle {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Evaluates `filter` against every `(oid, metadata)` pair, returning the
/// matching OIDs — the per-filter step the query composer ANDs together
/// into the final datetime bitmap (spec.md §4.6 step 4).
pub fn matching_oids<'a>(
    oracle: &dyn TimestampOracle,
    filter: &DatetimeFilter,
    entries: impl Iterator<Item = (Oid, &'a DocumentMetadata)>,
) -> Vec<Oid> {
    entries.filter(|(_, metadata)| oracle.matches(filter, metadata)).map(|(oid, _)| oid).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedOracle(DateTime<Utc>);
    impl TimestampOracle for FixedOracle {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[test]
    fn parses_timeframe_filter() {
        let filter = DatetimeFilter::parse("datetime:created:today").unwrap();
        assert_eq!(filter.action, DatetimeAction::Created);
        assert!(matches!(filter.bound, DatetimeBound::Timeframe(Timeframe::Today)));
    }

    #[test]
    fn parses_range_filter() {
        let filter = DatetimeFilter::parse("datetime:updated:range:2026-01-01T00:00:00Z:2026-02-01T00:00:00Z").unwrap();
        assert_eq!(filter.action, DatetimeAction::Updated);
        assert!(matches!(filter.bound, DatetimeBound::Range(_, _)));
    }

    #[test]
    fn rejects_malformed_filter() {
        assert!(DatetimeFilter::parse("not-a-filter").is_err());
        assert!(DatetimeFilter::parse("datetime:created:notaTimeframe").is_err());
    }

    #[test]
    fn deleted_action_never_matches_without_deleted_at() {
        let now = Utc.with_ymd_and_hms(2026, 7, 29, 12, 0, 0).unwrap();
        let oracle = FixedOracle(now);
        let filter = DatetimeFilter::parse("datetime:deleted:today").unwrap();
        let metadata = DocumentMetadata::new(now);
        assert!(!oracle.matches(&filter, &metadata));
    }

    #[test]
    fn today_bound_matches_same_day_timestamp() {
        let now = Utc.with_ymd_and_hms(2026, 7, 29, 12, 0, 0).unwrap();
        let oracle = FixedOracle(now);
        let filter = DatetimeFilter::parse("datetime:created:today").unwrap();
        let metadata = DocumentMetadata::new(Utc.with_ymd_and_hms(2026, 7, 29, 1, 0, 0).unwrap());
        assert!(oracle.matches(&filter, &metadata));

        let metadata_yesterday = DocumentMetadata::new(Utc.with_ymd_and_hms(2026, 7, 28, 23, 0, 0).unwrap());
        assert!(!oracle.matches(&filter, &metadata_yesterday));
    }
}
