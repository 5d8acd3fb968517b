//! Date-partitioned key prefixes.
//!
//! Raw logs are laid out as `raw/{service}/{yyyy}/{MM}/{dd}/...`. A run
//! over an inclusive date range visits one prefix per calendar day.

use chrono::{Duration, NaiveDate};

/// Inclusive range of calendar days covered by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The `days` complete days ending yesterday, relative to `today`.
    ///
    /// Returns `None` when `days` is zero.
    pub fn last_days(today: NaiveDate, days: u32) -> Option<Self> {
        if days == 0 {
            return None;
        }
        let end = today - Duration::days(1);
        let start = end - Duration::days(i64::from(days) - 1);
        Some(Self { start, end })
    }

    /// Number of days in the range (0 if `start > end`).
    pub fn num_days(&self) -> usize {
        if self.start > self.end {
            0
        } else {
            (self.end - self.start).num_days() as usize + 1
        }
    }

    /// Start of the first day as an ISO-8601 UTC timestamp.
    pub fn start_iso(&self) -> String {
        format!("{}T00:00:00.000Z", self.start.format("%Y-%m-%d"))
    }

    /// End of the last day as an ISO-8601 UTC timestamp.
    pub fn end_iso(&self) -> String {
        format!("{}T23:59:59.999Z", self.end.format("%Y-%m-%d"))
    }
}

/// One key prefix per calendar day in `[start, end]`, in chronological order.
///
/// Empty when `start > end`.
pub fn partition_prefixes(service: &str, start: NaiveDate, end: NaiveDate) -> Vec<String> {
    start
        .iter_days()
        .take_while(|day| *day <= end)
        .map(|day| day_prefix(service, day))
        .collect()
}

/// The prefix for a single service and day.
pub fn day_prefix(service: &str, day: NaiveDate) -> String {
    format!("raw/{}/{}/", service, day.format("%Y/%m/%d"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_three_day_range() {
        let prefixes = partition_prefixes("journal-service", date(2024, 1, 1), date(2024, 1, 3));
        assert_eq!(
            prefixes,
            vec![
                "raw/journal-service/2024/01/01/",
                "raw/journal-service/2024/01/02/",
                "raw/journal-service/2024/01/03/",
            ]
        );
    }

    #[test]
    fn test_single_day() {
        let prefixes = partition_prefixes("chat-service", date(2024, 2, 29), date(2024, 2, 29));
        assert_eq!(prefixes, vec!["raw/chat-service/2024/02/29/"]);
    }

    #[test]
    fn test_start_after_end_is_empty() {
        assert!(partition_prefixes("x", date(2024, 1, 5), date(2024, 1, 4)).is_empty());
    }

    #[test]
    fn test_count_matches_day_span_across_year_boundary() {
        let start = date(2023, 12, 20);
        let end = date(2024, 1, 10);
        let prefixes = partition_prefixes("x", start, end);
        assert_eq!(prefixes.len(), (end - start).num_days() as usize + 1);
        assert_eq!(prefixes.len(), DateRange::new(start, end).num_days());
        let mut sorted = prefixes.clone();
        sorted.sort();
        assert_eq!(prefixes, sorted);
        assert_eq!(prefixes[11], "raw/x/2023/12/31/");
        assert_eq!(prefixes[12], "raw/x/2024/01/01/");
    }

    #[test]
    fn test_last_days_ends_yesterday() {
        let range = DateRange::last_days(date(2024, 3, 1), 7).unwrap();
        assert_eq!(range.end, date(2024, 2, 29));
        assert_eq!(range.start, date(2024, 2, 23));
        assert_eq!(range.num_days(), 7);
        assert!(DateRange::last_days(date(2024, 3, 1), 0).is_none());
    }

    #[test]
    fn test_iso_bounds() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 3));
        assert_eq!(range.start_iso(), "2024-01-01T00:00:00.000Z");
        assert_eq!(range.end_iso(), "2024-01-03T23:59:59.999Z");
    }
}
