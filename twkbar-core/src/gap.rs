//! Gap reconciliation — group missing session dates into fetch windows.
//!
//! Given the trading calendar and the set of session dates a security's
//! table does not cover, produce the minimal list of inclusive date
//! ranges to request from the remote source. Adjacency is defined by
//! consecutive *position* in the calendar: Friday and Monday are
//! adjacent, a present Wednesday between two missing days is not.

use crate::calendar::TradingCalendar;
use chrono::NaiveDate;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GapError {
    #[error("calendar is empty but {missing} dates are missing — calendar and gap sets were computed against different spans")]
    EmptyCalendar { missing: usize },

    #[error("missing date {date} is not a session in the calendar — calendar and gap sets were computed against different spans")]
    DateOutsideCalendar { date: NaiveDate },
}

/// One remote-fetch request: an inclusive date range. Derived and
/// ephemeral — never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchWindow {
    pub fn single(date: NaiveDate) -> Self {
        Self { start: date, end: date }
    }

    pub fn is_single_day(&self) -> bool {
        self.start == self.end
    }
}

impl std::fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_single_day() {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{} to {}", self.start, self.end)
        }
    }
}

/// Calendar sessions not represented in `present`, ascending.
///
/// `present` holds the date-truncated timestamps of the stored table.
pub fn missing_dates(calendar: &TradingCalendar, present: &HashSet<NaiveDate>) -> Vec<NaiveDate> {
    calendar.iter().filter(|d| !present.contains(d)).collect()
}

/// Group missing dates into minimal contiguous fetch windows.
///
/// Input need not be sorted or deduplicated. Returns windows in
/// ascending order; consecutive-position dates extend one window, any
/// break in position closes it. Empty input returns an empty list.
///
/// Fails fast when a missing date is not a calendar session: the input
/// contract is `missing ⊆ calendar`, and a violation means the caller
/// computed the two sets against different spans.
pub fn group_windows(
    missing: &[NaiveDate],
    calendar: &TradingCalendar,
) -> Result<Vec<FetchWindow>, GapError> {
    if missing.is_empty() {
        return Ok(Vec::new());
    }
    if calendar.is_empty() {
        return Err(GapError::EmptyCalendar { missing: missing.len() });
    }

    let mut sorted: Vec<NaiveDate> = missing.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let position = |date: NaiveDate| {
        calendar
            .position(date)
            .ok_or(GapError::DateOutsideCalendar { date })
    };

    let mut windows = Vec::new();
    let mut start = sorted[0];
    let mut prev = sorted[0];
    let mut prev_pos = position(prev)?;

    for &curr in &sorted[1..] {
        let curr_pos = position(curr)?;
        if curr_pos == prev_pos + 1 {
            prev = curr;
        } else {
            windows.push(FetchWindow { start, end: prev });
            start = curr;
            prev = curr;
        }
        prev_pos = curr_pos;
    }
    windows.push(FetchWindow { start, end: prev });

    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn cal(dates: &[&str]) -> TradingCalendar {
        TradingCalendar::from_dates(dates.iter().map(|s| d(s)).collect())
    }

    #[test]
    fn groups_consecutive_sessions() {
        let calendar = cal(&[
            "2024-12-01",
            "2024-12-02",
            "2024-12-03",
            "2024-12-04",
            "2024-12-05",
        ]);
        let missing = vec![d("2024-12-01"), d("2024-12-02"), d("2024-12-04")];

        let windows = group_windows(&missing, &calendar).unwrap();

        assert_eq!(
            windows,
            vec![
                FetchWindow { start: d("2024-12-01"), end: d("2024-12-02") },
                FetchWindow::single(d("2024-12-04")),
            ]
        );
    }

    #[test]
    fn weekend_between_sessions_is_not_a_gap() {
        // Friday and Monday are adjacent by calendar position.
        let calendar = cal(&["2024-12-06", "2024-12-09", "2024-12-10"]);
        let missing = vec![d("2024-12-06"), d("2024-12-09")];

        let windows = group_windows(&missing, &calendar).unwrap();

        assert_eq!(
            windows,
            vec![FetchWindow { start: d("2024-12-06"), end: d("2024-12-09") }]
        );
    }

    #[test]
    fn present_date_between_missing_splits_windows() {
        let calendar = cal(&["2024-12-02", "2024-12-03", "2024-12-04"]);
        // 12-03 is present locally, so the windows must not span it.
        let missing = vec![d("2024-12-02"), d("2024-12-04")];

        let windows = group_windows(&missing, &calendar).unwrap();

        assert_eq!(windows.len(), 2);
        assert!(windows.iter().all(FetchWindow::is_single_day));
    }

    #[test]
    fn empty_missing_returns_no_windows() {
        let calendar = cal(&["2024-12-02"]);
        assert!(group_windows(&[], &calendar).unwrap().is_empty());
    }

    #[test]
    fn empty_missing_with_empty_calendar_is_fine() {
        let calendar = TradingCalendar::from_dates(vec![]);
        assert!(group_windows(&[], &calendar).unwrap().is_empty());
    }

    #[test]
    fn empty_calendar_with_missing_fails_fast() {
        let calendar = TradingCalendar::from_dates(vec![]);
        let err = group_windows(&[d("2024-12-02")], &calendar).unwrap_err();
        assert!(matches!(err, GapError::EmptyCalendar { missing: 1 }));
    }

    #[test]
    fn date_outside_calendar_fails_fast() {
        let calendar = cal(&["2024-12-02", "2024-12-03"]);
        let missing = vec![d("2024-12-02"), d("2024-12-25")];

        let err = group_windows(&missing, &calendar).unwrap_err();

        assert!(
            matches!(err, GapError::DateOutsideCalendar { date } if date == d("2024-12-25"))
        );
    }

    #[test]
    fn unsorted_duplicated_input_is_normalized() {
        let calendar = cal(&["2024-12-02", "2024-12-03", "2024-12-04"]);
        let missing = vec![d("2024-12-04"), d("2024-12-02"), d("2024-12-02")];

        let windows = group_windows(&missing, &calendar).unwrap();

        assert_eq!(
            windows,
            vec![
                FetchWindow::single(d("2024-12-02")),
                FetchWindow::single(d("2024-12-04")),
            ]
        );
    }

    #[test]
    fn missing_dates_diffs_against_calendar() {
        let calendar = cal(&["2024-12-02", "2024-12-03", "2024-12-04"]);
        let present: HashSet<NaiveDate> = [d("2024-12-03")].into_iter().collect();

        let missing = missing_dates(&calendar, &present);

        assert_eq!(missing, vec![d("2024-12-02"), d("2024-12-04")]);
    }

    proptest! {
        /// Windows cover exactly the missing set (per calendar session),
        /// appear in ascending order, and are pairwise non-adjacent in
        /// calendar position.
        #[test]
        fn grouping_properties(mask in proptest::collection::vec(any::<bool>(), 1..80)) {
            let base = d("2020-01-01");
            let dates: Vec<NaiveDate> =
                (0..mask.len()).map(|i| base + chrono::Duration::days(i as i64 * 3)).collect();
            let calendar = TradingCalendar::from_dates(dates.clone());

            let missing: Vec<NaiveDate> = dates
                .iter()
                .zip(&mask)
                .filter(|(_, m)| **m)
                .map(|(d, _)| *d)
                .collect();

            let windows = group_windows(&missing, &calendar).unwrap();

            // Ascending and disjoint.
            for pair in windows.windows(2) {
                prop_assert!(pair[0].end < pair[1].start);
            }

            // Every window's sessions are exactly a run of missing dates,
            // and the windows together cover the missing set exactly.
            let missing_set: HashSet<NaiveDate> = missing.iter().copied().collect();
            let mut covered = HashSet::new();
            for w in &windows {
                prop_assert!(w.start <= w.end);
                for session in calendar.iter().filter(|s| *s >= w.start && *s <= w.end) {
                    prop_assert!(missing_set.contains(&session));
                    covered.insert(session);
                }
            }
            prop_assert_eq!(covered, missing_set);

            // Pairwise non-adjacent: merging two windows would span a
            // present session.
            for pair in windows.windows(2) {
                let end_pos = calendar.position(pair[0].end).unwrap();
                let start_pos = calendar.position(pair[1].start).unwrap();
                prop_assert!(start_pos > end_pos + 1);
            }
        }
    }
}
