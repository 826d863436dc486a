use chrono::{Days, NaiveDate};

use crate::factors::PowerVariable;
use crate::services::power::{DailyObservation, DailyPointSource, UpstreamError};

#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("year {year}: no calendar date for month={month} day={day}")]
    InvalidDate { year: i32, month: u32, day: u32 },
    #[error("year {year}: {source}")]
    Upstream {
        year: i32,
        #[source]
        source: UpstreamError,
    },
}

/// Fetches the ±`half_window_days` calendar window around (month, day) for
/// every year in `[start_year, end_year]` and concatenates the results, each
/// row tagged with its window year.
///
/// Fail-fast: the first year whose fetch fails (after the client's own
/// retries) aborts the whole window; one bad year voids the multi-decade
/// analysis. An empty concatenation is a valid, non-error outcome.
pub async fn fetch_window(
    source: &dyn DailyPointSource,
    latitude: f64,
    longitude: f64,
    month: u32,
    day: u32,
    start_year: i32,
    end_year: i32,
    half_window_days: u32,
    variables: &[PowerVariable],
) -> Result<Vec<DailyObservation>, WindowError> {
    let mut rows = Vec::new();
    for year in start_year..=end_year {
        let center = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or(WindowError::InvalidDate { year, month, day })?;
        let half = Days::new(u64::from(half_window_days));
        let start = center - half;
        let end = center + half;

        let mut fetched = source
            .fetch_day_range(latitude, longitude, start, end, variables)
            .await
            .map_err(|source| WindowError::Upstream { year, source })?;
        for row in &mut fetched {
            row.year = year;
        }
        rows.append(&mut fetched);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Datelike;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Serves one synthetic row per requested day and records requested ranges.
    struct RangeRecordingSource {
        ranges: Mutex<Vec<(NaiveDate, NaiveDate)>>,
        fail_when_start_in_year: Option<i32>,
    }

    impl RangeRecordingSource {
        fn new() -> Self {
            Self {
                ranges: Mutex::new(Vec::new()),
                fail_when_start_in_year: None,
            }
        }

        fn failing_for(year: i32) -> Self {
            Self {
                ranges: Mutex::new(Vec::new()),
                fail_when_start_in_year: Some(year),
            }
        }
    }

    #[async_trait]
    impl DailyPointSource for RangeRecordingSource {
        async fn fetch_day_range(
            &self,
            _latitude: f64,
            _longitude: f64,
            start: NaiveDate,
            end: NaiveDate,
            variables: &[PowerVariable],
        ) -> Result<Vec<DailyObservation>, UpstreamError> {
            self.ranges.lock().unwrap().push((start, end));
            if self.fail_when_start_in_year == Some(start.year()) {
                return Err(UpstreamError::RetriesExhausted {
                    attempts: 3,
                    url: "http://power.test/point".to_string(),
                    last_error: "POWER HTTP 502".to_string(),
                });
            }

            let mut rows = Vec::new();
            let mut date = start;
            while date <= end {
                let values: BTreeMap<PowerVariable, Option<f64>> = variables
                    .iter()
                    .map(|var| (*var, Some(date.day() as f64)))
                    .collect();
                rows.push(DailyObservation {
                    date,
                    year: date.year(),
                    values,
                });
                date = date + Days::new(1);
            }
            Ok(rows)
        }
    }

    #[tokio::test]
    async fn zero_half_window_fetches_exactly_the_target_date_per_year() {
        let source = RangeRecordingSource::new();
        let rows = fetch_window(&source, 19.4, -99.1, 5, 10, 2000, 2002, 0, &[PowerVariable::T2m])
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        for (row, year) in rows.iter().zip(2000..=2002) {
            assert_eq!(row.date, NaiveDate::from_ymd_opt(year, 5, 10).unwrap());
            assert_eq!(row.year, year);
        }
        assert_eq!(source.ranges.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn window_crosses_year_boundary_and_keeps_the_window_year_tag() {
        let source = RangeRecordingSource::new();
        let rows = fetch_window(&source, 0.0, 0.0, 1, 3, 2010, 2010, 5, &[PowerVariable::T2m])
            .await
            .unwrap();

        assert_eq!(rows.len(), 11);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2009, 12, 29).unwrap());
        assert_eq!(rows[10].date, NaiveDate::from_ymd_opt(2010, 1, 8).unwrap());
        // Rows from late December belong to the 2010 window.
        assert!(rows.iter().all(|row| row.year == 2010));
    }

    #[tokio::test]
    async fn failing_year_aborts_the_whole_window_and_names_the_year() {
        let source = RangeRecordingSource::failing_for(2001);
        let err = fetch_window(&source, 0.0, 0.0, 7, 1, 2000, 2005, 0, &[PowerVariable::T2m])
            .await
            .unwrap_err();

        match &err {
            WindowError::Upstream { year, .. } => assert_eq!(*year, 2001),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("year 2001"));
        // No further years were attempted after the failure.
        assert_eq!(source.ranges.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn feb_29_fails_for_non_leap_years() {
        let source = RangeRecordingSource::new();
        let err = fetch_window(&source, 0.0, 0.0, 2, 29, 2003, 2004, 0, &[PowerVariable::T2m])
            .await
            .unwrap_err();
        match err {
            WindowError::InvalidDate { year, month, day } => {
                assert_eq!((year, month, day), (2003, 2, 29));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_upstream_tables_are_a_valid_outcome() {
        struct EmptySource;

        #[async_trait]
        impl DailyPointSource for EmptySource {
            async fn fetch_day_range(
                &self,
                _latitude: f64,
                _longitude: f64,
                _start: NaiveDate,
                _end: NaiveDate,
                _variables: &[PowerVariable],
            ) -> Result<Vec<DailyObservation>, UpstreamError> {
                Ok(Vec::new())
            }
        }

        let rows = fetch_window(&EmptySource, 0.0, 0.0, 6, 1, 1990, 1995, 3, &[PowerVariable::T2m])
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
