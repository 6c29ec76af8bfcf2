//! Wall-clock bounds of a run.

use chrono::{DateTime, Utc};

/// Format used for every timestamp in outgoing reports.
const RFC3339_SECONDS: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Start and finish of the run, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunMeasurement {
    start: DateTime<Utc>,
    finish: Option<DateTime<Utc>>,
}

impl RunMeasurement {
    /// Begin measuring now.
    pub fn start() -> Self {
        Self::started_at(Utc::now())
    }

    pub fn started_at(start: DateTime<Utc>) -> Self {
        Self {
            start,
            finish: None,
        }
    }

    /// Record the finish time. Only the first call has an effect.
    pub fn finalize(&mut self) {
        self.finalize_at(Utc::now());
    }

    pub fn finalize_at(&mut self, finish: DateTime<Utc>) {
        if self.finish.is_none() {
            self.finish = Some(finish.max(self.start));
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start
    }

    /// Finish time, or `None` while the run is still being measured.
    pub fn finish_time(&self) -> Option<DateTime<Utc>> {
        self.finish
    }

    pub fn is_finalized(&self) -> bool {
        self.finish.is_some()
    }

    /// Elapsed time, up to now for an unfinished measurement.
    pub fn elapsed(&self) -> chrono::Duration {
        self.finish.unwrap_or_else(Utc::now) - self.start
    }
}

/// `YYYY-MM-DDTHH:MM:SSZ`, sub-second precision dropped.
pub fn rfc3339(at: DateTime<Utc>) -> String {
    at.format(RFC3339_SECONDS).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rfc3339_drops_subseconds() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap()
            + chrono::Duration::milliseconds(999);
        assert_eq!(rfc3339(at), "2024-03-09T07:05:01Z");
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut m = RunMeasurement::started_at(start);
        assert!(!m.is_finalized());

        let first = start + chrono::Duration::seconds(30);
        m.finalize_at(first);
        m.finalize_at(first + chrono::Duration::seconds(30));

        assert_eq!(m.finish_time(), Some(first));
        assert_eq!(m.elapsed().num_seconds(), 30);
    }

    #[test]
    fn test_finish_never_precedes_start() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap();
        let mut m = RunMeasurement::started_at(start);
        m.finalize_at(start - chrono::Duration::seconds(5));
        assert_eq!(m.finish_time(), Some(start));
    }
}
