use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

pub const UNKNOWN_BUCKET: &str = "unknown";

/// A timestamp reduced to the two canonical keys the aggregators use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanonicalTime {
    stamp: NaiveDateTime,
}

impl CanonicalTime {
    pub fn date(&self) -> NaiveDate {
        self.stamp.date()
    }

    pub fn hour_bucket(&self) -> String {
        self.stamp.format("%Y-%m-%d %H:00").to_string()
    }
}

/// Timestamp did not parse under the family's expected format. Callers decide
/// what to do with the record; the engine policy is fail-open (keep the
/// record, bucket it as [`UNKNOWN_BUCKET`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Unparsable;

/// Access-log timestamps look like `10/Oct/2023:13:55:36 -0700`; only the
/// token before the first whitespace is significant, the offset is ignored.
pub fn parse_access_timestamp(raw: &str) -> Result<CanonicalTime, Unparsable> {
    let token = raw.split_whitespace().next().ok_or(Unparsable)?;
    NaiveDateTime::parse_from_str(token, "%d/%b/%Y:%H:%M:%S")
        .map(|stamp| CanonicalTime { stamp })
        .map_err(|_| Unparsable)
}

/// Apache error-log timestamps carry the conventional
/// `Dow Mon DD HH:MM:SS.ffffff YYYY` layout.
pub fn parse_apache_timestamp(raw: &str) -> Result<CanonicalTime, Unparsable> {
    NaiveDateTime::parse_from_str(raw.trim(), "%a %b %d %H:%M:%S%.f %Y")
        .map(|stamp| CanonicalTime { stamp })
        .map_err(|_| Unparsable)
}

/// Rolling inclusion window: the last `days` days before a reference instant.
/// Inclusion is date-granular — a record is in the window when the midnight
/// of its canonical date is not older than the cutoff.
#[derive(Clone, Copy, Debug)]
pub struct TimeWindow {
    cutoff: NaiveDateTime,
}

impl TimeWindow {
    pub fn last_days(now: NaiveDateTime, days: i64) -> Self {
        Self { cutoff: now - Duration::days(days) }
    }

    pub fn includes(&self, t: &CanonicalTime) -> bool {
        t.date().and_time(NaiveTime::MIN) >= self.cutoff
    }
}
