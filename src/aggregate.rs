use crate::grammar;
use crate::time_filter::{self, TimeWindow, UNKNOWN_BUCKET};
use indexmap::IndexMap;
use std::fmt;
use std::hash::Hash;

/// Insertion-ordered frequency table. Order matters: top-N views and
/// max-entry lookups break count ties by first-seen key.
#[derive(Clone, Debug)]
pub struct CountTable<K: Hash + Eq = String> {
    counts: IndexMap<K, u64>,
}

impl<K: Hash + Eq> Default for CountTable<K> {
    fn default() -> Self {
        Self { counts: IndexMap::new() }
    }
}

impl<K: Hash + Eq> CountTable<K> {
    pub fn bump(&mut self, key: K) {
        *self.counts.entry(key).or_insert(0) += 1;
    }

    pub fn get<Q>(&self, key: &Q) -> u64
    where
        Q: ?Sized + Hash + indexmap::Equivalent<K>,
    {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

impl<K: Hash + Eq + ToString> CountTable<K> {
    /// Key/count pairs in first-seen order.
    pub fn rows(&self) -> Vec<(String, u64)> {
        self.counts.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    /// The `n` highest-count entries, descending. The sort is stable, so
    /// equal counts keep their first-seen order.
    pub fn top(&self, n: usize) -> Vec<(String, u64)> {
        let mut rows = self.rows();
        rows.sort_by(|a, b| b.1.cmp(&a.1));
        rows.truncate(n);
        rows
    }

    /// Rows ordered by key, for hour-bucket trends. The `unknown` sentinel
    /// sorts after real `YYYY-MM-DD HH:00` labels.
    pub fn sorted_rows(&self) -> Vec<(String, u64)> {
        let mut rows = self.rows();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Highest-count entry; first-seen wins ties.
    pub fn max_entry(&self) -> Option<(String, u64)> {
        let mut best: Option<(&K, u64)> = None;
        for (k, v) in &self.counts {
            if best.map(|(_, bv)| *v > bv).unwrap_or(true) {
                best = Some((k, *v));
            }
        }
        best.map(|(k, v)| (k.to_string(), v))
    }
}

/// Deduplication key for error aggregation: severity plus the message
/// truncated at its first colon, so instances differing only in a variable
/// suffix (paths, ids) collapse into one bucket.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageSignature {
    level: String,
    prefix: String,
}

impl MessageSignature {
    pub fn derive(level: &str, message: &str) -> Self {
        let prefix = message.split(':').next().unwrap_or(message);
        Self { level: level.to_string(), prefix: prefix.to_string() }
    }
}

impl fmt::Display for MessageSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.prefix)
    }
}

pub const TOP_N: usize = 10;

/// Aggregates for one pass over an access log.
#[derive(Clone, Debug, Default)]
pub struct AccessSnapshot {
    pub lines_scanned: usize,
    pub lines_matched: usize,
    pub status_counts: CountTable,
    pub path_counts: CountTable,
    pub ip_counts: CountTable,
    pub path_error_counts: CountTable,
    pub requests_per_hour: CountTable,
    pub errors_per_hour: CountTable,
}

impl AccessSnapshot {
    /// Single synchronous reduction: grammar, window filter, counters. Lines
    /// that fail the grammar are skipped; parsed timestamps outside the
    /// window drop the whole record; unparsable timestamps fail open into
    /// the `unknown` hour bucket.
    pub fn collect<'a, I>(lines: I, window: &TimeWindow) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut snap = Self::default();
        for line in lines {
            snap.lines_scanned += 1;
            let Some(rec) = grammar::parse_access(line) else { continue };
            snap.lines_matched += 1;
            log::trace!("access: {} {} {} -> {} size {}", rec.ip, rec.method, rec.path, rec.status, rec.size);
            let hour = match time_filter::parse_access_timestamp(&rec.timestamp) {
                Ok(t) => {
                    if !window.includes(&t) {
                        continue;
                    }
                    t.hour_bucket()
                }
                Err(time_filter::Unparsable) => UNKNOWN_BUCKET.to_string(),
            };
            snap.status_counts.bump(format!("HTTP {}", rec.status));
            snap.path_counts.bump(rec.path.clone());
            snap.ip_counts.bump(rec.ip);
            snap.requests_per_hour.bump(hour.clone());
            if rec.status >= 400 {
                snap.errors_per_hour.bump(hour);
                snap.path_error_counts.bump(rec.path);
            }
        }
        snap
    }

    /// Matched lines that survived the window filter.
    pub fn lines_included(&self) -> u64 {
        self.status_counts.total()
    }
}

/// Aggregates for one pass over an Apache error log.
#[derive(Clone, Debug, Default)]
pub struct ApacheSnapshot {
    pub lines_scanned: usize,
    pub lines_matched: usize,
    pub message_counts: CountTable<MessageSignature>,
    pub level_counts: CountTable,
    pub errors_per_hour: CountTable,
}

impl ApacheSnapshot {
    pub fn collect<'a, I>(lines: I, window: &TimeWindow) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut snap = Self::default();
        for line in lines {
            snap.lines_scanned += 1;
            let Some(rec) = grammar::parse_app_error(line) else { continue };
            snap.lines_matched += 1;
            let hour = match time_filter::parse_apache_timestamp(&rec.timestamp) {
                Ok(t) => {
                    if !window.includes(&t) {
                        continue;
                    }
                    t.hour_bucket()
                }
                Err(time_filter::Unparsable) => UNKNOWN_BUCKET.to_string(),
            };
            snap.message_counts.bump(MessageSignature::derive(&rec.level, &rec.message));
            snap.level_counts.bump(rec.level);
            snap.errors_per_hour.bump(hour);
        }
        snap
    }
}

const DB_NOTE_KEYWORDS: [&str; 4] = ["innodb", "shutdown", "failed", "could not"];

/// Aggregates for one pass over a MySQL error log. No time bucketing or
/// window filtering applies to this family.
#[derive(Clone, Debug, Default)]
pub struct DbSnapshot {
    pub lines_scanned: usize,
    pub lines_matched: usize,
    pub message_counts: CountTable<MessageSignature>,
}

impl DbSnapshot {
    pub fn collect<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut snap = Self::default();
        for line in lines {
            snap.lines_scanned += 1;
            let Some(rec) = grammar::parse_db_error(line) else { continue };
            snap.lines_matched += 1;
            if !db_record_is_interesting(&rec.level, &rec.message) {
                continue;
            }
            snap.message_counts.bump(MessageSignature::derive(&rec.level, &rec.message));
        }
        snap
    }
}

/// Noise filter for database logs: NOTE-level chatter only counts when it
/// mentions one of the storage-engine keywords.
fn db_record_is_interesting(level: &str, message: &str) -> bool {
    match level {
        "ERROR" | "WARNING" => true,
        "NOTE" => {
            let lower = message.to_lowercase();
            DB_NOTE_KEYWORDS.iter().any(|kw| lower.contains(kw))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn window_at(y: i32, mo: u32, d: u32, days: i64) -> TimeWindow {
        let now = NaiveDate::from_ymd_opt(y, mo, d).unwrap().and_hms_opt(12, 0, 0).unwrap();
        TimeWindow::last_days(now, days)
    }

    #[test]
    fn signature_truncates_at_first_colon_and_is_idempotent() {
        let sig = MessageSignature::derive("ERROR", "InnoDB: Cannot allocate memory: retry");
        assert_eq!(sig.to_string(), "[ERROR] InnoDB");
        assert_eq!(MessageSignature::derive("ERROR", "InnoDB: Cannot allocate memory: retry"), sig);
    }

    #[test]
    fn signature_without_colon_keeps_whole_message() {
        let sig = MessageSignature::derive("WARNING", "disk almost full");
        assert_eq!(sig.to_string(), "[WARNING] disk almost full");
    }

    #[test]
    fn top_caps_at_n_and_breaks_ties_by_first_seen() {
        let mut t = CountTable::default();
        for _ in 0..3 {
            t.bump("b".to_string());
        }
        for key in ["c", "a", "d"] {
            t.bump(key.to_string());
        }
        let top = t.top(2);
        assert_eq!(top, vec![("b".to_string(), 3), ("c".to_string(), 1)]);
        assert!(t.top(TOP_N).len() <= TOP_N);
    }

    #[test]
    fn max_entry_prefers_first_seen_on_tie() {
        let mut t = CountTable::default();
        t.bump("x".to_string());
        t.bump("y".to_string());
        assert_eq!(t.max_entry(), Some(("x".to_string(), 1)));
    }

    #[test]
    fn status_sum_matches_included_lines() {
        let lines = [
            r#"1.1.1.1 - - [10/Oct/2023:13:55:36 -0700] "GET / HTTP/1.0" 200 512"#,
            r#"1.1.1.2 - - [10/Oct/2023:14:00:00 -0700] "GET /a HTTP/1.0" 404 100"#,
            // unparsable timestamp: fails open, still counted
            r#"1.1.1.3 - - [garbage] "GET /b HTTP/1.0" 200 99"#,
            // outside the window: dropped entirely
            r#"1.1.1.4 - - [01/Jan/2020:00:00:00 +0000] "GET /old HTTP/1.0" 200 1"#,
            // stack-trace continuation: no grammar match
            "    at handler.go:17",
        ];
        let snap = AccessSnapshot::collect(lines, &window_at(2023, 10, 11, 7));
        assert_eq!(snap.lines_scanned, 5);
        assert_eq!(snap.lines_matched, 4);
        assert_eq!(snap.lines_included(), 3);
        assert_eq!(snap.status_counts.total(), 3);
        assert_eq!(snap.status_counts.get("HTTP 200"), 2);
        assert_eq!(snap.status_counts.get("HTTP 404"), 1);
    }

    #[test]
    fn unparsable_timestamp_lands_in_unknown_bucket() {
        let lines = [
            r#"1.1.1.1 - - [10/Oct/2023:13:55:36 -0700] "GET / HTTP/1.0" 500 1"#,
            r#"1.1.1.2 - - [bogus] "GET / HTTP/1.0" 503 1"#,
        ];
        let snap = AccessSnapshot::collect(lines, &window_at(2023, 10, 11, 7));
        assert_eq!(snap.requests_per_hour.get("2023-10-10 13:00"), 1);
        assert_eq!(snap.requests_per_hour.get(UNKNOWN_BUCKET), 1);
        assert_eq!(snap.errors_per_hour.get(UNKNOWN_BUCKET), 1);
        // the fail-open record still reaches the non-time-series tables
        assert_eq!(snap.ip_counts.get("1.1.1.2"), 1);
        assert_eq!(snap.path_error_counts.get("/"), 2);
    }

    #[test]
    fn error_tables_only_count_4xx_and_5xx() {
        let lines = [
            r#"1.1.1.1 - - [10/Oct/2023:13:00:00 +0000] "GET /ok HTTP/1.0" 200 1"#,
            r#"1.1.1.1 - - [10/Oct/2023:13:01:00 +0000] "GET /missing HTTP/1.0" 404 1"#,
        ];
        let snap = AccessSnapshot::collect(lines, &window_at(2023, 10, 11, 7));
        assert_eq!(snap.path_error_counts.rows(), vec![("/missing".to_string(), 1)]);
        assert_eq!(snap.errors_per_hour.total(), 1);
        assert_eq!(snap.requests_per_hour.total(), 2);
    }

    #[test]
    fn apache_snapshot_counts_levels_and_signatures() {
        let lines = [
            "[Wed Oct 11 14:32:52.123456 2023] [core:error] [pid 1] [client ::1] File does not exist: /var/www/a.ico",
            "[Wed Oct 11 14:40:00.000000 2023] [core:error] [pid 1] [client ::1] File does not exist: /var/www/a.ico",
            "[Wed Oct 11 15:00:00.000000 2023] [auth:warn] [pid 2] [client ::1] user admin not found",
        ];
        let snap = ApacheSnapshot::collect(lines, &window_at(2023, 10, 12, 7));
        assert_eq!(snap.lines_matched, 3);
        assert_eq!(snap.level_counts.get("CORE"), 2);
        assert_eq!(snap.level_counts.get("AUTH"), 1);
        assert_eq!(snap.message_counts.total(), 3);
        assert_eq!(snap.errors_per_hour.get("2023-10-11 14:00"), 2);
        assert_eq!(snap.errors_per_hour.get("2023-10-11 15:00"), 1);
    }

    #[test]
    fn db_note_lines_need_a_keyword() {
        let lines = [
            "2023-10-10T08:00:00.000000Z 5 [Note] Server socket created on IP",
            "2023-10-10T08:00:01.000000Z 5 [Note] InnoDB: Buffer pool loaded",
            "2023-10-10T08:00:02.000000Z 6 [Note] Shutdown in progress",
            "2023-10-10T08:00:03.000000Z 7 [Warning] Aborted connection 7",
        ];
        let snap = DbSnapshot::collect(lines);
        assert_eq!(snap.lines_matched, 4);
        // the keyword-less NOTE contributes nothing
        assert_eq!(snap.message_counts.total(), 3);
        assert_eq!(snap.message_counts.get(&MessageSignature::derive("NOTE", "InnoDB: x")), 1);
    }
}
