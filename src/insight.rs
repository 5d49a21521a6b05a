use crate::aggregate::{AccessSnapshot, ApacheSnapshot, DbSnapshot};
use crate::grammar::LogFamily;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Alert,
    Nominal,
}

/// One heuristic diagnostic statement. Regenerated on every run; carries no
/// identity beyond its text.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Finding {
    pub family: LogFamily,
    pub tier: Tier,
    pub message: String,
}

/// Error rate above this percentage flags the traffic summary as an alert.
/// Strictly above: exactly 5.0 stays nominal.
const ALERT_RATE_PCT: f64 = 5.0;

/// Substring-triggered rule: fires when any message signature contains the
/// needle, case-insensitively. All matching rules fire independently.
struct KeywordRule {
    needle: &'static str,
    tier: Tier,
    message: &'static str,
}

const APACHE_RULES: &[KeywordRule] = &[
    KeywordRule {
        needle: "rewrite",
        tier: Tier::Nominal,
        message: "mod_rewrite errors present; check the .htaccess rules and rewrite configuration",
    },
    KeywordRule {
        needle: "timed out",
        tier: Tier::Nominal,
        message: "Scripts timed out; profile the slow handlers or raise the Apache Timeout",
    },
];

const DB_RULES: &[KeywordRule] = &[
    KeywordRule {
        needle: "innodb",
        tier: Tier::Nominal,
        message: "InnoDB errors present; check the tablespace and ibdata files",
    },
    KeywordRule {
        needle: "lock",
        tier: Tier::Nominal,
        message: "File lock problems; make sure a second MySQL instance is not running",
    },
    KeywordRule {
        needle: "collation",
        tier: Tier::Nominal,
        message: "Charset or collation mismatch; check the database character-set configuration",
    },
    KeywordRule {
        needle: "too many connections",
        tier: Tier::Alert,
        message: "Too many connections; raise max_connections or tighten connection pooling",
    },
    KeywordRule {
        needle: "out of memory",
        tier: Tier::Alert,
        message: "Out of memory; add RAM or rework the offending queries",
    },
    KeywordRule {
        needle: "shutdown",
        tier: Tier::Nominal,
        message: "Server shutdowns recorded; check the crash log and service configuration",
    },
];

/// Pure function of the final snapshots. Families that were not analyzed are
/// passed as `None` and simply contribute no findings.
pub fn generate(
    access: Option<&AccessSnapshot>,
    apache: Option<&ApacheSnapshot>,
    db: Option<&DbSnapshot>,
) -> Vec<Finding> {
    let mut out: Vec<Finding> = Vec::new();
    if let Some(snap) = access {
        access_findings(snap, &mut out);
    }
    if let Some(snap) = apache {
        apache_findings(snap, &mut out);
    }
    if let Some(snap) = db {
        db_findings(snap, &mut out);
    }
    out
}

fn access_findings(snap: &AccessSnapshot, out: &mut Vec<Finding>) {
    let total = snap.status_counts.total();
    if total == 0 {
        return;
    }
    let errors = error_response_count(snap);
    let rate = errors as f64 / total as f64 * 100.0;
    let tier = if rate > ALERT_RATE_PCT { Tier::Alert } else { Tier::Nominal };
    out.push(Finding {
        family: LogFamily::Access,
        tier,
        message: format!(
            "Total requests: {total}, errors: {errors} (error rate {rate:.2}%)"
        ),
    });
    let not_found = snap.status_counts.get("HTTP 404");
    if not_found > 0 {
        out.push(Finding {
            family: LogFamily::Access,
            tier: Tier::Nominal,
            message: format!("{not_found} HTTP 404 responses; check for broken links or bad routing"),
        });
    }
    let server_errors = snap.status_counts.get("HTTP 500");
    if server_errors > 0 {
        out.push(Finding {
            family: LogFamily::Access,
            tier: Tier::Alert,
            message: format!("{server_errors} HTTP 500 responses; check the backend application for bugs"),
        });
    }
}

/// Responses with a status of 400 or higher, summed from the status table.
fn error_response_count(snap: &AccessSnapshot) -> u64 {
    snap.status_counts
        .rows()
        .into_iter()
        .filter(|(key, _)| {
            key.rsplit(' ')
                .next()
                .and_then(|s| s.parse::<u16>().ok())
                .map(|status| status >= 400)
                .unwrap_or(false)
        })
        .map(|(_, count)| count)
        .sum()
}

fn apache_findings(snap: &ApacheSnapshot, out: &mut Vec<Finding>) {
    if snap.level_counts.is_empty() {
        return;
    }
    if let Some((level, _)) = snap.level_counts.max_entry() {
        out.push(Finding {
            family: LogFamily::AppError,
            tier: Tier::Nominal,
            message: format!("Dominant Apache log level: {level}"),
        });
    }
    apply_keyword_rules(LogFamily::AppError, &signature_strings(snap.message_counts.rows()), APACHE_RULES, out);
}

fn db_findings(snap: &DbSnapshot, out: &mut Vec<Finding>) {
    if snap.message_counts.is_empty() {
        return;
    }
    if let Some((sig, count)) = snap.message_counts.max_entry() {
        out.push(Finding {
            family: LogFamily::DbError,
            tier: Tier::Nominal,
            message: format!("Most frequent MySQL error: {sig} ({count} occurrences)"),
        });
    }
    apply_keyword_rules(LogFamily::DbError, &signature_strings(snap.message_counts.rows()), DB_RULES, out);
}

fn signature_strings(rows: Vec<(String, u64)>) -> Vec<String> {
    rows.into_iter().map(|(sig, _)| sig.to_lowercase()).collect()
}

fn apply_keyword_rules(
    family: LogFamily,
    signatures: &[String],
    rules: &[KeywordRule],
    out: &mut Vec<Finding>,
) {
    for rule in rules {
        if signatures.iter().any(|sig| sig.contains(rule.needle)) {
            out.push(Finding { family, tier: rule.tier, message: rule.message.to_string() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::MessageSignature;

    fn access_with_statuses(pairs: &[(&str, usize)]) -> AccessSnapshot {
        let mut snap = AccessSnapshot::default();
        for (key, n) in pairs {
            for _ in 0..*n {
                snap.status_counts.bump(key.to_string());
            }
        }
        snap
    }

    #[test]
    fn rate_exactly_five_percent_stays_nominal() {
        let snap = access_with_statuses(&[("HTTP 200", 19), ("HTTP 404", 1)]);
        let findings = generate(Some(&snap), None, None);
        assert_eq!(findings[0].tier, Tier::Nominal);
        assert!(findings[0].message.contains("error rate 5.00%"));
    }

    #[test]
    fn rate_above_five_percent_alerts() {
        let snap = access_with_statuses(&[("HTTP 200", 9), ("HTTP 500", 1)]);
        let findings = generate(Some(&snap), None, None);
        assert_eq!(findings[0].tier, Tier::Alert);
        assert!(findings[0].message.contains("error rate 10.00%"));
    }

    #[test]
    fn not_found_and_server_error_findings_cite_counts() {
        let snap = access_with_statuses(&[("HTTP 404", 3), ("HTTP 500", 2), ("HTTP 200", 95)]);
        let findings = generate(Some(&snap), None, None);
        assert!(findings.iter().any(|f| f.message.starts_with("3 HTTP 404")));
        assert!(findings.iter().any(|f| f.message.starts_with("2 HTTP 500") && f.tier == Tier::Alert));
    }

    #[test]
    fn empty_families_produce_no_findings() {
        assert!(generate(None, None, None).is_empty());
        let empty = AccessSnapshot::default();
        assert!(generate(Some(&empty), None, None).is_empty());
    }

    #[test]
    fn dominant_level_breaks_ties_by_first_seen() {
        let mut snap = ApacheSnapshot::default();
        snap.level_counts.bump("WARN".to_string());
        snap.level_counts.bump("ERROR".to_string());
        let findings = generate(None, Some(&snap), None);
        assert!(findings[0].message.ends_with("WARN"));
    }

    #[test]
    fn rewrite_level_triggers_htaccess_rule() {
        let mut snap = ApacheSnapshot::default();
        snap.level_counts.bump("REWRITE".to_string());
        snap.message_counts.bump(MessageSignature::derive("REWRITE", "bad flag delimiters"));
        let findings = generate(None, Some(&snap), None);
        assert!(findings.iter().any(|f| f.message.contains(".htaccess")));
    }

    #[test]
    fn db_rules_fire_independently_and_worst_is_reported() {
        let mut snap = DbSnapshot::default();
        snap.message_counts.bump(MessageSignature::derive("WARNING", "InnoDB: Resizing buffer pool"));
        snap.message_counts.bump(MessageSignature::derive("WARNING", "InnoDB: Resizing buffer pool"));
        snap.message_counts.bump(MessageSignature::derive("ERROR", "Too many connections"));
        snap.message_counts.bump(MessageSignature::derive("ERROR", "Unable to lock ./ibdata1"));
        let findings = generate(None, None, Some(&snap));
        assert!(findings[0].message.contains("[WARNING] InnoDB"));
        assert!(findings[0].message.contains("2 occurrences"));
        assert!(findings.iter().any(|f| f.message.contains("tablespace")));
        assert!(findings.iter().any(|f| f.message.contains("second MySQL instance")));
        assert!(findings.iter().any(|f| f.message.contains("max_connections")));
        assert!(!findings.iter().any(|f| f.message.contains("crash log")));
    }
}
