use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFamily {
    Access,
    AppError,
    DbError,
}

impl LogFamily {
    pub fn label(self) -> &'static str {
        match self {
            LogFamily::Access => "access log",
            LogFamily::AppError => "Apache error log",
            LogFamily::DbError => "MySQL error log",
        }
    }
}

/// One matched line of an HTTP access log. The protocol token is discarded
/// at extraction; the size field is kept raw because servers emit `-` there.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessRecord {
    pub ip: String,
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub size: String,
}

/// One matched line of an error log (Apache or MySQL shape). Level is
/// upper-cased at extraction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorRecord {
    pub timestamp: String,
    pub level: String,
    pub message: String,
}

struct Grammars {
    access: Regex,
    app_error: Regex,
    db_error: Regex,
}

fn grammars() -> &'static Grammars {
    static GRAMMARS: OnceLock<Grammars> = OnceLock::new();
    GRAMMARS.get_or_init(|| Grammars {
        access: Regex::new(
            r#"(?P<ip>\S+) - - \[(?P<date>[^\]]*)\] "(?P<method>\S+) (?P<path>\S+) \S+" (?P<status>\d{3}) (?P<size>\S+)"#,
        )
        .expect("access grammar"),
        app_error: Regex::new(r"^\[(?P<date>[^\]]*)\] \[(?P<level>\w+):\w+\] .* (?P<message>.*)$")
            .expect("app error grammar"),
        db_error: Regex::new(
            r"^(?P<date>\d{4}-\d{2}-\d{2}[ T]\S*) \d+ \[(?P<level>[A-Za-z]+)\] (?P<message>.*)$",
        )
        .expect("db error grammar"),
    })
}

/// Structural match against the combined access-log shape. Lines that do not
/// carry the full `IP - - [ts] "METHOD PATH PROTO" STATUS SIZE` substructure
/// yield `None` and contribute nothing downstream.
pub fn parse_access(line: &str) -> Option<AccessRecord> {
    let caps = grammars().access.captures(line)?;
    let status: u16 = caps["status"].parse().ok()?;
    Some(AccessRecord {
        ip: caps["ip"].to_string(),
        timestamp: caps["date"].to_string(),
        method: caps["method"].to_string(),
        path: caps["path"].to_string(),
        status,
        size: caps["size"].to_string(),
    })
}

/// Apache-style error line: `[ts] [level:source] ... message`. Bracketed
/// fields such as `[pid N]` and `[client addr]` sit between the level and the
/// message; the grammar skips them without interpreting them.
pub fn parse_app_error(line: &str) -> Option<ErrorRecord> {
    let caps = grammars().app_error.captures(line)?;
    Some(ErrorRecord {
        timestamp: caps["date"].to_string(),
        level: caps["level"].to_uppercase(),
        message: caps["message"].to_string(),
    })
}

/// MySQL-style error line: `DATE CONNID [Level] message`. The connection id
/// is discarded.
pub fn parse_db_error(line: &str) -> Option<ErrorRecord> {
    let caps = grammars().db_error.captures(line)?;
    Some(ErrorRecord {
        timestamp: caps["date"].to_string(),
        level: caps["level"].to_uppercase(),
        message: caps["message"].to_string(),
    })
}
