use crate::aggregate::{AccessSnapshot, ApacheSnapshot, DbSnapshot, TOP_N};
use crate::insight::Finding;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Excel refuses sheet names longer than 31 characters.
const SHEET_NAME_LIMIT: usize = 31;

/// A named two-column key/count table, the only shape the presentation side
/// ever sees. Row order is the order the aggregators fixed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatTable {
    pub name: String,
    pub columns: [String; 2],
    pub rows: Vec<(String, u64)>,
}

impl StatTable {
    fn new(name: &str, key_col: &str, value_col: &str, rows: Vec<(String, u64)>) -> Self {
        Self {
            name: name.to_string(),
            columns: [key_col.to_string(), value_col.to_string()],
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn sheet_name(&self) -> String {
        self.name.chars().take(SHEET_NAME_LIMIT).collect()
    }

    pub fn write_csv(&self, path: &Path) -> anyhow::Result<()> {
        let mut wtr = csv::Writer::from_path(path)
            .with_context(|| format!("create {}", path.display()))?;
        wtr.write_record([self.columns[0].as_str(), self.columns[1].as_str()])?;
        for (key, count) in &self.rows {
            wtr.write_record([key.clone(), count.to_string()])?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_xlsx(&self, path: &Path) -> anyhow::Result<()> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name(self.sheet_name())?;
        sheet.write_string(0, 0, self.columns[0].as_str())?;
        sheet.write_string(0, 1, self.columns[1].as_str())?;
        for (i, (key, count)) in self.rows.iter().enumerate() {
            let row = (i + 1) as u32;
            sheet.write_string(row, 0, key.as_str())?;
            sheet.write_number(row, 1, *count as f64)?;
        }
        workbook.save(path).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessReport {
    pub lines_scanned: usize,
    pub lines_matched: usize,
    pub lines_included: u64,
    pub status_counts: StatTable,
    pub top_endpoints: StatTable,
    pub top_error_endpoints: StatTable,
    pub top_ips: StatTable,
    pub error_trend: StatTable,
    pub busiest_hour: Option<(String, u64)>,
}

impl AccessReport {
    pub fn from_snapshot(snap: &AccessSnapshot) -> Self {
        Self {
            lines_scanned: snap.lines_scanned,
            lines_matched: snap.lines_matched,
            lines_included: snap.lines_included(),
            status_counts: StatTable::new(
                "AccessLogStats",
                "Status Code",
                "Count",
                snap.status_counts.rows(),
            ),
            top_endpoints: StatTable::new(
                "TopEndpoints",
                "Endpoint",
                "Hits",
                snap.path_counts.top(TOP_N),
            ),
            top_error_endpoints: StatTable::new(
                "TopErrorEndpoints",
                "Endpoint",
                "Errors",
                snap.path_error_counts.top(TOP_N),
            ),
            top_ips: StatTable::new("TopIPs", "IP Address", "Hits", snap.ip_counts.top(TOP_N)),
            error_trend: StatTable::new(
                "AccessErrorTrend",
                "Hour",
                "Errors",
                snap.errors_per_hour.sorted_rows(),
            ),
            busiest_hour: snap.requests_per_hour.max_entry(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApacheReport {
    pub lines_scanned: usize,
    pub lines_matched: usize,
    pub message_counts: StatTable,
    pub level_counts: StatTable,
    pub error_trend: StatTable,
}

impl ApacheReport {
    pub fn from_snapshot(snap: &ApacheSnapshot) -> Self {
        Self {
            lines_scanned: snap.lines_scanned,
            lines_matched: snap.lines_matched,
            message_counts: StatTable::new(
                "ApacheErrors",
                "Log Message",
                "Count",
                snap.message_counts.rows(),
            ),
            level_counts: StatTable::new("ApacheLevels", "Level", "Count", snap.level_counts.rows()),
            error_trend: StatTable::new(
                "ApacheErrorTrend",
                "Hour",
                "Count",
                snap.errors_per_hour.sorted_rows(),
            ),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbReport {
    pub lines_scanned: usize,
    pub lines_matched: usize,
    pub message_counts: StatTable,
}

impl DbReport {
    pub fn from_snapshot(snap: &DbSnapshot) -> Self {
        Self {
            lines_scanned: snap.lines_scanned,
            lines_matched: snap.lines_matched,
            message_counts: StatTable::new(
                "MySQLErrors",
                "Error Message",
                "Count",
                snap.message_counts.rows(),
            ),
        }
    }
}

/// Everything one analysis run produces. Families that had no input file
/// stay `None`; families whose file matched nothing carry empty tables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub days: i64,
    pub access: Option<AccessReport>,
    pub apache: Option<ApacheReport>,
    pub db: Option<DbReport>,
    pub findings: Vec<Finding>,
}

impl AnalysisReport {
    pub fn tables(&self) -> Vec<&StatTable> {
        let mut out: Vec<&StatTable> = Vec::new();
        if let Some(a) = self.access.as_ref() {
            out.extend([
                &a.status_counts,
                &a.top_endpoints,
                &a.top_error_endpoints,
                &a.top_ips,
                &a.error_trend,
            ]);
        }
        if let Some(a) = self.apache.as_ref() {
            out.extend([&a.message_counts, &a.level_counts, &a.error_trend]);
        }
        if let Some(d) = self.db.as_ref() {
            out.push(&d.message_counts);
        }
        out
    }

    /// One `<name>.csv` per non-empty table.
    pub fn export_csv(&self, dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        for table in self.tables() {
            if table.is_empty() {
                continue;
            }
            table.write_csv(&dir.join(format!("{}.csv", table.name)))?;
        }
        Ok(())
    }

    /// One single-sheet `<name>.xlsx` workbook per non-empty table.
    pub fn export_xlsx(&self, dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        for table in self.tables() {
            if table.is_empty() {
                continue;
            }
            table.write_xlsx(&dir.join(format!("{}.xlsx", table.name)))?;
        }
        Ok(())
    }
}
