use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use chrono::Local;
use clap::{ArgAction, ColorChoice, CommandFactory, Parser, ValueEnum};
use clap_complete::Shell;
use comfy_table::{ContentArrangement, Table};
use is_terminal::IsTerminal;
use serde::{Deserialize, Serialize};

mod aggregate;
mod grammar;
mod insight;
mod markdown;
mod report;
mod time_filter;

use aggregate::{AccessSnapshot, ApacheSnapshot, DbSnapshot};
use grammar::LogFamily;
use insight::Tier;
use report::{AccessReport, AnalysisReport, ApacheReport, DbReport, StatTable};
use time_filter::TimeWindow;

static ENABLE_COLOR: OnceLock<bool> = OnceLock::new();

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
enum OutputFmt { Text, Json }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
enum LogLevel { Error, Warn, Info, Debug, Trace }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
enum LogFormat { Text, Json }

#[derive(Parser, Debug)]
#[command(
    name = "logdoctor",
    about = "Server log analyzer and diagnostics reporter",
    long_about = "Server log analyzer that parses HTTP access logs, Apache error logs, and MySQL error logs, aggregates them into per-family statistics, and emits heuristic diagnostic findings.",
    after_long_help = "Examples:\n  logdoctor --access-log access.log\n  logdoctor --access-log access.log --days 30 --output json\n  logdoctor --error-log error.log --db-log mysql-error.log --csv-dir exports\n  logdoctor --access-log access.log --md-path report.md --xlsx-dir sheets",
    color = ColorChoice::Auto
)]
struct Args {
    /// HTTP access log to analyze
    #[arg(long, short = 'a')]
    access_log: Option<PathBuf>,
    /// Apache-style application error log to analyze
    #[arg(long, short = 'e')]
    error_log: Option<PathBuf>,
    /// MySQL-style database error log to analyze
    #[arg(long, short = 'b')]
    db_log: Option<PathBuf>,
    /// Include only records from the last N days (1-365)
    #[arg(long, short = 'd', default_value_t = 7, value_parser = clap::value_parser!(i64).range(1..=365))]
    days: i64,
    #[arg(long, short = 'o', value_enum, default_value = "text")]
    output: OutputFmt,
    #[arg(long, short = 'j')]
    json_path: Option<String>,
    /// Write one CSV file per table into this directory
    #[arg(long)]
    csv_dir: Option<String>,
    /// Write one XLSX workbook per table into this directory
    #[arg(long)]
    xlsx_dir: Option<String>,
    #[arg(long)]
    md_path: Option<String>,
    #[arg(long, default_value_t = false)]
    summary_only: bool,
    #[arg(long, short = 'C', default_value_t = false)]
    no_color: bool,
    #[arg(long, default_value_t = false)]
    force_color: bool,
    #[arg(long)]
    log_level: Option<LogLevel>,
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
    #[arg(long)]
    log_path: Option<String>,
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
    #[arg(short = 'q', long, default_value_t = false)]
    quiet: bool,
    #[arg(long, default_value_t = false)]
    progress: bool,
    #[arg(long, value_enum)]
    completions: Option<Shell>,
    #[arg(long)]
    completions_out: Option<String>,
    #[arg(long)]
    config: Option<String>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            access_log: None,
            error_log: None,
            db_log: None,
            days: 7,
            output: OutputFmt::Text,
            json_path: None,
            csv_dir: None,
            xlsx_dir: None,
            md_path: None,
            summary_only: false,
            no_color: false,
            force_color: false,
            log_level: None,
            log_format: None,
            log_path: None,
            verbose: 0,
            quiet: false,
            progress: false,
            completions: None,
            completions_out: None,
            config: None,
        }
    }
}

#[derive(Deserialize)]
struct AppConfig {
    access_log: Option<String>,
    error_log: Option<String>,
    db_log: Option<String>,
    days: Option<i64>,
    output: Option<OutputFmt>,
    json_path: Option<String>,
    csv_dir: Option<String>,
    xlsx_dir: Option<String>,
    md_path: Option<String>,
    summary_only: Option<bool>,
    progress: Option<bool>,
    force_color: Option<bool>,
    log_format: Option<LogFormat>,
    log_path: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let mut args = Args::parse();
    if let Some(sh) = args.completions {
        let mut cmd = Args::command();
        if let Some(path) = args.completions_out.as_ref() {
            if let Ok(mut f) = std::fs::File::create(path) { clap_complete::generate(sh, &mut cmd, "logdoctor", &mut f); } else { clap_complete::generate(sh, &mut cmd, "logdoctor", &mut std::io::stdout()); }
        } else {
            clap_complete::generate(sh, &mut cmd, "logdoctor", &mut std::io::stdout());
        }
        return Ok(());
    }
    if let Some(p) = args.config.as_ref()
        && let Ok(s) = std::fs::read_to_string(p)
        && let Ok(cfg) = toml::from_str::<AppConfig>(&s) { apply_config(&mut args, cfg); }
    else {
        let def = "logdoctor.toml";
        if let Ok(s) = std::fs::read_to_string(def)
            && let Ok(cfg) = toml::from_str::<AppConfig>(&s) { apply_config(&mut args, cfg); }
    }
    {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if args.quiet {
            builder.filter_level(log::LevelFilter::Error);
        } else if let Some(lvl) = args.log_level {
            let f = match lvl { LogLevel::Error => log::LevelFilter::Error, LogLevel::Warn => log::LevelFilter::Warn, LogLevel::Info => log::LevelFilter::Info, LogLevel::Debug => log::LevelFilter::Debug, LogLevel::Trace => log::LevelFilter::Trace };
            builder.filter_level(f);
        } else if args.verbose > 0 {
            let f = if args.verbose >= 3 { log::LevelFilter::Trace } else if args.verbose == 2 { log::LevelFilter::Debug } else { log::LevelFilter::Info };
            builder.filter_level(f);
        }
        if let Some(fmt) = args.log_format {
            match fmt {
                LogFormat::Json => {
                    builder.format(|buf, record| {
                        use std::io::Write;
                        let ts = chrono::Local::now().to_rfc3339();
                        let obj = serde_json::json!({
                            "ts": ts,
                            "level": record.level().to_string(),
                            "target": record.target(),
                            "msg": record.args().to_string(),
                        });
                        writeln!(buf, "{}", obj)
                    });
                }
                LogFormat::Text => {
                    builder.format(|buf, record| {
                        use std::io::Write;
                        let ts = chrono::Local::now().format("%H:%M:%S");
                        writeln!(buf, "[{:<5} {}] {}", record.level(), ts, record.args())
                    });
                }
            }
        }
        if let Some(path) = args.log_path.as_ref() {
            match std::fs::File::create(path) {
                Ok(f) => {
                    builder.target(env_logger::Target::Pipe(Box::new(f)));
                }
                Err(e) => {
                    eprintln!("Failed to open log file {}: {}", path, e);
                }
            }
        }
        builder.init();
    }
    let term = std::env::var("TERM").unwrap_or_default();
    let no_color_env = std::env::var_os("NO_COLOR").is_some();
    let color_default = std::io::stdout().is_terminal() && !no_color_env && term != "dumb";
    let enable_color = if args.force_color { true } else { color_default && !args.no_color };
    let _ = ENABLE_COLOR.set(enable_color);

    if args.access_log.is_none() && args.error_log.is_none() && args.db_log.is_none() {
        anyhow::bail!("no log files supplied; pass at least one of --access-log, --error-log, --db-log");
    }
    let window = TimeWindow::last_days(Local::now().naive_local(), args.days);

    let mut access: Option<AccessSnapshot> = None;
    if let Some(p) = args.access_log.as_ref() {
        let text = read_lossy(p)?;
        let pb = spinner(args.progress, p);
        let mut seen = 0usize;
        let snap = AccessSnapshot::collect(
            text.lines().inspect(|_| {
                seen += 1;
                if let Some(ref pb) = pb && seen % 500 == 0 { pb.tick(); pb.set_message(format!("Scanned {seen} lines")); }
            }),
            &window,
        );
        if let Some(pb) = pb { pb.finish_and_clear(); }
        log::info!("{}: {} lines scanned, {} matched", p.display(), snap.lines_scanned, snap.lines_matched);
        access = Some(snap);
    }
    let mut apache: Option<ApacheSnapshot> = None;
    if let Some(p) = args.error_log.as_ref() {
        let text = read_lossy(p)?;
        let pb = spinner(args.progress, p);
        let mut seen = 0usize;
        let snap = ApacheSnapshot::collect(
            text.lines().inspect(|_| {
                seen += 1;
                if let Some(ref pb) = pb && seen % 500 == 0 { pb.tick(); pb.set_message(format!("Scanned {seen} lines")); }
            }),
            &window,
        );
        if let Some(pb) = pb { pb.finish_and_clear(); }
        log::info!("{}: {} lines scanned, {} matched", p.display(), snap.lines_scanned, snap.lines_matched);
        apache = Some(snap);
    }
    let mut db: Option<DbSnapshot> = None;
    if let Some(p) = args.db_log.as_ref() {
        let text = read_lossy(p)?;
        let pb = spinner(args.progress, p);
        let mut seen = 0usize;
        let snap = DbSnapshot::collect(text.lines().inspect(|_| {
            seen += 1;
            if let Some(ref pb) = pb && seen % 500 == 0 { pb.tick(); pb.set_message(format!("Scanned {seen} lines")); }
        }));
        if let Some(pb) = pb { pb.finish_and_clear(); }
        log::info!("{}: {} lines scanned, {} matched", p.display(), snap.lines_scanned, snap.lines_matched);
        db = Some(snap);
    }

    let findings = insight::generate(access.as_ref(), apache.as_ref(), db.as_ref());
    let rep = AnalysisReport {
        days: args.days,
        access: access.as_ref().map(AccessReport::from_snapshot),
        apache: apache.as_ref().map(ApacheReport::from_snapshot),
        db: db.as_ref().map(DbReport::from_snapshot),
        findings,
    };

    match args.output {
        OutputFmt::Text => print_report(&rep, args.summary_only),
        OutputFmt::Json => println!("{}", serde_json::to_string_pretty(&rep)?),
    }
    if let Some(path) = args.json_path.as_ref() {
        std::fs::write(path, serde_json::to_string_pretty(&rep)?)
            .with_context(|| format!("write {path}"))?;
    }
    if let Some(dir) = args.csv_dir.as_ref() {
        rep.export_csv(Path::new(dir))?;
    }
    if let Some(dir) = args.xlsx_dir.as_ref() {
        rep.export_xlsx(Path::new(dir))?;
    }
    if let Some(path) = args.md_path.as_ref() {
        std::fs::write(path, markdown::render_markdown(&rep))
            .with_context(|| format!("write {path}"))?;
    }
    Ok(())
}

fn apply_config(args: &mut Args, cfg: AppConfig) {
    if args.access_log.is_none() && let Some(v) = cfg.access_log { args.access_log = Some(PathBuf::from(v)); }
    if args.error_log.is_none() && let Some(v) = cfg.error_log { args.error_log = Some(PathBuf::from(v)); }
    if args.db_log.is_none() && let Some(v) = cfg.db_log { args.db_log = Some(PathBuf::from(v)); }
    if args.days == 7 && let Some(v) = cfg.days {
        if (1..=365).contains(&v) { args.days = v; } else { log::warn!("Ignoring out-of-range days value in config: {}", v); }
    }
    if let Some(v) = cfg.output { args.output = v; }
    if args.json_path.is_none() && let Some(v) = cfg.json_path { args.json_path = Some(v); }
    if args.csv_dir.is_none() && let Some(v) = cfg.csv_dir { args.csv_dir = Some(v); }
    if args.xlsx_dir.is_none() && let Some(v) = cfg.xlsx_dir { args.xlsx_dir = Some(v); }
    if args.md_path.is_none() && let Some(v) = cfg.md_path { args.md_path = Some(v); }
    if let Some(v) = cfg.summary_only { args.summary_only = v; }
    if let Some(v) = cfg.progress { args.progress = v; }
    if let Some(v) = cfg.force_color { args.force_color = v; }
    if let Some(v) = cfg.log_format { args.log_format = Some(v); }
    if args.log_path.is_none() && let Some(v) = cfg.log_path { args.log_path = Some(v); }
}

/// Uploaded logs are treated as byte streams; invalid sequences are replaced
/// rather than failing the run.
fn read_lossy(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn spinner(progress: bool, path: &Path) -> Option<indicatif::ProgressBar> {
    if !progress { return None; }
    let pb = indicatif::ProgressBar::new_spinner();
    pb.set_message(format!("Scanning {}", path.display()));
    Some(pb)
}

fn print_report(rep: &AnalysisReport, summary_only: bool) {
    println!("{}", paint(&format!("Window: last {} days", rep.days), "1;36"));
    if let Some(a) = rep.access.as_ref() {
        println!();
        println!("{}", paint("Access Log", "1;36"));
        println!("Scanned {} lines, matched {}, {} in window", a.lines_scanned, a.lines_matched, a.lines_included);
        if a.lines_matched == 0 {
            println!("{}", paint(&format!("(no recognizable {} lines found)", LogFamily::Access.label()), "2"));
        } else if !summary_only {
            print_table(&a.status_counts);
            print_table(&a.top_endpoints);
            print_table(&a.top_error_endpoints);
            print_table(&a.top_ips);
            print_table(&a.error_trend);
        }
        if let Some((hour, count)) = a.busiest_hour.as_ref() {
            println!("{} {} ({} requests)", paint("Busiest hour:", "1"), hour, count);
        }
    }
    if let Some(a) = rep.apache.as_ref() {
        println!();
        println!("{}", paint("Apache Error Log", "1;36"));
        println!("Scanned {} lines, matched {}", a.lines_scanned, a.lines_matched);
        if a.lines_matched == 0 {
            println!("{}", paint(&format!("(no recognizable {} lines found)", LogFamily::AppError.label()), "2"));
        } else if !summary_only {
            print_table(&a.message_counts);
            print_level_table(&a.level_counts);
            print_table(&a.error_trend);
        }
    }
    if let Some(d) = rep.db.as_ref() {
        println!();
        println!("{}", paint("MySQL Error Log", "1;36"));
        println!("Scanned {} lines, matched {}", d.lines_scanned, d.lines_matched);
        if d.lines_matched == 0 {
            println!("{}", paint(&format!("(no recognizable {} lines found)", LogFamily::DbError.label()), "2"));
        } else if !summary_only {
            print_table(&d.message_counts);
        }
    }
    println!();
    println!("{}", paint("Findings:", "1"));
    if rep.findings.is_empty() {
        println!("None");
    } else {
        for f in &rep.findings {
            println!("• {}", paint(&f.message, tier_code(f.tier)));
        }
    }
}

fn print_table(t: &StatTable) {
    if t.is_empty() { return; }
    println!("{}", paint(&t.name, "1"));
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![paint(&t.columns[0], "1"), paint(&t.columns[1], "1")]);
    for (key, count) in &t.rows {
        table.add_row(vec![key.clone(), count.to_string()]);
    }
    println!("{}", table);
}

/// Level distribution with an inline bar, since chart rendering lives outside
/// this tool.
fn print_level_table(t: &StatTable) {
    if t.is_empty() { return; }
    println!("{}", paint(&t.name, "1"));
    let max = t.rows.iter().map(|(_, c)| *c).max().unwrap_or(1);
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![paint(&t.columns[0], "1"), paint(&t.columns[1], "1"), paint("Share", "1")]);
    for (key, count) in &t.rows {
        table.add_row(vec![key.clone(), count.to_string(), bar(*count as usize, max as usize, 20)]);
    }
    println!("{}", table);
}

fn bar(v: usize, max: usize, width: usize) -> String {
    if max == 0 { return String::new(); }
    let filled = ((v as f64 / max as f64) * width as f64).round() as usize;
    let mut s = String::new();
    for _ in 0..filled { s.push('█'); }
    s
}

fn paint(s: &str, code: &str) -> String {
    if *ENABLE_COLOR.get().unwrap_or(&false) { format!("\x1b[{}m{}\x1b[0m", code, s) } else { s.to_string() }
}

fn tier_code(tier: Tier) -> &'static str {
    match tier { Tier::Alert => "1;31", Tier::Nominal => "32" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fixed_window(y: i32, mo: u32, d: u32, days: i64) -> TimeWindow {
        let now = NaiveDate::from_ymd_opt(y, mo, d).unwrap().and_hms_opt(12, 0, 0).unwrap();
        TimeWindow::last_days(now, days)
    }

    #[test]
    fn config_fills_only_unset_fields() {
        let mut args = Args { days: 30, ..Default::default() };
        let cfg: AppConfig = toml::from_str(
            "access_log = \"a.log\"\ndays = 90\nsummary_only = true\n",
        )
        .unwrap();
        apply_config(&mut args, cfg);
        assert_eq!(args.access_log, Some(PathBuf::from("a.log")));
        // CLI already set a non-default days value, config must not win
        assert_eq!(args.days, 30);
        assert!(args.summary_only);
    }

    #[test]
    fn config_rejects_out_of_range_days() {
        let mut args = Args::default();
        let cfg: AppConfig = toml::from_str("days = 1000\n").unwrap();
        apply_config(&mut args, cfg);
        assert_eq!(args.days, 7);
    }

    #[test]
    fn end_to_end_access_scenario() {
        let line = r#"127.0.0.1 - - [10/Oct/2023:13:55:36 -0700] "GET /index.html HTTP/1.0" 404 2326"#;
        let snap = AccessSnapshot::collect([line], &fixed_window(2023, 10, 11, 7));
        assert_eq!(snap.status_counts.rows(), vec![("HTTP 404".to_string(), 1)]);
        assert_eq!(snap.path_error_counts.rows(), vec![("/index.html".to_string(), 1)]);
        let findings = insight::generate(Some(&snap), None, None);
        assert!(findings.iter().any(|f| f.message.contains("1 HTTP 404")));
    }

    #[test]
    fn end_to_end_db_scenario() {
        let snap = DbSnapshot::collect([
            "2023-10-10T08:00:00.000000Z 5 [Warning] InnoDB: Resizing buffer pool",
        ]);
        assert_eq!(snap.message_counts.rows(), vec![("[WARNING] InnoDB".to_string(), 1)]);
        let findings = insight::generate(None, None, Some(&snap));
        assert!(findings.iter().any(|f| f.message.contains("tablespace")));
    }

    #[test]
    fn lossy_decode_never_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.log");
        let mut bytes = br#"127.0.0.1 - - [10/Oct/2023:13:55:36 -0700] "GET /ok HTTP/1.0" 200 1"#.to_vec();
        bytes.extend_from_slice(b"\n\xff\xfe broken bytes\n");
        std::fs::write(&path, &bytes).unwrap();
        let text = read_lossy(&path).unwrap();
        let snap = AccessSnapshot::collect(text.lines(), &fixed_window(2023, 10, 11, 7));
        assert_eq!(snap.lines_matched, 1);
        assert_eq!(snap.status_counts.get("HTTP 200"), 1);
    }

    #[test]
    fn report_serializes_to_json() {
        let snap = AccessSnapshot::collect(
            [r#"1.1.1.1 - - [10/Oct/2023:13:00:00 +0000] "GET / HTTP/1.0" 200 1"#],
            &fixed_window(2023, 10, 11, 7),
        );
        let rep = AnalysisReport {
            days: 7,
            access: Some(AccessReport::from_snapshot(&snap)),
            apache: None,
            db: None,
            findings: insight::generate(Some(&snap), None, None),
        };
        let json = serde_json::to_string(&rep).unwrap();
        assert!(json.contains("AccessLogStats"));
        assert!(json.contains("HTTP 200"));
    }
}
