use crate::insight::Tier;
use crate::report::{AnalysisReport, StatTable};

pub fn render_markdown(rep: &AnalysisReport) -> String {
    let mut s = String::new();
    s.push_str("# logdoctor Report\n\n");
    s.push_str(&format!("Window: last {} days\n\n", rep.days));

    if let Some(a) = rep.access.as_ref() {
        s.push_str("## Access Log\n");
        s.push_str(&format!(
            "- Lines: {} scanned, {} matched, {} in window\n\n",
            a.lines_scanned, a.lines_matched, a.lines_included
        ));
        push_table(&mut s, "Status Codes", &a.status_counts);
        push_table(&mut s, "Top Endpoints", &a.top_endpoints);
        push_table(&mut s, "Top Error Endpoints", &a.top_error_endpoints);
        push_table(&mut s, "Top IPs", &a.top_ips);
        push_table(&mut s, "Errors per Hour", &a.error_trend);
        match a.busiest_hour.as_ref() {
            Some((hour, count)) => {
                s.push_str(&format!("Busiest hour: {hour} ({count} requests)\n\n"));
            }
            None => s.push_str("Busiest hour: n/a\n\n"),
        }
    }

    if let Some(a) = rep.apache.as_ref() {
        s.push_str("## Apache Error Log\n");
        s.push_str(&format!(
            "- Lines: {} scanned, {} matched\n\n",
            a.lines_scanned, a.lines_matched
        ));
        push_table(&mut s, "Messages", &a.message_counts);
        push_table(&mut s, "Level Distribution", &a.level_counts);
        push_table(&mut s, "Errors per Hour", &a.error_trend);
    }

    if let Some(d) = rep.db.as_ref() {
        s.push_str("## MySQL Error Log\n");
        s.push_str(&format!(
            "- Lines: {} scanned, {} matched\n\n",
            d.lines_scanned, d.lines_matched
        ));
        push_table(&mut s, "Messages", &d.message_counts);
    }

    s.push_str("## Findings\n");
    if rep.findings.is_empty() {
        s.push_str("None\n");
    } else {
        for f in &rep.findings {
            let tag = match f.tier {
                Tier::Alert => "alert",
                Tier::Nominal => "nominal",
            };
            s.push_str(&format!("- [{}] {}\n", tag, f.message));
        }
    }
    s
}

fn push_table(s: &mut String, title: &str, table: &StatTable) {
    s.push_str(&format!("### {title}\n"));
    if table.is_empty() {
        s.push_str("None\n\n");
        return;
    }
    for (key, count) in &table.rows {
        s.push_str(&format!("- {key} ({count})\n"));
    }
    s.push('\n');
}
