//! Plain-text rendition of the dashboard for the `report` command.

use std::fmt::Write;

use super::analytics::Table;
use super::view::DashboardView;

const TEXT_WIDTH: usize = 80;
const REPORT_ROWS: usize = 10;

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let mut out: String = value.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

fn write_table(out: &mut String, table: &Table, limit: usize) {
    let _ = writeln!(out, "  {}", table.columns.join(" | "));
    for row in table.rows.iter().take(limit) {
        let cells: Vec<String> = row.iter().map(|c| truncate(c, TEXT_WIDTH)).collect();
        let _ = writeln!(out, "  {}", cells.join(" | "));
    }
    if table.rows.len() > limit {
        let _ = writeln!(out, "  … {} more", table.rows.len() - limit);
    }
}

pub fn render_report(view: &DashboardView) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Audience Pulse: {} ({})", view.dataset_name, view.selected_episode);
    let _ = writeln!(out);

    for kpi in &view.kpis {
        let _ = writeln!(out, "{:<16} {}", kpi.label, kpi.value);
    }

    let _ = writeln!(out, "\nSentiment distribution");
    for bar in &view.bars {
        let _ = writeln!(out, "  {:<10} {:>6}  {:>8}", bar.sentiment, bar.count, bar.percentage);
    }

    let _ = writeln!(out, "\nTop keywords (top {}, min length {})", view.top_n, view.min_len);
    for group in &view.keyword_groups {
        let words: Vec<String> = group.keywords.iter().map(|k| format!("{} ({})", k.keyword, k.count)).collect();
        let _ = writeln!(out, "  {:<9} {}", group.label, words.join(", "));
    }

    let _ = writeln!(out, "\nComments ({} matches)", view.explore_count);
    write_table(&mut out, &view.explore, REPORT_ROWS);
    out
}
