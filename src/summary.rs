//! Human-readable profile summary printed by the launcher

use std::fmt::Write as _;

use crate::event::EventKind;
use crate::profile::ProfileAggregate;

/// Lines shown in the per-line table
const TOP_LINES: usize = 10;

/// Render the summary tables for a profile
pub fn render_summary(profile: &ProfileAggregate) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "╔════════════════════════════════════════════════════════════════════════════════╗");
    let _ = writeln!(out, "║  Memory Profile: {:<62}║", truncate(profile.program_name(), 62));
    let _ = writeln!(out, "╚════════════════════════════════════════════════════════════════════════════════╝");
    let _ = writeln!(out);

    if profile.total_events() == 0 {
        let _ = writeln!(out, "No events recorded.");
        return out;
    }

    let _ = writeln!(
        out,
        "Events: {} (line {}, call {}, return {}, exception {})",
        profile.total_events(),
        profile.count_kind(EventKind::Line),
        profile.count_kind(EventKind::Call),
        profile.count_kind(EventKind::Return),
        profile.count_kind(EventKind::Exception),
    );
    match profile.peak() {
        Some(peak) => {
            let _ = writeln!(
                out,
                "Peak RSS: {:.3} MiB (+{:.3} MiB) at line {} in {}",
                peak.rss_mb, peak.rss_delta_mb, peak.line, peak.function
            );
        }
        None => {
            let _ = writeln!(out, "Peak RSS: unavailable");
        }
    }
    let _ = writeln!(out);

    let mut lines: Vec<_> = profile.line_maxima().into_iter().collect();
    lines.sort_by(|a, b| b.1.rss_mb.total_cmp(&a.1.rss_mb).then(a.0.cmp(&b.0)));

    let _ = writeln!(out, "{:<10} {:>14} {:>10}", "Line", "Max RSS (MiB)", "Hits");
    let _ = writeln!(out, "{}", "─".repeat(36));
    for (line, max) in lines.iter().take(TOP_LINES) {
        let _ = writeln!(out, "{:<10} {:>14.3} {:>10}", line, max.rss_mb, max.hits);
    }
    let _ = writeln!(out, "{}", "─".repeat(36));
    let _ = writeln!(out);

    let mut functions: Vec<_> = profile.function_counts().into_iter().collect();
    functions.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    let _ = writeln!(out, "{:<50} {:>10}", "Function", "Events");
    let _ = writeln!(out, "{}", "─".repeat(61));
    for (function, count) in functions {
        let _ = writeln!(out, "{:<50} {:>10}", truncate(function, 50), count);
    }
    let _ = writeln!(out, "{}", "─".repeat(61));
    out
}

/// Print the summary to stderr
pub fn print_summary(profile: &ProfileAggregate) {
    eprintln!();
    eprint!("{}", render_summary(profile));
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut short: String = s.chars().take(max - 1).collect();
        short.push('…');
        short
    }
}
