//! 🖨️ reporter.rs: one line per attempt, whether anybody is reading or not.
//!
//! 🎬 *[a worker finishes a query. somewhere, a terminal scrolls.]*
//!
//! Successes go to stdout, failures go to stderr, and both carry the running totals
//! so a single `tail -f` tells the whole story. If the write fails (closed pipe,
//! full disk, someone piped us into `head -1`) we shrug and keep counting. A broken
//! terminal must never change the numbers.
//!
//! 🍽️ The end-of-run summary is a comfy-table, preset NOTHING, because borders are a lifestyle.
//!
//! 🦆 quack (formatted with thousands separators)

use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use tracing::trace;

use crate::common::AttemptReport;
use crate::error::OutputError;
use crate::stats::StatsSnapshot;
use crate::supervisors::{RunSummary, StopReason};

type Output = Box<dyn Write + Send>;

/// 📣 Formats and writes the per-attempt lines. Shared by every worker.
pub struct Reporter {
    quiet: bool,
    stdout: Mutex<Output>,
    stderr: Mutex<Output>,
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // -- 🎭 Box<dyn Write> has no Debug and frankly no interest in one
        f.debug_struct("Reporter").field("quiet", &self.quiet).finish()
    }
}

impl Reporter {
    pub fn new(stdout: Output, stderr: Output, quiet: bool) -> Self {
        Self {
            quiet,
            stdout: Mutex::new(stdout),
            stderr: Mutex::new(stderr),
        }
    }

    /// 📡 The real terminal.
    pub fn stdio(quiet: bool) -> Self {
        Self::new(Box::new(io::stdout()), Box::new(io::stderr()), quiet)
    }

    /// 🤫 Writes nothing anywhere. For tests and for people who only want the summary.
    pub fn silent() -> Self {
        Self::new(Box::new(io::sink()), Box::new(io::sink()), true)
    }

    /// 🖨️ Emit one attempt's line. Never fails; output errors are swallowed here.
    pub fn report(&self, report: &AttemptReport<'_>, snapshot: &StatsSnapshot) {
        if self.quiet {
            return;
        }
        if let Err(err) = self.try_report(report, snapshot) {
            trace!("🙈 dropped a report line: {}", err);
        }
    }

    fn try_report(
        &self,
        report: &AttemptReport<'_>,
        snapshot: &StatsSnapshot,
    ) -> Result<(), OutputError> {
        let line = format_line(report, snapshot);
        let target = if report.is_success() {
            &self.stdout
        } else {
            &self.stderr
        };
        // -- 🔒 a poisoned writer is still a writer
        let mut out = target.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

/// 📜 `Query Success. Time 42ms. Result size 1,337. Runner id 3. ... | Total 9,001 in 01:02 | ...`
pub fn format_line(report: &AttemptReport<'_>, snapshot: &StatsSnapshot) -> String {
    let head = match &report.outcome {
        Ok(size) => format!(
            "Query Success. Time {}ms. Result size {}.",
            report.latency_ms,
            format_number(*size)
        ),
        Err(message) => format!("Query Failed. Time {}ms. Error: {}.", report.latency_ms, message),
    };
    format!(
        "{} Runner id {}. Entity id {}. Entity supply chain count {}. | Total {} in {} | Avg {:.0}ms | {:.2}/min | OK {:.2}% | ERR {:.2}%",
        head,
        report.worker_id,
        report.entity.id,
        report.entity.weight,
        format_number(snapshot.total),
        format_duration(snapshot.elapsed),
        snapshot.avg_latency_ms,
        snapshot.throughput_per_minute,
        snapshot.success_pct(),
        snapshot.error_pct(),
    )
}

/// 🍽️ The curtain call. Printed once after every worker has gone home.
pub fn summary_table(summary: &RunSummary) -> Table {
    let snapshot = &summary.snapshot;
    let latency_range = match summary.latency_range {
        Some((min, max)) => format!("{min}ms / {max}ms"),
        None => "--".to_string(),
    };

    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    let rows = [
        ("Attempts", format_number(snapshot.total)),
        (
            "Succeeded",
            format!("{} ({:.2}%)", format_number(snapshot.success), snapshot.success_pct()),
        ),
        (
            "Failed",
            format!("{} ({:.2}%)", format_number(snapshot.error), snapshot.error_pct()),
        ),
        ("Avg latency", format!("{:.0}ms", snapshot.avg_latency_ms)),
        ("Min / max latency", latency_range),
        ("Throughput", format!("{:.2}/min", snapshot.throughput_per_minute)),
        ("Avg result size", format_decimal(snapshot.avg_result_size, 2)),
        ("Wall time", format_duration(summary.wall_time)),
        ("Workers stopped by", stop_reason_tally(&summary.stop_reasons)),
    ];
    for (label, value) in rows {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

fn stop_reason_tally(reasons: &[StopReason]) -> String {
    let tally: Vec<String> = [
        StopReason::Deadline,
        StopReason::IterationBudget,
        StopReason::Shutdown,
    ]
    .into_iter()
    .filter_map(|reason| {
        let n = reasons.iter().filter(|r| **r == reason).count();
        (n > 0).then(|| format!("{reason} × {n}"))
    })
    .collect();
    if tally.is_empty() {
        "--".to_string()
    } else {
        tally.join(", ")
    }
}

/// 🔢 "1000000" → "1,000,000". Your eyes are welcome.
pub(crate) fn format_number(n: u64) -> String {
    group_thousands(&n.to_string())
}

/// 🔢 Same grouping, with a fixed number of decimals. Average result sizes run to five digits.
pub(crate) fn format_decimal(value: f64, places: usize) -> String {
    let fixed = format!("{value:.places$}");
    match fixed.split_once('.') {
        Some((whole, fraction)) => format!("{}.{fraction}", group_thousands(whole)),
        None => group_thousands(&fixed),
    }
}

fn group_thousands(digits: &str) -> String {
    let (sign, digits) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits),
    };
    let head = digits.len() % 3;
    let mut groups: Vec<&str> = Vec::with_capacity(digits.len() / 3 + 1);
    if head > 0 {
        groups.push(&digits[..head]);
    }
    groups.extend(
        digits.as_bytes()[head..]
            .chunks(3)
            .filter_map(|chunk| std::str::from_utf8(chunk).ok()),
    );
    format!("{sign}{}", groups.join(","))
}

/// ⏱️ Seconds with milliseconds while the run is young, so a deadline overshoot
/// of a few hundred ms is visible. MM:SS after a minute, HH:MM:SS after an hour.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    if total_secs < 60 {
        return format!("{}.{:03}s", total_secs, duration.subsec_millis());
    }
    let (hours, minutes, seconds) = (total_secs / 3600, total_secs % 3600 / 60, total_secs % 60);
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}
