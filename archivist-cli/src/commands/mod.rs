pub mod archive;
pub mod container;
pub mod replica;

use std::io::{self, Write};

use colored::Colorize;

use archivist_sync::{ProgressSink, SyncReport};

/// Streams engine output to the terminal as it arrives; stderr lines are
/// highlighted.
pub struct TerminalSink;

impl ProgressSink for TerminalSink {
    fn on_output_line(&mut self, line: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(line.as_bytes())?;
        out.flush()
    }

    fn on_error_line(&mut self, line: &str) -> io::Result<()> {
        let text = line.strip_suffix('\n').unwrap_or(line);
        let mut err = io::stderr().lock();
        write!(err, "{}", text.yellow())?;
        if text.len() != line.len() {
            writeln!(err)?;
        }
        err.flush()
    }
}

pub fn print_sync_report(report: &SyncReport) {
    let siblings = match report.siblings.len() {
        0 => "no reachable siblings".to_string(),
        1 => "1 sibling".to_string(),
        n => format!("{n} siblings"),
    };
    println!(
        "{} '{}' synced with {siblings} ({} committed)",
        "✓".green(),
        report.replica,
        report.committed.len()
    );
    for sibling in &report.siblings {
        println!("    - {sibling}");
    }
    for link in &report.stale_links {
        println!(
            "{}",
            format!("  ! link {link} could not be removed; remove it with `git remote remove {link}`")
                .yellow()
        );
    }
}
