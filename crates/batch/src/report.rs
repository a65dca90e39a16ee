//! Progress and summary reporting.
//!
//! The orchestrator talks to a [`Reporter`] instead of the global logger so
//! that runs can be observed (and tested) without a logging backend.

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use log::Level;
use crate::batch::BatchRun;

/// Per-file progress notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// About to probe file `index` of `total` (1-based)
    Checking { index: usize, total: usize, path: PathBuf },
    /// About to encode file `index` of `total` (1-based)
    Transcoding { index: usize, total: usize, path: PathBuf },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Checking { index, total, path } => {
                write!(f, "[{}/{}] Checking {}", index, total, path.display())
            }
            ProgressEvent::Transcoding { index, total, path } => {
                write!(f, "[{}/{}] Transcoding {}", index, total, path.display())
            }
        }
    }
}

/// Severity-leveled sink for batch output
pub trait Reporter: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }

    fn progress(&self, event: &ProgressEvent) {
        self.log(Level::Info, &event.to_string());
    }
}

/// Summary line for a dry run. Never divides by zero.
pub fn dry_run_summary(run: &BatchRun) -> String {
    if run.total == 0 {
        return "No video files found; 0 files would be transcoded.".to_string();
    }
    let pct = run.non_compliant as f64 / run.total as f64 * 100.0;
    format!("{}/{} files would be transcoded ({:.2}%).", run.non_compliant, run.total, pct)
}

/// Summary line for a live run
pub fn live_summary(run: &BatchRun) -> String {
    if run.interrupted {
        return format!("Transcoded {}/{} files before interruption.", run.non_compliant, run.total);
    }
    format!("Transcoding complete. {}/{} files transcoded.", run.non_compliant, run.total)
}

/// Emit the closing lines of a run
pub fn report_summary(reporter: &dyn Reporter, run: &BatchRun, dry_run: bool) {
    if run.interrupted {
        reporter.warn("Transcoding interrupted by user.");
        reporter.warn(&format!(
            "Stopped after {} of {} files.",
            run.processed, run.total
        ));
    }

    if dry_run {
        reporter.info(&dry_run_summary(run));
    } else {
        reporter.info(&live_summary(run));
        if run.failed > 0 {
            reporter.error(&format!("{} of them failed to encode; originals were left untouched.", run.failed));
        }
    }

    if run.already_converted > 0 {
        reporter.info(&format!("{} files skipped: converted copy already present.", run.already_converted));
    }
    if run.output_conflicts > 0 {
        reporter.warn(&format!(
            "{} files skipped: every output name was taken by another file.",
            run.output_conflicts
        ));
    }
    if run.probe_failures > 0 {
        reporter.warn(&format!("{} files could not be probed.", run.probe_failures));
    }
    reporter.info(&format!("Elapsed: {}s", run.elapsed_secs()));
}

/// Reporter that forwards to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn log(&self, level: Level, message: &str) {
        log::log!(level, "{}", message);
    }
}

/// Reporter that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemoryReporter {
    messages: Mutex<Vec<(Level, String)>>,
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemoryReporter {
    pub fn messages(&self) -> Vec<(Level, String)> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn at_level(&self, level: Level) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    pub fn infos(&self) -> Vec<String> {
        self.at_level(Level::Info)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.at_level(Level::Warn)
    }

    pub fn errors(&self) -> Vec<String> {
        self.at_level(Level::Error)
    }
}

impl Reporter for MemoryReporter {
    fn log(&self, level: Level, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((level, message.to_string()));
        }
    }

    fn progress(&self, event: &ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_with(total: usize, non_compliant: usize) -> BatchRun {
        BatchRun {
            total,
            non_compliant,
            processed: total,
            ..BatchRun::new()
        }
    }

    #[test]
    fn test_dry_run_summary_percentage() {
        assert_eq!(dry_run_summary(&run_with(10, 7)), "7/10 files would be transcoded (70.00%).");
        assert_eq!(dry_run_summary(&run_with(3, 1)), "1/3 files would be transcoded (33.33%).");
        assert_eq!(dry_run_summary(&run_with(4, 0)), "0/4 files would be transcoded (0.00%).");
    }

    #[test]
    fn test_dry_run_summary_zero_files() {
        assert_eq!(dry_run_summary(&run_with(0, 0)), "No video files found; 0 files would be transcoded.");
    }

    #[test]
    fn test_live_summary() {
        assert_eq!(live_summary(&run_with(10, 7)), "Transcoding complete. 7/10 files transcoded.");
    }

    #[test]
    fn test_progress_event_display() {
        let checking = ProgressEvent::Checking { index: 2, total: 5, path: PathBuf::from("/v/a.mkv") };
        assert_eq!(checking.to_string(), "[2/5] Checking /v/a.mkv");
        let transcoding = ProgressEvent::Transcoding { index: 5, total: 5, path: PathBuf::from("b.avi") };
        assert_eq!(transcoding.to_string(), "[5/5] Transcoding b.avi");
    }

    #[test]
    fn test_interrupted_summary_warns() {
        let reporter = MemoryReporter::default();
        let mut run = run_with(10, 2);
        run.processed = 4;
        run.interrupted = true;

        report_summary(&reporter, &run, false);

        let warnings = reporter.warnings();
        assert_eq!(warnings[0], "Transcoding interrupted by user.");
        assert_eq!(warnings[1], "Stopped after 4 of 10 files.");
        let infos = reporter.infos();
        assert!(infos.contains(&"Transcoded 2/10 files before interruption.".to_string()));
        assert!(!infos.iter().any(|m| m.starts_with("Transcoding complete")));
    }

    #[test]
    fn test_output_conflicts_are_warned() {
        let reporter = MemoryReporter::default();
        let mut run = run_with(3, 1);
        run.output_conflicts = 1;

        report_summary(&reporter, &run, false);
        assert_eq!(
            reporter.warnings(),
            vec!["1 files skipped: every output name was taken by another file."]
        );
    }

    #[test]
    fn test_failed_encodes_are_reported_as_errors() {
        let reporter = MemoryReporter::default();
        let mut run = run_with(5, 3);
        run.failed = 1;

        report_summary(&reporter, &run, false);
        assert_eq!(reporter.errors().len(), 1);
        assert!(reporter.warnings().is_empty());
    }

    #[test]
    fn test_memory_reporter_levels() {
        let reporter = MemoryReporter::default();
        reporter.info("a");
        reporter.warn("b");
        reporter.error("c");
        reporter.progress(&ProgressEvent::Checking { index: 1, total: 1, path: PathBuf::from("x") });

        assert_eq!(reporter.infos(), vec!["a"]);
        assert_eq!(reporter.warnings(), vec!["b"]);
        assert_eq!(reporter.errors(), vec!["c"]);
        assert_eq!(reporter.events().len(), 1);
        assert_eq!(reporter.messages().len(), 3);
    }
}
