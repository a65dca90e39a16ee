use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{ProbeFailurePolicy, TranscodeConfig};
use crate::ffprobe;
use crate::report::{self, ProgressEvent, Reporter};
use crate::scan::{self, VideoFile};
use crate::toolkit::MediaToolkit;
use crate::transcode::{self, TranscodeJob, TranscodeOutcome, OUTPUT_EXTENSION};

/// Counters for one batch run
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRun {
    /// Video files discovered
    pub total: usize,
    /// Files fully handled before the run ended
    pub processed: usize,
    /// Already HEVC, left alone
    pub compliant: usize,
    /// Judged not HEVC (including probe failures under the transcode policy)
    pub non_compliant: usize,
    pub probe_failures: usize,
    /// Skipped because a converted HEVC copy sits next to them
    pub already_converted: usize,
    /// Skipped because every output name they could use belongs to another file
    pub output_conflicts: usize,
    /// Encodes that produced a verified output
    pub encoded: usize,
    pub failed: usize,
    pub interrupted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchRun {
    pub fn new() -> Self {
        Self {
            total: 0,
            processed: 0,
            compliant: 0,
            non_compliant: 0,
            probe_failures: 0,
            already_converted: 0,
            output_conflicts: 0,
            encoded: 0,
            failed: 0,
            interrupted: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn elapsed_secs(&self) -> i64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_seconds()
    }

    fn record(&mut self, verdict: FileVerdict) {
        match verdict {
            FileVerdict::Compliant => {
                self.processed += 1;
                self.compliant += 1;
            }
            FileVerdict::AlreadyConverted => {
                self.processed += 1;
                self.already_converted += 1;
            }
            FileVerdict::UnprobedSkipped => {
                self.processed += 1;
                self.probe_failures += 1;
            }
            FileVerdict::OutputConflict { probe_failed } => {
                self.processed += 1;
                self.output_conflicts += 1;
                if probe_failed {
                    self.probe_failures += 1;
                }
            }
            FileVerdict::NonCompliant { probe_failed, outcome } => {
                self.processed += 1;
                self.non_compliant += 1;
                if probe_failed {
                    self.probe_failures += 1;
                }
                match outcome {
                    Some(TranscodeOutcome::Encoded { .. }) => self.encoded += 1,
                    Some(TranscodeOutcome::Failed { .. }) => self.failed += 1,
                    Some(TranscodeOutcome::Cancelled) => self.interrupted = true,
                    None => {}
                }
            }
            FileVerdict::Interrupted => self.interrupted = true,
        }
    }
}

impl Default for BatchRun {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to a single file
#[derive(Debug, Clone, PartialEq)]
enum FileVerdict {
    Compliant,
    AlreadyConverted,
    /// Probe failed and policy says leave it alone
    UnprobedSkipped,
    /// Needs transcoding but has no output name of its own
    OutputConflict { probe_failed: bool },
    /// Counted for transcoding; `outcome` is `None` in a dry run
    NonCompliant {
        probe_failed: bool,
        outcome: Option<TranscodeOutcome>,
    },
    /// Cancellation was observed before the file was finished
    Interrupted,
}

/// One discovered file with its 1-based position and planned job
struct WorkItem {
    index: usize,
    file: VideoFile,
    /// `None` when no output name is free for this file
    job: Option<TranscodeJob>,
}

/// Bundle files whose plain output names coincide.
///
/// A group runs on one worker, in order, so a file's converted-copy check
/// never races an in-place encode of its sibling. Within a group the file
/// that already has the output extension goes last. Groups keep discovery
/// order by their first member.
fn group_by_output(files: Vec<VideoFile>) -> Vec<Vec<WorkItem>> {
    let paths: Vec<PathBuf> = files.iter().map(|f| f.path().to_path_buf()).collect();
    let jobs = transcode::plan_jobs(&paths);

    let mut groups: Vec<Vec<WorkItem>> = Vec::new();
    let mut by_output: HashMap<PathBuf, usize> = HashMap::new();
    for (i, (file, job)) in files.into_iter().zip(jobs).enumerate() {
        let key = transcode::output_path_for(file.path());
        let slot = *by_output.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(WorkItem { index: i + 1, file, job });
    }

    for group in &mut groups {
        group.sort_by_key(|item| item.file.extension == OUTPUT_EXTENSION);
    }
    groups
}

/// Everything a worker needs to handle one file
struct FileContext {
    toolkit: Arc<dyn MediaToolkit>,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
    probe_failure_policy: ProbeFailurePolicy,
    skip_converted: bool,
    dry_run: bool,
    total: usize,
    /// Outputs this run has started writing
    written: Mutex<HashSet<PathBuf>>,
}

impl FileContext {
    fn written_this_run(&self, path: &Path) -> bool {
        self.written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(path)
    }

    fn mark_written(&self, path: &Path) {
        self.written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(path.to_path_buf());
    }

    /// Whether a converted copy of `file` from an earlier run exists and is
    /// already HEVC. Outputs written during this run do not count.
    async fn has_converted_sibling(&self, file: &VideoFile) -> bool {
        if !self.skip_converted || file.extension == OUTPUT_EXTENSION {
            return false;
        }

        let candidates = [
            transcode::output_path_for(file.path()),
            transcode::fallback_output_for(file.path()),
        ];
        for sibling in candidates {
            if !sibling.is_file() || self.written_this_run(&sibling) {
                continue;
            }
            match self.toolkit.probe_codec(&sibling).await {
                Ok(codec) if ffprobe::is_target_codec(&codec) => return true,
                Ok(codec) => debug!("{} is {}, not a converted copy", sibling.display(), codec),
                Err(e) => debug!("Could not probe converted copy {}: {}", sibling.display(), e),
            }
        }
        false
    }

    async fn process(&self, item: &WorkItem) -> FileVerdict {
        let file = &item.file;
        if self.cancel.is_cancelled() {
            return FileVerdict::Interrupted;
        }

        self.reporter.progress(&ProgressEvent::Checking {
            index: item.index,
            total: self.total,
            path: file.path().to_path_buf(),
        });

        let decision = ffprobe::classify(self.toolkit.as_ref(), self.reporter.as_ref(), file.path()).await;
        if decision.is_target_codec() {
            return FileVerdict::Compliant;
        }
        let probe_failed = decision.probe_failed();
        if probe_failed && self.probe_failure_policy == ProbeFailurePolicy::Skip {
            return FileVerdict::UnprobedSkipped;
        }

        if self.has_converted_sibling(file).await {
            debug!("{} already has an HEVC copy", file.path().display());
            return FileVerdict::AlreadyConverted;
        }

        let Some(job) = &item.job else {
            self.reporter.warn(&format!(
                "Skipping {}: both {} and {} belong to other files",
                file.path().display(),
                transcode::output_path_for(file.path()).display(),
                transcode::fallback_output_for(file.path()).display()
            ));
            return FileVerdict::OutputConflict { probe_failed };
        };

        if self.dry_run {
            return FileVerdict::NonCompliant { probe_failed, outcome: None };
        }

        if self.cancel.is_cancelled() {
            return FileVerdict::Interrupted;
        }

        if job.output != transcode::output_path_for(file.path()) {
            self.reporter.info(&format!(
                "{} is taken by another file; writing {} instead",
                transcode::output_path_for(file.path()).display(),
                job.output.display()
            ));
        }

        self.reporter.progress(&ProgressEvent::Transcoding {
            index: item.index,
            total: self.total,
            path: file.path().to_path_buf(),
        });

        self.mark_written(&job.output);
        match transcode::transcode(self.toolkit.as_ref(), self.reporter.as_ref(), job, &self.cancel).await {
            TranscodeOutcome::Cancelled => FileVerdict::Interrupted,
            outcome => FileVerdict::NonCompliant {
                probe_failed,
                outcome: Some(outcome),
            },
        }
    }

    /// Handle a group's files in order, stopping at an interrupt
    async fn process_group(&self, group: &[WorkItem]) -> Vec<FileVerdict> {
        let mut verdicts = Vec::with_capacity(group.len());
        for item in group {
            let verdict = self.process(item).await;
            let stop = verdict == FileVerdict::Interrupted;
            verdicts.push(verdict);
            if stop {
                break;
            }
        }
        verdicts
    }
}

/// Drives discovery, probing and transcoding for one directory tree
pub struct BatchOrchestrator {
    config: TranscodeConfig,
    toolkit: Arc<dyn MediaToolkit>,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
}

impl BatchOrchestrator {
    pub fn new(config: TranscodeConfig, toolkit: Arc<dyn MediaToolkit>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            config,
            toolkit,
            reporter,
            cancel: CancellationToken::new(),
        }
    }

    /// Builder: attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the batch over `target_dir`.
    ///
    /// Only discovery errors are returned; per-file failures are reported and
    /// counted. Cancellation ends the run early with `interrupted` set and a
    /// partial summary.
    pub async fn run(&self, target_dir: &Path, dry_run: bool) -> Result<BatchRun> {
        let mut run = BatchRun::new();

        let files = scan::discover_videos(target_dir, &self.config.video_extensions)
            .with_context(|| format!("Failed to scan {}", target_dir.display()))?;
        run.total = files.len();

        self.reporter.info(&format!("Total files found: {}", run.total));
        if dry_run {
            self.reporter.info("Calculating files to be transcoded...");
        }

        let ctx = Arc::new(FileContext {
            toolkit: self.toolkit.clone(),
            reporter: self.reporter.clone(),
            cancel: self.cancel.clone(),
            probe_failure_policy: self.config.probe_failure_policy,
            skip_converted: self.config.skip_converted,
            dry_run,
            total: run.total,
            written: Mutex::new(HashSet::new()),
        });

        let groups = group_by_output(files);
        if self.config.workers <= 1 {
            self.run_sequential(&ctx, &groups, &mut run).await;
        } else {
            self.run_concurrent(&ctx, groups, &mut run).await?;
        }

        if self.cancel.is_cancelled() {
            run.interrupted = true;
        }
        run.finished_at = Some(Utc::now());
        report::report_summary(self.reporter.as_ref(), &run, dry_run);

        Ok(run)
    }

    async fn run_sequential(&self, ctx: &FileContext, groups: &[Vec<WorkItem>], run: &mut BatchRun) {
        for item in groups.iter().flatten() {
            if self.cancel.is_cancelled() {
                run.interrupted = true;
                break;
            }
            run.record(ctx.process(item).await);
            if run.interrupted {
                break;
            }
        }
    }

    /// Bounded worker pool, one task per output group. The file list is
    /// already complete; only this task touches `run`, fed by the finished
    /// workers.
    async fn run_concurrent(&self, ctx: &Arc<FileContext>, groups: Vec<Vec<WorkItem>>, run: &mut BatchRun) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks = JoinSet::new();

        for group in groups {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => permit.context("worker pool closed")?,
            };

            let ctx = ctx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                ctx.process_group(&group).await
            });
        }

        // In-flight encoders observe the same token and are killed, not orphaned
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(verdicts) => verdicts.into_iter().for_each(|v| run.record(v)),
                Err(e) => self.reporter.error(&format!("Worker task failed: {}", e)),
            }
        }

        Ok(())
    }
}
