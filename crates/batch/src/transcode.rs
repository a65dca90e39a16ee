use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use humansize::{format_size, DECIMAL};
use log::{debug, warn};
use tokio_util::sync::CancellationToken;
use crate::report::Reporter;
use crate::toolkit::MediaToolkit;

/// Container extension of every encoded output
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Marker placed between the input file name and extension of in-progress outputs
const TEMP_MARKER: &str = "hevc-tmp";

fn has_output_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(OUTPUT_EXTENSION))
        .unwrap_or(false)
}

/// `path` with `suffix` appended to its full file name
fn with_name_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Final output path: same directory and stem, canonical extension.
///
/// An input that already carries the output extension (in any case) is
/// its own output and gets re-encoded in place.
pub fn output_path_for(input: &Path) -> PathBuf {
    if has_output_extension(input) {
        return input.to_path_buf();
    }
    input.with_extension(OUTPUT_EXTENSION)
}

/// Output used when the plain output name belongs to another file
/// (`a.mkv` -> `a.mkv.mp4`)
pub fn fallback_output_for(input: &Path) -> PathBuf {
    with_name_suffix(input, &format!(".{}", OUTPUT_EXTENSION))
}

/// Sibling path the encoder writes to before the output is verified.
///
/// Built from the full input file name, so distinct inputs never share one.
pub fn temp_output_for(input: &Path) -> PathBuf {
    with_name_suffix(input, &format!(".{}.{}", TEMP_MARKER, OUTPUT_EXTENSION))
}

/// Whether `path` is an in-progress (or abandoned) encoder output
pub fn is_temp_output(path: &Path) -> bool {
    let suffix = format!(".{}.{}", TEMP_MARKER, OUTPUT_EXTENSION);
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase().ends_with(&suffix))
        .unwrap_or(false)
}

/// One input paired with where its encode lands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub temp_output: PathBuf,
}

impl TranscodeJob {
    pub fn new(input: &Path) -> Self {
        Self::with_output(input, output_path_for(input))
    }

    pub fn with_output(input: &Path, output: PathBuf) -> Self {
        Self {
            input: input.to_path_buf(),
            output,
            temp_output: temp_output_for(input),
        }
    }

    /// The encode replaces the input file itself (an `.mp4` input)
    pub fn replaces_input(&self) -> bool {
        self.input == self.output
    }

    /// Some other file already sits at the output path
    fn output_taken(&self) -> bool {
        !self.replaces_input() && self.output.symlink_metadata().is_ok()
    }
}

/// Give every input an output path no other input uses.
///
/// Every input owns its own path. An input keeps its plain output name
/// unless another input owns it or an earlier input already claimed it; it
/// then falls back to [`fallback_output_for`]. `None` marks an input for
/// which both names are taken.
pub fn plan_jobs(inputs: &[PathBuf]) -> Vec<Option<TranscodeJob>> {
    let mut claimed: HashSet<PathBuf> = inputs.iter().cloned().collect();

    inputs
        .iter()
        .map(|input| {
            let job = TranscodeJob::new(input);
            if job.replaces_input() {
                return Some(job);
            }
            [job.output, fallback_output_for(input)]
                .into_iter()
                .find(|candidate| claimed.insert(candidate.clone()))
                .map(|output| TranscodeJob::with_output(input, output))
        })
        .collect()
}

/// Result of transcoding one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    /// Output written, verified and moved into place
    Encoded { output: PathBuf, bytes: u64 },
    /// Encoder failed or produced nothing usable; no output was kept
    Failed { output: PathBuf, reason: String },
    /// Interrupted; the partial output was discarded
    Cancelled,
}

/// Check the encoder's temp output and move it onto the final path
fn finalize(job: &TranscodeJob) -> Result<u64> {
    let meta = std::fs::metadata(&job.temp_output)
        .with_context(|| format!("Encoder produced no output at {}", job.temp_output.display()))?;
    if meta.len() == 0 {
        anyhow::bail!("Encoder produced an empty file at {}", job.temp_output.display());
    }
    if job.output_taken() {
        anyhow::bail!("Refusing to replace {}, which appeared during the encode", job.output.display());
    }

    std::fs::rename(&job.temp_output, &job.output).with_context(|| {
        format!(
            "Failed to move {} to {}",
            job.temp_output.display(),
            job.output.display()
        )
    })?;

    Ok(meta.len())
}

fn remove_temp(job: &TranscodeJob) {
    match std::fs::remove_file(&job.temp_output) {
        Ok(()) => debug!("Removed temp output {}", job.temp_output.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove temp output {}: {}", job.temp_output.display(), e),
    }
}

fn failed(reporter: &dyn Reporter, job: &TranscodeJob, reason: String) -> TranscodeOutcome {
    reporter.error(&format!("Error during transcoding {}: {}", job.input.display(), reason));
    TranscodeOutcome::Failed {
        output: job.output.clone(),
        reason,
    }
}

/// Run `job`, transcoding its input to HEVC next to itself.
///
/// The encoder writes to a temp sibling, so the input is never overwritten
/// while it is still being read. Only a non-empty output replaces the final
/// path, and only when that path is free or is the input itself. Failures
/// are reported and returned, never propagated.
pub async fn transcode(
    toolkit: &dyn MediaToolkit,
    reporter: &dyn Reporter,
    job: &TranscodeJob,
    cancel: &CancellationToken,
) -> TranscodeOutcome {
    if job.output_taken() {
        return failed(
            reporter,
            job,
            format!("{} already exists and belongs to another file", job.output.display()),
        );
    }

    debug!("Encoding {} -> {}", job.input.display(), job.temp_output.display());

    match toolkit.encode(&job.input, &job.temp_output, cancel).await {
        Ok(_) => match finalize(job) {
            Ok(bytes) => {
                reporter.info(&format!(
                    "Encoded {} -> {} ({})",
                    job.input.display(),
                    job.output.display(),
                    format_size(bytes, DECIMAL)
                ));
                TranscodeOutcome::Encoded {
                    output: job.output.clone(),
                    bytes,
                }
            }
            Err(e) => {
                remove_temp(job);
                failed(reporter, job, format!("{:#}", e))
            }
        },
        Err(e) if e.is_cancelled() => {
            remove_temp(job);
            TranscodeOutcome::Cancelled
        }
        Err(e) => {
            remove_temp(job);
            failed(reporter, job, e.to_string())
        }
    }
}
