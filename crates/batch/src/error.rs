//! Error types for external tool invocations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while running ffprobe or ffmpeg.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The binary could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran but exited unsuccessfully.
    #[error("{program} exited with code {}: {stderr}", exit_label(.code))]
    NonZeroExit {
        program: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    /// The tool output could not be interpreted.
    #[error("unparseable output: {reason}")]
    Parse { reason: String },

    /// The run was interrupted while the tool was active.
    #[error("interrupted")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "none".to_string(),
    }
}

/// Keep only the last `max_lines` lines of collaborator diagnostics.
pub(crate) fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
