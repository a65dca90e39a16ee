use std::ffi::OsString;
use std::path::Path;
use log::debug;
use crate::error::ToolError;
use crate::report::Reporter;
use crate::toolkit::MediaToolkit;

/// Codec names that count as HEVC, matched as case-insensitive substrings
pub const TARGET_CODEC_ALIASES: &[&str] = &["hevc", "h265"];

/// Arguments asking ffprobe for the first video stream's codec name only
pub fn probe_args(file_path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-v", "error", "-select_streams", "v:0", "-show_entries", "stream=codec_name", "-of", "csv=p=0"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(file_path.as_os_str().to_os_string());
    args
}

/// Extract the codec token from ffprobe's csv output
pub fn parse_codec_output(stdout: &str) -> Result<String, ToolError> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        // csv output may carry a trailing separator on some builds
        .map(|line| line.trim_end_matches(',').to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ToolError::parse("ffprobe reported no video stream codec"))
}

/// Whether a codec token names the target codec
pub fn is_target_codec(codec: &str) -> bool {
    let lower = codec.to_lowercase();
    TARGET_CODEC_ALIASES.iter().any(|alias| lower.contains(alias))
}

/// Outcome of probing one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecDecision {
    /// Already encoded with the target codec
    Target { codec: String },
    /// Encoded with some other codec
    Other { codec: String },
    /// The prober could not classify the file
    ProbeFailed { reason: String },
}

impl CodecDecision {
    pub fn from_codec(codec: String) -> Self {
        if is_target_codec(&codec) {
            CodecDecision::Target { codec }
        } else {
            CodecDecision::Other { codec }
        }
    }

    pub fn is_target_codec(&self) -> bool {
        matches!(self, CodecDecision::Target { .. })
    }

    pub fn probe_failed(&self) -> bool {
        matches!(self, CodecDecision::ProbeFailed { .. })
    }
}

/// Probe `file_path` and classify it.
///
/// Never fails: every prober fault is logged through `reporter` and turned
/// into `CodecDecision::ProbeFailed`.
pub async fn classify(toolkit: &dyn MediaToolkit, reporter: &dyn Reporter, file_path: &Path) -> CodecDecision {
    match toolkit.probe_codec(file_path).await {
        Ok(codec) => {
            debug!("{}: video codec {}", file_path.display(), codec);
            CodecDecision::from_codec(codec)
        }
        Err(e) => {
            reporter.error(&format!("Error checking file: {}", file_path.display()));
            reporter.error(&e.to_string());
            CodecDecision::ProbeFailed { reason: e.to_string() }
        }
    }
}
