use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use anyhow::{anyhow, Context, Result};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use crate::error::ToolError;

/// Fixed option profile for HEVC output.
///
/// Targets broad playback compatibility (Main profile, level 4.0, 8-bit
/// 4:2:0, at most 1080p wide, AAC stereo-friendly audio, faststart MP4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeProfile {
    pub video_encoder: &'static str,
    pub crf: u8,
    pub preset: &'static str,
    pub max_width: u32,
    pub audio_codec: &'static str,
    pub audio_bitrate_kbps: u32,
    pub faststart: bool,
    pub pixel_format: &'static str,
    pub profile: &'static str,
    pub level: &'static str,
}

pub const HEVC_PROFILE: EncodeProfile = EncodeProfile {
    video_encoder: "libx265",
    crf: 23,
    preset: "medium",
    max_width: 1920,
    audio_codec: "aac",
    audio_bitrate_kbps: 128,
    faststart: true,
    pixel_format: "yuv420p",
    profile: "main",
    level: "4.0",
};

impl EncodeProfile {
    /// Width cap that keeps aspect ratio and forces an even height
    pub fn scale_filter(&self) -> String {
        format!("scale=min(iw\\,{}):-2", self.max_width)
    }
}

/// FFmpeg version information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FFmpegVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Leading decimal digits of a version component ("1-3ubuntu5" -> 1)
fn leading_number(part: &str) -> Option<u32> {
    let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

impl FFmpegVersion {
    /// Parse version from the first line of `-version` output
    /// Example: "ffmpeg version 6.1.1-3ubuntu5" -> FFmpegVersion { major: 6, minor: 1, patch: 1 }
    pub fn parse(version_str: &str) -> Result<Self> {
        let version_part = version_str
            .split_whitespace()
            .map(|s| s.trim_start_matches('n'))
            .find(|s| s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
            .ok_or_else(|| anyhow!("No version number found in: {}", version_str))?;

        let mut parts = version_part.split('.');
        let major = parts
            .next()
            .and_then(leading_number)
            .ok_or_else(|| anyhow!("Invalid version format: {}", version_str))?;
        let minor = parts.next().and_then(leading_number).unwrap_or(0);
        let patch = parts.next().and_then(leading_number).unwrap_or(0);

        Ok(FFmpegVersion { major, minor, patch })
    }
}

impl std::fmt::Display for FFmpegVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Check whether `ffmpeg -encoders` output lists an encoder by name
pub fn encoder_listed(encoders_output: &str, name: &str) -> bool {
    encoders_output
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(name))
}

/// Run `<bin> -version` and parse the reported version
pub async fn detect_version(bin: &Path) -> Result<FFmpegVersion> {
    let result = run_captured(bin, &["-version".into()], None)
        .await
        .with_context(|| format!("Failed to execute {}", bin.display()))?;

    let first_line = result
        .stdout
        .lines()
        .next()
        .ok_or_else(|| anyhow!("Empty output from {} -version", bin.display()))?;

    FFmpegVersion::parse(first_line)
}

/// Run `ffmpeg -hide_banner -encoders` and check for `name`
pub async fn detect_encoder(ffmpeg_bin: &Path, name: &str) -> Result<bool> {
    let args: Vec<OsString> = vec!["-hide_banner".into(), "-encoders".into()];
    let result = run_captured(ffmpeg_bin, &args, None)
        .await
        .with_context(|| format!("Failed to query encoders at: {}", ffmpeg_bin.display()))?;

    Ok(encoder_listed(&result.stdout, name))
}

/// Captured output of a finished child process
#[derive(Debug, Clone)]
pub struct FFmpegResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    // A broken pipe only truncates diagnostics; the exit status still decides success
    let _ = reader.read_to_end(&mut buf).await;
    buf
}

fn join_error(e: tokio::task::JoinError) -> ToolError {
    ToolError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

/// Run a tool to completion with stdout and stderr captured.
///
/// Both streams are drained on every exit path. When `cancel` fires the
/// child is killed and reaped before `ToolError::Cancelled` is returned.
/// A non-zero exit becomes `ToolError::NonZeroExit`.
pub async fn run_captured(
    program: &Path,
    args: &[OsString],
    cancel: Option<&CancellationToken>,
) -> Result<FFmpegResult, ToolError> {
    debug!(
        "Executing: {} {}",
        program.display(),
        args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
    );

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "stderr was not captured"))?;

    let stdout_handle = tokio::spawn(read_all(stdout));
    let stderr_handle = tokio::spawn(read_all(stderr));

    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending::<()>().await,
        }
    };

    let status = tokio::select! {
        status = child.wait() => Some(status?),
        _ = cancelled => None,
    };

    let Some(status) = status else {
        debug!("Killing {} after interrupt", program.display());
        child.kill().await?;
        // Grandchildren may still hold the pipes; dropping the readers closes our ends
        stdout_handle.abort();
        stderr_handle.abort();
        let _ = stdout_handle.await;
        let _ = stderr_handle.await;
        return Err(ToolError::Cancelled);
    };

    let stdout = stdout_handle.await.map_err(join_error)?;
    let stderr = stderr_handle.await.map_err(join_error)?;
    let stderr = String::from_utf8_lossy(&stderr).into_owned();

    if !status.success() {
        // The terminal's SIGINT reaches the child too and may win the race
        if cancel.map(|t| t.is_cancelled()).unwrap_or(false) {
            return Err(ToolError::Cancelled);
        }
        return Err(ToolError::NonZeroExit {
            program: program.to_path_buf(),
            code: status.code(),
            stderr: crate::error::tail_lines(&stderr, 20),
        });
    }

    let stdout = String::from_utf8(stdout)
        .map_err(|_| ToolError::parse(format!("{} output is not valid UTF-8", program.display())))?;

    Ok(FFmpegResult {
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

/// Command builder for generating FFmpeg command lines
pub struct CommandBuilder;

impl CommandBuilder {
    /// Create a new command builder
    pub fn new() -> Self {
        CommandBuilder
    }

    /// Build the full encode command for `profile`
    ///
    /// Paths are passed through as OS strings, unchanged. `-nostdin -y` keep
    /// ffmpeg from reading the terminal or prompting about an existing output;
    /// the caller owns the output path and never points it at another file.
    pub fn build_encode_command(&self, input: &Path, output: &Path, profile: &EncodeProfile) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-nostdin".into(),
            "-y".into(),
            "-i".into(),
            input.as_os_str().to_os_string(),
        ];

        args.push("-c:v".into());
        args.push(profile.video_encoder.into());
        args.push("-crf".into());
        args.push(profile.crf.to_string().into());
        args.push("-preset".into());
        args.push(profile.preset.into());

        args.push("-vf".into());
        args.push(profile.scale_filter().into());

        args.push("-c:a".into());
        args.push(profile.audio_codec.into());
        args.push("-b:a".into());
        args.push(format!("{}k", profile.audio_bitrate_kbps).into());

        if profile.faststart {
            args.push("-movflags".into());
            args.push("+faststart".into());
        }

        args.push("-pix_fmt".into());
        args.push(profile.pixel_format.into());
        args.push("-profile:v".into());
        args.push(profile.profile.into());
        args.push("-level".into());
        args.push(profile.level.into());

        args.push(output.as_os_str().to_os_string());

        args
    }
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}
