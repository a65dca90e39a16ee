//! The external media tools a batch run depends on.

use std::path::{Path, PathBuf};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::TranscodeConfig;
use crate::error::ToolError;
use crate::ffmpeg_native::{self, CommandBuilder, FFmpegResult, HEVC_PROFILE};
use crate::ffprobe;

/// Prober and encoder capabilities used by the orchestrator.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Returns the codec name of the file's first video stream.
    async fn probe_codec(&self, path: &Path) -> Result<String, ToolError>;

    /// Encodes `input` into `output` with the fixed HEVC profile.
    ///
    /// Must stop the encoder and return `ToolError::Cancelled` once `cancel`
    /// fires.
    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<FFmpegResult, ToolError>;
}

/// Toolkit backed by the ffprobe and ffmpeg binaries.
pub struct FfmpegToolkit {
    ffmpeg_bin: PathBuf,
    ffprobe_bin: PathBuf,
}

impl FfmpegToolkit {
    pub fn new(config: &TranscodeConfig) -> Self {
        Self {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            ffprobe_bin: config.ffprobe_bin.clone(),
        }
    }

    /// Check that the binaries can run before any batch work starts.
    ///
    /// The encoder is only required when files will actually be encoded.
    pub async fn validate(&self, require_encoder: bool) -> Result<()> {
        match ffmpeg_native::detect_version(&self.ffprobe_bin).await {
            Ok(version) => info!("Using ffprobe {} ({})", version, self.ffprobe_bin.display()),
            Err(e) => {
                // An unparseable version line is fine as long as the binary ran
                if e.downcast_ref::<ToolError>().is_some() {
                    return Err(e.context("ffprobe is not usable"));
                }
                warn!("Could not determine ffprobe version: {:#}", e);
            }
        }

        if !require_encoder {
            return Ok(());
        }

        match ffmpeg_native::detect_version(&self.ffmpeg_bin).await {
            Ok(version) => info!("Using ffmpeg {} ({})", version, self.ffmpeg_bin.display()),
            Err(e) => {
                if e.downcast_ref::<ToolError>().is_some() {
                    return Err(e.context("ffmpeg is not usable"));
                }
                warn!("Could not determine ffmpeg version: {:#}", e);
            }
        }

        if !ffmpeg_native::detect_encoder(&self.ffmpeg_bin, HEVC_PROFILE.video_encoder).await? {
            return Err(anyhow!(
                "ffmpeg at {} was built without the {} encoder",
                self.ffmpeg_bin.display(),
                HEVC_PROFILE.video_encoder
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe_codec(&self, path: &Path) -> Result<String, ToolError> {
        let result = ffmpeg_native::run_captured(&self.ffprobe_bin, &ffprobe::probe_args(path), None).await?;
        ffprobe::parse_codec_output(&result.stdout)
    }

    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<FFmpegResult, ToolError> {
        let args = CommandBuilder::new().build_encode_command(input, output, &HEVC_PROFILE);
        ffmpeg_native::run_captured(&self.ffmpeg_bin, &args, Some(cancel)).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn stub_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    const FAKE_FFMPEG: &str = r#"case "$1" in
  -version) echo "ffmpeg version 6.1.1 Copyright (c) 2000-2023"; exit 0 ;;
  -hide_banner) echo " V....D libx265              libx265 H.265 / HEVC (codec hevc)"; exit 0 ;;
esac
for last; do :; done
printf 'encoded' > "$last"
echo "frame=  100 fps=25" >&2"#;

    #[tokio::test]
    async fn test_encode_stub_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.avi");
        let output = dir.path().join("in.hevc-tmp.mp4");
        std::fs::write(&input, b"source").unwrap();

        let cfg = TranscodeConfig {
            ffmpeg_bin: stub_script(dir.path(), "ffmpeg", FAKE_FFMPEG),
            ..Default::default()
        };
        let toolkit = FfmpegToolkit::new(&cfg);
        let result = toolkit
            .encode(&input, &output, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"encoded");
        assert!(result.stderr.contains("frame="));
        // Encoder chatter is captured, not forwarded
        assert!(result.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_validate_with_stubs() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TranscodeConfig {
            ffmpeg_bin: stub_script(dir.path(), "ffmpeg", FAKE_FFMPEG),
            ffprobe_bin: stub_script(dir.path(), "ffprobe", "echo 'ffprobe version 6.1.1'"),
            ..Default::default()
        };
        FfmpegToolkit::new(&cfg).validate(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_validate_missing_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TranscodeConfig {
            ffmpeg_bin: stub_script(dir.path(), "ffmpeg", "echo 'ffmpeg version 6.1.1'"),
            ffprobe_bin: stub_script(dir.path(), "ffprobe", "echo 'ffprobe version 6.1.1'"),
            ..Default::default()
        };
        let toolkit = FfmpegToolkit::new(&cfg);

        let err = toolkit.validate(true).await.unwrap_err();
        assert!(err.to_string().contains("libx265"));
        // A dry run never needs the encoder
        toolkit.validate(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_validate_missing_prober() {
        let cfg = TranscodeConfig {
            ffprobe_bin: PathBuf::from("/nonexistent/ffprobe"),
            ..Default::default()
        };
        assert!(FfmpegToolkit::new(&cfg).validate(false).await.is_err());
    }
}
