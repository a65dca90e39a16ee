use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// What to do with a file whose codec could not be determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailurePolicy {
    /// Treat the file as non-compliant and queue it for transcoding
    Transcode,
    /// Leave the file alone
    Skip,
}

/// Configuration for a batch transcoding run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// File extensions (without dot, case-insensitive) considered video files
    pub video_extensions: Vec<String>,
    /// Number of files processed concurrently (1 = strictly sequential)
    pub workers: usize,
    /// Policy for files the prober failed to classify
    pub probe_failure_policy: ProbeFailurePolicy,
    /// Skip inputs whose converted sibling already exists and is HEVC
    pub skip_converted: bool,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl TranscodeConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            video_extensions: vec!["mp4".to_string(), "mkv".to_string(), "avi".to_string()],
            workers: 1,
            probe_failure_policy: ProbeFailurePolicy::Transcode,
            skip_converted: true,
        }
    }

    /// Load configuration from a file, or return defaults if no path is given.
    ///
    /// A path that was given but cannot be read is an error.
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

            // TOML by extension, JSON otherwise
            if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                config = toml::from_str(&content)
                    .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
            } else {
                config = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot drive a run
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.video_extensions.is_empty() {
            anyhow::bail!("video_extensions must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = TranscodeConfig::default();
        assert_eq!(cfg.ffmpeg_bin, PathBuf::from("ffmpeg"));
        assert_eq!(cfg.ffprobe_bin, PathBuf::from("ffprobe"));
        assert_eq!(cfg.video_extensions, vec!["mp4", "mkv", "avi"]);
        assert_eq!(cfg.workers, 1);
        assert_eq!(cfg.probe_failure_policy, ProbeFailurePolicy::Transcode);
        assert!(cfg.skip_converted);
    }

    #[test]
    fn test_no_path_yields_defaults() {
        let cfg = TranscodeConfig::load_config(None).unwrap();
        assert_eq!(cfg.workers, 1);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = TranscodeConfig::load_config(Some(Path::new("/nonexistent/hevcify.toml"))).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/hevcify.toml"));
    }

    #[test]
    fn test_load_toml_partial() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "workers = 4").unwrap();
        writeln!(file, "probe_failure_policy = \"skip\"").unwrap();
        writeln!(file, "ffmpeg_bin = \"/opt/ffmpeg/bin/ffmpeg\"").unwrap();

        let cfg = TranscodeConfig::load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.probe_failure_policy, ProbeFailurePolicy::Skip);
        assert_eq!(cfg.ffmpeg_bin, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        // Unset fields keep their defaults
        assert_eq!(cfg.ffprobe_bin, PathBuf::from("ffprobe"));
        assert!(cfg.skip_converted);
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"video_extensions": ["mov", "m4v"], "skip_converted": false}}"#).unwrap();

        let cfg = TranscodeConfig::load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.video_extensions, vec!["mov", "m4v"]);
        assert!(!cfg.skip_converted);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "workers = 0").unwrap();

        assert!(TranscodeConfig::load_config(Some(file.path())).is_err());
    }
}
