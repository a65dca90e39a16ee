pub mod config;
pub mod error;
pub mod scan;
pub mod ffprobe;
pub mod ffmpeg_native;
pub mod toolkit;
pub mod transcode;
pub mod report;
pub mod batch;

pub use config::{ProbeFailurePolicy, TranscodeConfig};
pub use error::ToolError;
pub use scan::VideoFile;
pub use ffprobe::CodecDecision;
pub use toolkit::{FfmpegToolkit, MediaToolkit};
pub use transcode::{TranscodeJob, TranscodeOutcome};
pub use report::{LogReporter, MemoryReporter, ProgressEvent, Reporter};
pub use batch::{BatchOrchestrator, BatchRun};
