pub mod discovery;
mod error;
pub mod ffprobe;
pub mod metadata;
mod runner;

pub use error::{ProbeErrorPayload, parse_probe_error};
pub use ffprobe::{
    CodecType, RawProbeDocument, StreamDescriptor, decode_probe_report, get_video_file_impl,
};
pub use metadata::{
    AudioStreamInfo, VideoFileDescriptor, VideoStreamInfo, normalize, normalize_with_size,
    parse_frame_rate,
};
pub use runner::{
    CancelOnDrop, CancelToken, FFPROBE_ARGS, ProbeOutput, build_ffprobe_args, run_ffprobe_blocking,
};
#[cfg(all(test, unix))]
pub(crate) use runner::test_scripts;

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

/// Env override for the default probe timeout, in seconds.
pub const TIMEOUT_ENV: &str = "MEDIA_PROBE_TIMEOUT_SECS";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-probe settings. Every field is optional; `effective_*` fills the defaults.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOptions {
    /// Explicit ffprobe binary. Skips discovery when set.
    pub ffprobe_path: Option<PathBuf>,
    /// Upper bound on one ffprobe run. Defaults to 30s.
    pub timeout_secs: Option<f64>,
}

impl ProbeOptions {
    /// Defaults with the timeout taken from `MEDIA_PROBE_TIMEOUT_SECS` when set.
    pub fn from_env() -> Self {
        Self {
            ffprobe_path: None,
            timeout_secs: std::env::var(TIMEOUT_ENV)
                .ok()
                .and_then(|v| v.trim().parse::<f64>().ok()),
        }
    }

    /// Fill timeout from the environment when the caller left it unset.
    pub fn with_env_defaults(mut self) -> Self {
        if self.timeout_secs.is_none() {
            self.timeout_secs = Self::from_env().timeout_secs;
        }
        self
    }

    pub fn effective_timeout(&self) -> Duration {
        self.timeout_secs
            .filter(|s| s.is_finite() && *s > 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn resolve_ffprobe_path(&self) -> Result<PathBuf, AppError> {
        match &self.ffprobe_path {
            Some(path) => Ok(path.clone()),
            None => discovery::get_ffprobe_path().map(|p| p.to_path_buf()),
        }
    }
}

/// Path to string for ffprobe args or logging.
pub fn path_to_string(path: &(impl AsRef<std::path::Path> + ?Sized)) -> String {
    path.as_ref().to_string_lossy().to_string()
}
