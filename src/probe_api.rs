//! Entry points for hosts: blocking and async probes, codec checks, capabilities.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::codec::{CodecInfo, CodecValidator, all_codec_info};
use crate::error::AppError;
use crate::ffmpeg::{CancelToken, ProbeOptions, VideoFileDescriptor, get_video_file_impl};

pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCapabilitiesResult {
    pub protocol_version: u8,
    pub codecs: Vec<CodecInfo>,
}

fn probe_logged(
    path: &Path,
    options: &ProbeOptions,
    cancel: Option<&CancelToken>,
) -> Result<VideoFileDescriptor, AppError> {
    let started = Instant::now();
    let result = get_video_file_impl(path, options, cancel);
    match &result {
        Ok(meta) => log::info!(
            target: "media_probe::probe_api",
            "Probed {} in {:?}: container={}, video={}, audio={}, {}x{}, {}s",
            path.display(),
            started.elapsed(),
            meta.container,
            meta.video_codec(),
            meta.audio_codec(),
            meta.width(),
            meta.height(),
            meta.duration
        ),
        Err(e) => log::debug!(
            target: "media_probe::probe_api",
            "Probe of {} failed after {:?}: {}",
            path.display(),
            started.elapsed(),
            e
        ),
    }
    result
}

/// Probe `path` and block until ffprobe exits or the timeout passes.
pub fn probe_video_file(
    path: impl AsRef<Path>,
    options: &ProbeOptions,
) -> Result<VideoFileDescriptor, AppError> {
    probe_logged(path.as_ref(), options, None)
}

/// Like [`probe_video_file`], aborting with `AppError::Aborted` once `cancel` fires.
pub fn probe_video_file_with_cancel(
    path: impl AsRef<Path>,
    options: &ProbeOptions,
    cancel: &CancelToken,
) -> Result<VideoFileDescriptor, AppError> {
    probe_logged(path.as_ref(), options, Some(cancel))
}

/// Probe on tokio's blocking pool. Dropping the returned future cancels the probe
/// and kills ffprobe.
pub async fn probe_video_file_async(
    path: PathBuf,
    options: ProbeOptions,
) -> Result<VideoFileDescriptor, AppError> {
    let cancel = CancelToken::new();
    let _cancel_on_drop = cancel.drop_guard();
    tokio::task::spawn_blocking(move || probe_logged(&path, &options, Some(&cancel)))
        .await
        .map_err(|e| AppError::from(format!("Probe task failed: {}", e)))?
}

pub fn validate_codec(codec_name: &str) -> bool {
    CodecValidator::default().is_valid(codec_name)
}

pub fn app_capabilities() -> AppCapabilitiesResult {
    AppCapabilitiesResult {
        protocol_version: PROTOCOL_VERSION,
        codecs: all_codec_info(),
    }
}
