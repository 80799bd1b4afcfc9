//! ffprobe JSON report schema and decoding, plus the probe pipeline that ties
//! discovery, the runner, decoding and normalization together.
//!
//! Every field is optional. A field whose JSON type is unexpected (a width sent
//! as text, a rotate tag sent as a number, a tags block that is not an object)
//! decodes as absent instead of failing the whole report.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::Path;

use super::ProbeOptions;
use super::metadata::{VideoFileDescriptor, normalize};
use super::runner::{CancelToken, run_ffprobe_blocking};
use crate::error::AppError;

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_i64(deserializer)?.and_then(|n| u32::try_from(n).ok()))
}

/// Any sub-block that fails to decode falls back to its default.
fn lenient_block<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default())
}

/// Streams that are not objects are dropped; the rest keep document order.
fn lenient_streams<'de, D>(deserializer: D) -> Result<Vec<StreamDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect(),
        _ => Vec::new(),
    })
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FormatTags {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub comment: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub creation_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub encoder: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProbeFormat {
    #[serde(default, deserialize_with = "lenient_string")]
    pub filename: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub nb_streams: Option<u32>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub format_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub format_long_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub start_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub duration: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub size: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub bit_rate: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub probe_score: Option<i64>,
    #[serde(default, deserialize_with = "lenient_block")]
    pub tags: FormatTags,
}

/// `codec_type` of a stream. Anything but `video`/`audio` (data, subtitle, attachment) is Other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CodecType {
    Video,
    Audio,
    #[default]
    Other,
}

impl From<&str> for CodecType {
    fn from(s: &str) -> Self {
        match s {
            "video" => CodecType::Video,
            "audio" => CodecType::Audio,
            _ => CodecType::Other,
        }
    }
}

impl<'de> Deserialize<'de> for CodecType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(lenient_string(deserializer)?
            .as_deref()
            .map(CodecType::from)
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StreamTags {
    #[serde(default, deserialize_with = "lenient_string")]
    pub rotate: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StreamDescriptor {
    #[serde(default, deserialize_with = "lenient_u32")]
    pub index: Option<u32>,
    #[serde(default)]
    pub codec_type: CodecType,
    #[serde(default, deserialize_with = "lenient_string")]
    pub codec_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub codec_long_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub profile: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub bit_rate: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub avg_frame_rate: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub r_frame_rate: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub width: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub height: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub channels: Option<u32>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub sample_rate: Option<String>,
    #[serde(default, deserialize_with = "lenient_block")]
    pub tags: StreamTags,
}

/// Top-level `error` block written by `-show_error`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProbeErrorBlock {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub code: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub string: Option<String>,
}

/// Decoded ffprobe report. Transient: built per probe and dropped after normalization.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawProbeDocument {
    #[serde(default, deserialize_with = "lenient_block")]
    pub format: ProbeFormat,
    #[serde(default, deserialize_with = "lenient_streams")]
    pub streams: Vec<StreamDescriptor>,
    #[serde(default, deserialize_with = "lenient_block")]
    pub error: Option<ProbeErrorBlock>,
}

impl RawProbeDocument {
    /// First stream of `codec_type` in document order, with its position in `streams`.
    pub fn first_stream_at(&self, codec_type: CodecType) -> Option<(usize, &StreamDescriptor)> {
        self.streams
            .iter()
            .enumerate()
            .find(|(_, s)| s.codec_type == codec_type)
    }

    pub fn first_stream(&self, codec_type: CodecType) -> Option<&StreamDescriptor> {
        self.first_stream_at(codec_type).map(|(_, s)| s)
    }

    pub fn video_stream(&self) -> Option<&StreamDescriptor> {
        self.first_stream(CodecType::Video)
    }

    pub fn audio_stream(&self) -> Option<&StreamDescriptor> {
        self.first_stream(CodecType::Audio)
    }
}

/// Decode raw ffprobe output. A non-zero embedded error code means ffprobe could
/// not understand the file, so it fails here instead of producing a descriptor.
pub fn decode_probe_report(raw: &[u8]) -> Result<RawProbeDocument, AppError> {
    let doc: RawProbeDocument = serde_json::from_slice(raw).map_err(|e| {
        log::error!(
            target: "media_probe::ffmpeg::ffprobe",
            "Failed to parse ffprobe JSON ({} bytes): {}",
            raw.len(),
            e
        );
        AppError::Decode(e)
    })?;

    if let Some(error) = &doc.error {
        let code = error.code.unwrap_or(0);
        if code != 0 {
            let message = error.string.clone().unwrap_or_default();
            log::error!(
                target: "media_probe::ffmpeg::ffprobe",
                "ffprobe reported error code {}: {}",
                code,
                message
            );
            return Err(AppError::tool_reported(code, message));
        }
    }

    Ok(doc)
}

/// Run ffprobe on a video file and return its normalized descriptor.
pub fn get_video_file_impl(
    path: &Path,
    options: &ProbeOptions,
    cancel: Option<&CancelToken>,
) -> Result<VideoFileDescriptor, AppError> {
    let ffprobe = options.resolve_ffprobe_path()?;

    log::debug!(
        target: "media_probe::ffmpeg::ffprobe",
        "get_video_file: path={}",
        path.display()
    );

    let output = run_ffprobe_blocking(&ffprobe, path, options.effective_timeout(), cancel)?;
    let doc = decode_probe_report(&output.stdout)?;
    Ok(normalize(&doc, path))
}
