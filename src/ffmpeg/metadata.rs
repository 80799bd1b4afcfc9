//! Normalize a decoded ffprobe report into a [`VideoFileDescriptor`].
//!
//! Numeric fields are parsed leniently: anything that does not parse becomes
//! zero, so one bad field degrades the descriptor instead of failing the probe.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use super::ffprobe::{CodecType, RawProbeDocument, StreamDescriptor};

/// Fields taken from the first video stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStreamInfo {
    pub index: u32,
    pub codec: String,
    pub bitrate: i64,
    /// Display width: raw height when the rotation tag calls for a swap.
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub rotation: i64,
}

/// Fields taken from the first audio stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamInfo {
    pub index: u32,
    pub codec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

/// Consumer-facing metadata for one probed file. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFileDescriptor {
    pub path: PathBuf,
    pub title: String,
    pub comment: String,
    pub container: String,
    /// Seconds, rounded to 2 decimals.
    pub duration: f64,
    pub start_time: f64,
    pub bitrate: i64,
    /// Bytes on disk, from the filesystem rather than the report.
    pub size: u64,
    #[serde(serialize_with = "serialize_creation_time")]
    pub creation_time: Option<OffsetDateTime>,
    pub stream_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoStreamInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioStreamInfo>,
}

impl VideoFileDescriptor {
    pub fn video_codec(&self) -> &str {
        self.video.as_ref().map(|v| v.codec.as_str()).unwrap_or("")
    }

    pub fn video_bitrate(&self) -> i64 {
        self.video.as_ref().map(|v| v.bitrate).unwrap_or(0)
    }

    pub fn width(&self) -> u32 {
        self.video.as_ref().map(|v| v.width).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.video.as_ref().map(|v| v.height).unwrap_or(0)
    }

    pub fn frame_rate(&self) -> f64 {
        self.video.as_ref().map(|v| v.frame_rate).unwrap_or(0.0)
    }

    pub fn rotation(&self) -> i64 {
        self.video.as_ref().map(|v| v.rotation).unwrap_or(0)
    }

    pub fn audio_codec(&self) -> &str {
        self.audio.as_ref().map(|a| a.codec.as_str()).unwrap_or("")
    }
}

fn serialize_creation_time<S>(
    value: &Option<OffsetDateTime>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value.as_ref().and_then(|t| t.format(&Rfc3339).ok()) {
        Some(text) => serializer.serialize_some(&text),
        None => serializer.serialize_none(),
    }
}

/// Round half away from zero to 2 decimals.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn parse_f64(s: Option<&str>) -> f64 {
    s.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn parse_i64(s: Option<&str>) -> i64 {
    s.and_then(|s| s.trim().parse::<i64>().ok()).unwrap_or(0)
}

/// Finite and positive, else 0.
fn positive_or_zero(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// `"num/den"` or a plain decimal. Zero denominators and garbage give 0.
/// Only the first two `/`-separated parts count: `"30/1/2"` is 30.
pub fn parse_frame_rate(s: &str) -> f64 {
    let mut parts = s.split('/');
    let num = parts.next();
    let rate = match parts.next() {
        Some(den) => {
            let num = parse_f64(num);
            let den = parse_f64(Some(den));
            if den == 0.0 { 0.0 } else { num / den }
        }
        None => parse_f64(num),
    };
    positive_or_zero(round2(rate))
}

/// RFC 3339 first, then `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn parse_creation_time(s: &str) -> Option<OffsetDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(t) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(t);
    }
    let plain = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    PrimitiveDateTime::parse(s, &plain)
        .map(PrimitiveDateTime::assume_utc)
        .ok()
}

/// Width and height after the rotation policy: any rotation that parses as an
/// integer and is not exactly 180 swaps them. Returns (width, height, rotation).
fn oriented_dimensions(stream: &StreamDescriptor) -> (u32, u32, i64) {
    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    let rotation = stream
        .tags
        .rotate
        .as_deref()
        .and_then(|r| r.trim().parse::<i64>().ok());
    match rotation {
        // Not limited to ±90/270: 45 or 360 swap as well.
        Some(r) if r != 180 => (height, width, r),
        Some(r) => (width, height, r),
        None => (width, height, 0),
    }
}

fn video_info(stream: &StreamDescriptor, position: usize) -> VideoStreamInfo {
    let (width, height, rotation) = oriented_dimensions(stream);
    VideoStreamInfo {
        index: stream.index.unwrap_or(position as u32),
        codec: stream.codec_name.clone().unwrap_or_default(),
        bitrate: parse_i64(stream.bit_rate.as_deref()),
        width,
        height,
        frame_rate: stream
            .avg_frame_rate
            .as_deref()
            .map(parse_frame_rate)
            .unwrap_or(0.0),
        rotation,
    }
}

fn audio_info(stream: &StreamDescriptor, position: usize) -> AudioStreamInfo {
    AudioStreamInfo {
        index: stream.index.unwrap_or(position as u32),
        codec: stream.codec_name.clone().unwrap_or_default(),
        channels: stream.channels,
        sample_rate: stream
            .sample_rate
            .as_deref()
            .and_then(|s| s.trim().parse().ok()),
    }
}

fn file_name_title(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

fn file_size(path: &Path) -> u64 {
    match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            log::warn!(
                target: "media_probe::ffmpeg::metadata",
                "Could not read size of {}: {}",
                path.display(),
                e
            );
            0
        }
    }
}

/// Normalize `doc` for the file at `path`, querying the filesystem for its size.
pub fn normalize(doc: &RawProbeDocument, path: &Path) -> VideoFileDescriptor {
    normalize_with_size(doc, path, file_size(path))
}

/// Normalize `doc` with an already known byte size.
pub fn normalize_with_size(doc: &RawProbeDocument, path: &Path, size: u64) -> VideoFileDescriptor {
    let format = &doc.format;
    let tags = &format.tags;

    let title = tags
        .title
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| file_name_title(path));

    let creation_time = tags.creation_time.as_deref().and_then(|s| {
        let parsed = parse_creation_time(s);
        if parsed.is_none() {
            log::debug!(
                target: "media_probe::ffmpeg::metadata",
                "Ignoring unparsable creation_time {:?} for {}",
                s,
                path.display()
            );
        }
        parsed
    });

    let video = doc
        .first_stream_at(CodecType::Video)
        .map(|(pos, s)| video_info(s, pos));
    let audio = doc
        .first_stream_at(CodecType::Audio)
        .map(|(pos, s)| audio_info(s, pos));

    VideoFileDescriptor {
        path: path.to_path_buf(),
        title,
        comment: tags.comment.clone().unwrap_or_default(),
        container: format.format_name.clone().unwrap_or_default(),
        duration: positive_or_zero(round2(parse_f64(format.duration.as_deref()))),
        start_time: parse_f64(format.start_time.as_deref()),
        bitrate: parse_i64(format.bit_rate.as_deref()),
        size,
        creation_time,
        stream_count: doc.streams.len(),
        video,
        audio,
    }
}
