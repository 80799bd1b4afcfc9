#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use media_probe_core::ProbeOptions;

/// Write an executable `sh` script standing in for ffprobe.
#[cfg(unix)]
pub fn write_fake_ffprobe(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("ffprobe");
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write fake ffprobe");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod fake ffprobe");
    path
}

/// Fake ffprobe that prints `report` on stdout and exits 0.
#[cfg(unix)]
pub fn fake_ffprobe_printing(dir: &Path, report: &str) -> PathBuf {
    let report_path = dir.join("report.json");
    fs::write(&report_path, report).expect("write report fixture");
    write_fake_ffprobe(dir, &format!("cat '{}'", report_path.display()))
}

pub fn options_for(ffprobe: &Path) -> ProbeOptions {
    ProbeOptions {
        ffprobe_path: Some(ffprobe.to_path_buf()),
        timeout_secs: Some(10.0),
    }
}

pub enum VideoKind {
    Plain,
    MultiAudio(u32),
    NoAudio,
}

pub struct IntegrationEnv {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    dir: tempfile::TempDir,
}

impl IntegrationEnv {
    pub fn new() -> Self {
        let ffprobe = media_probe_core::ffmpeg::discovery::get_ffprobe_path()
            .expect("ffprobe not found")
            .to_path_buf();
        let ffmpeg = sibling_ffmpeg(&ffprobe);
        let dir = tempfile::tempdir().expect("tempdir");
        Self {
            ffmpeg,
            ffprobe,
            dir,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn with_test_video(&self, name: &str, duration_secs: f32, kind: VideoKind) -> PathBuf {
        let output_path = self.path(name);
        let status = match kind {
            VideoKind::Plain => create_test_video(&self.ffmpeg, &output_path, duration_secs, 1),
            VideoKind::MultiAudio(n) => {
                create_test_video(&self.ffmpeg, &output_path, duration_secs, n)
            }
            VideoKind::NoAudio => create_test_video(&self.ffmpeg, &output_path, duration_secs, 0),
        };
        let status = status.expect("failed to create test video");
        assert!(status.success(), "ffmpeg failed to create test video");
        output_path
    }
}

/// ffmpeg from the same directory as ffprobe, else whatever PATH resolves.
fn sibling_ffmpeg(ffprobe: &Path) -> PathBuf {
    let name = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };
    ffprobe
        .parent()
        .map(|dir| dir.join(name))
        .filter(|p| p.is_file())
        .unwrap_or_else(|| PathBuf::from(name))
}

/// 320x240 H.264 clip from lavfi with `audio_tracks` sine tracks.
pub fn create_test_video(
    ffmpeg: &Path,
    output_path: &Path,
    duration_secs: f32,
    audio_tracks: u32,
) -> std::io::Result<ExitStatus> {
    let duration_arg = format!("{}", duration_secs);
    let mut args = vec![
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-f".to_string(),
        "lavfi".to_string(),
        "-i".to_string(),
        format!("testsrc=duration={}:size=320x240:rate=30", duration_arg),
    ];

    for i in 0..audio_tracks {
        let freq = 440 + i * 220;
        args.push("-f".to_string());
        args.push("lavfi".to_string());
        args.push("-i".to_string());
        args.push(format!("sine=frequency={}:duration={}", freq, duration_arg));
    }

    args.push("-map".to_string());
    args.push("0:v".to_string());
    for i in 0..audio_tracks {
        args.push("-map".to_string());
        args.push(format!("{}:a", i + 1));
    }

    args.extend(
        ["-c:v", "libx264", "-pix_fmt", "yuv420p", "-metadata", "title=Smoke clip"]
            .iter()
            .map(|s| s.to_string()),
    );
    if audio_tracks > 0 {
        args.push("-c:a".to_string());
        args.push("aac".to_string());
    }
    args.push("-shortest".to_string());
    args.push(output_path.to_string_lossy().to_string());

    Command::new(ffmpeg)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
}
