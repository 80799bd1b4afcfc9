use crate::error::AppError;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

/// Env override for the probe binary.
pub const FFPROBE_PATH_ENV: &str = "FFPROBE_PATH";

/// First hit of `which ffprobe` (`where` on Windows).
fn find_in_path() -> Option<PathBuf> {
    let locator = if cfg!(target_os = "windows") { "where" } else { "which" };
    let output = Command::new(locator).arg("ffprobe").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffprobe"),
            PathBuf::from("/usr/local/bin/ffprobe"),
            PathBuf::from("/opt/local/bin/ffprobe"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffprobe.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffprobe.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffprobe"),
            PathBuf::from("/usr/local/bin/ffprobe"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

static FFPROBE_PATH_CACHE: OnceLock<PathBuf> = OnceLock::new();

/// Path from the env override, if it names an existing file.
pub fn env_override_path(value: Option<&str>) -> Option<PathBuf> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    let p = PathBuf::from(value);
    if p.is_file() {
        log::debug!(
            target: "media_probe::ffmpeg::discovery",
            "ffprobe path from {} env: {}",
            FFPROBE_PATH_ENV,
            p.display()
        );
        Some(p)
    } else {
        log::warn!(
            target: "media_probe::ffmpeg::discovery",
            "{} points to a missing file, ignoring: {}",
            FFPROBE_PATH_ENV,
            p.display()
        );
        None
    }
}

fn resolve_ffprobe_path() -> Result<PathBuf, AppError> {
    let env_value = std::env::var(FFPROBE_PATH_ENV).ok();
    if let Some(p) = env_override_path(env_value.as_deref()) {
        return Ok(p);
    }

    for path in common_paths() {
        if path.exists() {
            log::debug!(
                target: "media_probe::ffmpeg::discovery",
                "ffprobe found in common path: {}",
                path.display()
            );
            return Ok(path);
        }
    }

    if let Some(p) = find_in_path() {
        if p.exists() {
            log::debug!(
                target: "media_probe::ffmpeg::discovery",
                "ffprobe found in PATH: {}",
                p.display()
            );
            return Ok(p);
        }
    }

    log::error!(
        target: "media_probe::ffmpeg::discovery",
        "ffprobe not found in {}, common locations or PATH",
        FFPROBE_PATH_ENV
    );
    Err(AppError::FfprobeNotFound(
        "ffprobe not found. Please install FFmpeg (ffprobe ships with it) or set FFPROBE_PATH:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

/// Get ffprobe path. Cached for process lifetime once resolved.
/// FFPROBE_PATH takes precedence, then common installation paths, then PATH.
pub fn get_ffprobe_path() -> Result<&'static Path, AppError> {
    if let Some(path) = FFPROBE_PATH_CACHE.get() {
        log::trace!(
            target: "media_probe::ffmpeg::discovery",
            "ffprobe path (cached): {}",
            path.display()
        );
        return Ok(path.as_path());
    }
    let path = resolve_ffprobe_path()?;
    // Another thread may have won the race; either value is a valid ffprobe.
    Ok(FFPROBE_PATH_CACHE.get_or_init(|| path).as_path())
}
