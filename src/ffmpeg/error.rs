//! Turn captured ffprobe output into a short summary plus full detail.
//!
//! With `-show_error` ffprobe prints a JSON `error` block on stdout even when it
//! exits non-zero, so that message is preferred. Otherwise the `<path>: <reason>`
//! line ffprobe writes to stderr is used, then the exit code.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static PATH_REASON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^.+?: (?P<reason>[A-Z][^:\r\n]*)\s*$").expect("invalid path reason regex")
});

/// Payload for probe failures. Hosts show summary; detail is expandable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeErrorPayload {
    pub summary: String,
    pub detail: String,
}

pub fn parse_probe_error(output: &str, exit_code: Option<i32>) -> ProbeErrorPayload {
    let summary = embedded_error_message(output)
        .or_else(|| path_reason(output))
        .or_else(|| exit_code.and_then(known_exit_code_summary))
        .unwrap_or_else(|| match exit_code {
            Some(code) if output.trim().is_empty() => format!("ffprobe failed (exit code {}).", code),
            _ => first_line_truncated(output, 120),
        });
    let detail = output.trim().to_string();
    ProbeErrorPayload { summary, detail }
}

/// `error.string` from a JSON report, when the output starts with one.
fn embedded_error_message(output: &str) -> Option<String> {
    let trimmed = output.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    let mut stream = serde_json::Deserializer::from_str(trimmed).into_iter::<serde_json::Value>();
    let value = stream.next()?.ok()?;
    value
        .get("error")?
        .get("string")?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn path_reason(output: &str) -> Option<String> {
    PATH_REASON_RE
        .captures(output)
        .map(|caps| caps["reason"].trim().to_string())
}

fn known_exit_code_summary(code: i32) -> Option<String> {
    match code {
        -1 => Some("ffprobe not found or failed to start.".into()),
        _ => None,
    }
}

const ELLIPSIS: &str = "…";

/// First non-empty line, truncated to max_len bytes (adding "…" if truncated).
fn first_line_truncated(output: &str, max_len: usize) -> String {
    let first = output
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim())
        .unwrap_or(output);
    if first.len() <= max_len {
        return first.to_string();
    }
    let mut cut = max_len.saturating_sub(ELLIPSIS.len());
    while !first.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &first[..cut], ELLIPSIS)
}
