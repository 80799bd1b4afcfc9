//! Probe error type. Implements Display and Serialize for sidecar hosts.

use std::time::Duration;

use crate::ffmpeg::parse_probe_error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    FfprobeNotFound(String),

    /// ffprobe could not be launched or exited non-zero. `output` is everything it printed.
    #[error("ffprobe encountered an error with <{path}>: {reason}\n{output}")]
    Execution {
        path: String,
        code: Option<i32>,
        reason: String,
        output: String,
    },

    #[error("Failed to decode ffprobe report: {0}")]
    Decode(#[from] serde_json::Error),

    /// The report carried an error block with a non-zero code.
    #[error("ffprobe error code {code}: {message}")]
    ToolReported { code: i64, message: String },

    #[error("ffprobe timed out after {}s", .0.as_secs_f64())]
    TimedOut(Duration),

    #[error("Aborted")]
    Aborted,

    #[error("{0}")]
    Message(String),
}

impl AppError {
    pub fn aborted() -> Self {
        Self::Aborted
    }

    pub fn execution(
        path: impl Into<String>,
        code: Option<i32>,
        reason: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self::Execution {
            path: path.into(),
            code,
            reason: reason.into(),
            output: output.into(),
        }
    }

    pub fn tool_reported(code: i64, message: impl Into<String>) -> Self {
        Self::ToolReported {
            code,
            message: message.into(),
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            AppError::Execution { code, output, .. } => {
                let payload = parse_probe_error(output, Some(code.unwrap_or(-1)));
                let json =
                    serde_json::json!({ "summary": payload.summary, "detail": payload.detail });
                serializer.serialize_str(&json.to_string())
            }
            _ => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        if s == "Aborted" {
            AppError::Aborted
        } else {
            AppError::Message(s)
        }
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}
