use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use media_probe_core::error::AppError;
use media_probe_core::ffmpeg::{CancelToken, ProbeOptions, parse_probe_error};
use media_probe_core::probe_api;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

const MAX_CONCURRENT_PROBES: usize = 8;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: RpcErrorPayload,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcErrorPayload {
    summary: String,
    detail: String,
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent {
    event: String,
    payload: Value,
}

#[derive(Clone)]
struct JobState {
    active: Arc<Mutex<HashMap<u64, CancelToken>>>,
    next_job_id: Arc<AtomicU64>,
}

impl JobState {
    fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            next_job_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn begin_job(&self) -> Result<(u64, CancelToken), AppError> {
        let mut guard = self.active.lock();
        if guard.len() >= MAX_CONCURRENT_PROBES {
            return Err(AppError::from(format!(
                "Too many probes running ({} of {})",
                guard.len(),
                MAX_CONCURRENT_PROBES
            )));
        }
        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let token = CancelToken::new();
        guard.insert(job_id, token.clone());
        Ok((job_id, token))
    }

    fn finish_job(&self, job_id: u64) {
        self.active.lock().remove(&job_id);
    }

    fn cancel_job(&self, job_id: u64) -> bool {
        match self.active.lock().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn cancel_all(&self) {
        for token in self.active.lock().values() {
            token.cancel();
        }
    }
}

struct ActiveJobGuard {
    state: JobState,
    job_id: u64,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.state.finish_job(self.job_id);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaProbeParams {
    input_path: PathBuf,
    #[serde(default)]
    options: ProbeOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaCancelParams {
    job_id: u64,
}

#[derive(Debug, Deserialize)]
struct CodecValidateParams {
    codec: String,
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let message = RpcEvent {
        event: event.to_string(),
        payload,
    };
    let _ = write_json_line_shared(writer, &message);
}

fn error_payload(err: &AppError) -> RpcErrorPayload {
    match err {
        AppError::Execution { code, output, .. } => {
            let parsed = parse_probe_error(output, Some(code.unwrap_or(-1)));
            RpcErrorPayload {
                summary: parsed.summary,
                detail: err.to_string(),
            }
        }
        AppError::ToolReported { message, .. } if !message.is_empty() => RpcErrorPayload {
            summary: message.clone(),
            detail: err.to_string(),
        },
        _ => {
            let text = err.to_string();
            RpcErrorPayload {
                summary: text.clone(),
                detail: text,
            }
        }
    }
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::from(format!("Invalid params payload: {}", e)))
}

fn to_result_value<T: serde::Serialize>(value: T, what: &str) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::from(format!("Failed to serialize {}: {}", what, e)))
}

fn dispatch_sync(method: &str, params: Value, jobs: &JobState) -> Result<Value, AppError> {
    match method {
        "app.capabilities" => to_result_value(probe_api::app_capabilities(), "app capabilities"),
        "codec.validate" => {
            let parsed: CodecValidateParams = params_from_value(params)?;
            Ok(json!({ "valid": probe_api::validate_codec(&parsed.codec) }))
        }
        "media.cancel" => {
            let parsed: MediaCancelParams = params_from_value(params)?;
            if jobs.cancel_job(parsed.job_id) {
                Ok(json!({ "cancelled": true, "jobId": parsed.job_id }))
            } else {
                Err(AppError::from(format!("Unknown jobId: {}", parsed.job_id)))
            }
        }
        _ => Err(AppError::from(format!("Unknown method: {}", method))),
    }
}

fn respond(writer: &SharedWriter, id: u64, result: Result<Value, AppError>) {
    let written = match result {
        Ok(result) => write_json_line_shared(writer, &RpcSuccess { id, result }),
        Err(err) => write_json_line_shared(
            writer,
            &RpcFailure {
                id,
                error: error_payload(&err),
            },
        ),
    };
    if let Err(err) = written {
        log::error!(
            target: "media_probe::sidecar",
            "Failed to write response for id={}: {}",
            id,
            err
        );
    }
}

fn handle_media_probe(request: RpcRequest, writer: &SharedWriter, jobs: &JobState) {
    let parsed: MediaProbeParams = match params_from_value(request.params) {
        Ok(parsed) => parsed,
        Err(err) => return respond(writer, request.id, Err(err)),
    };

    let (job_id, cancel) = match jobs.begin_job() {
        Ok(job) => job,
        Err(err) => return respond(writer, request.id, Err(err)),
    };
    let _job_guard = ActiveJobGuard {
        state: jobs.clone(),
        job_id,
    };

    emit_rpc_event(
        writer,
        "media.job.started",
        json!({ "jobId": job_id, "requestId": request.id }),
    );

    let options = parsed.options.with_env_defaults();
    let result = probe_api::probe_video_file_with_cancel(&parsed.input_path, &options, &cancel)
        .and_then(|meta| to_result_value(meta, "probe result"));
    match &result {
        Ok(_) => emit_rpc_event(writer, "media.job.complete", json!({ "jobId": job_id })),
        Err(err) => {
            let payload = error_payload(err);
            emit_rpc_event(
                writer,
                "media.job.error",
                json!({
                    "jobId": job_id,
                    "summary": payload.summary,
                    "detail": payload.detail,
                }),
            );
        }
    }
    respond(writer, request.id, result);
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let stdin = io::stdin();
    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let jobs = JobState::new();
    let mut workers: Vec<thread::JoinHandle<()>> = Vec::new();

    log::info!(
        target: "media_probe::sidecar",
        "media-probe sidecar ready (protocol {})",
        probe_api::PROTOCOL_VERSION
    );

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid input stream".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid request".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        workers.retain(|w| !w.is_finished());

        if request.method == "media.probe" {
            let writer = Arc::clone(&stdout);
            let job_state = jobs.clone();
            workers.push(thread::spawn(move || {
                handle_media_probe(request, &writer, &job_state);
            }));
        } else {
            let id = request.id;
            let result = dispatch_sync(&request.method, request.params, &jobs);
            respond(&stdout, id, result);
        }
    }

    // stdin closed: the host is gone, so running probes are abandoned.
    jobs.cancel_all();
    for worker in workers {
        let _ = worker.join();
    }
    Ok(())
}
