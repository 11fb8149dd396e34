use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("wav failure: {0}")]
    Wav(#[from] hound::Error),

    #[error("onnx runtime failure: {0}")]
    Ort(String),

    #[error("tensor shape mismatch: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("model download failed: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),

    #[error("unknown model `{0}`")]
    UnknownModel(String),

    #[error("input does not exist or is not a file: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("unsupported audio format `{0}`")]
    UnsupportedFormat(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("missing command `{command}` on PATH")]
    CommandMissing { command: String },

    #[error("command failed: `{command}` (status: {status}){stderr_suffix}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr_suffix: String,
    },

    #[error("command timed out after {timeout_ms}ms: `{command}`")]
    CommandTimedOut { command: String, timeout_ms: u64 },

    #[error("missing expected artifact at `{}`", .0.display())]
    MissingArtifact(PathBuf),
}

impl Error {
    pub(crate) fn from_command_failure(command: String, status: i32, stderr: &[u8]) -> Self {
        let stderr = String::from_utf8_lossy(stderr);
        let trimmed = stderr.trim();
        let stderr_suffix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("; stderr: {trimmed}")
        };
        Self::CommandFailed {
            command,
            status,
            stderr_suffix,
        }
    }
}

/// ONNX Runtime's error type varies with the builder stage, so it is
/// flattened to its message.
pub(crate) fn ort_err(e: impl std::fmt::Display) -> Error {
    Error::Ort(e.to_string())
}

/// Runs `f`, turning a panic into an error. `ort` with `load-dynamic` panics
/// instead of failing when the runtime library cannot be loaded.
pub(crate) fn catch_runtime<T>(f: impl FnOnce() -> T) -> Result<T> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(|payload| {
        let message = payload
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| payload.downcast_ref::<&str>().copied())
            .unwrap_or("onnx runtime panicked");
        Error::Ort(message.to_owned())
    })
}
