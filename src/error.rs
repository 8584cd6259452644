use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors of a render job.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("At least one image is required")]
    NoImages,

    #[error("Image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("Failed to load image {}: {source}", path.display())]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Audio file not found: {}", .0.display())]
    AudioNotFound(PathBuf),

    #[error("Invalid resolution {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },

    #[error("Invalid frame rate: {0}")]
    InvalidFps(u32),

    #[error("Invalid duration: {0}s")]
    InvalidDuration(f32),

    #[error("Encoder error: {0}")]
    Encoder(#[source] anyhow::Error),

    #[error("Render cancelled")]
    Cancelled,
}

impl RenderError {
    /// True for errors raised by input validation, before any frame exists.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, Self::Encoder(_) | Self::Cancelled)
    }
}

/// Per-frame effect failure. Always recovered by the caller.
#[derive(Debug, Error)]
pub enum EffectError {
    #[error("frame is {actual:?}, expected {expected:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("non-finite value in {0}")]
    NonFinite(&'static str),

    #[error("effect panicked")]
    Panicked,
}

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("Preset '{0}' not found")]
    NotFound(String),

    #[error("Preset '{0}' is built in and cannot be modified")]
    BuiltinReadOnly(String),

    #[error("Invalid preset name: {0:?}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
