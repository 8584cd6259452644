pub mod ffmpeg;

use anyhow::Result;
use std::path::PathBuf;

use crate::render::frame::Frame;

pub use ffmpeg::{FfmpegFactory, FfmpegSettings};

/// What a writer is opened for.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterSpec {
    pub output: PathBuf,
    /// Audio track muxed into the output, if any.
    pub audio: Option<PathBuf>,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

/// Sink for rendered frames, in presentation order.
pub trait VideoWriter: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and finalize the output file.
    fn close(self: Box<Self>) -> Result<()>;
}

pub trait EncoderFactory: Send + Sync {
    fn open_writer(&self, spec: &WriterSpec) -> Result<Box<dyn VideoWriter>>;
}
