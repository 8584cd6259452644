use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;

use super::{EncoderFactory, VideoWriter, WriterSpec};
use crate::render::frame::Frame;

/// Codec settings shared by every writer an `FfmpegFactory` opens.
#[derive(Debug, Clone)]
pub struct FfmpegSettings {
    pub codec: String,
    pub pix_fmt: String,
    pub crf: u32,
    pub binary: PathBuf,
}

impl Default for FfmpegSettings {
    fn default() -> Self {
        Self {
            codec: "libx264".into(),
            pix_fmt: "yuv420p".into(),
            crf: 20,
            binary: PathBuf::from("ffmpeg"),
        }
    }
}

/// Pipes raw RGBA frames into an ffmpeg child that muxes in the audio track.
///
/// Dropping an encoder that was never closed kills the child and removes the
/// partial output.
pub struct FfmpegEncoder {
    child: Child,
    stderr: Option<JoinHandle<Vec<u8>>>,
    output: PathBuf,
    frame_bytes: usize,
    frames: u64,
    finished: bool,
}

impl FfmpegEncoder {
    pub fn new(spec: &WriterSpec, settings: &FfmpegSettings) -> Result<Self> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".into(),
            "-nostats".into(),
            "-loglevel".into(), "error".into(),
            "-f".into(), "rawvideo".into(),
            "-pixel_format".into(), "rgba".into(),
            "-video_size".into(), format!("{}x{}", spec.width, spec.height),
            "-framerate".into(), spec.fps.to_string(),
            "-i".into(), "pipe:0".into(),
        ];
        if let Some(audio) = &spec.audio {
            args.extend(["-i".to_string(), path_arg(audio)?]);
        }
        args.extend([
            "-c:v".to_string(), settings.codec.clone(),
            "-pix_fmt".into(), settings.pix_fmt.clone(),
            "-crf".into(), settings.crf.to_string(),
            "-preset".into(), "medium".into(),
        ]);
        if spec.audio.is_some() {
            args.extend([
                "-c:a".to_string(), "aac".into(),
                "-b:a".into(), "192k".into(),
                "-shortest".into(),
            ]);
        }
        args.push(path_arg(&spec.output)?);

        let mut child = Command::new(&settings.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn ffmpeg. Is ffmpeg installed?")?;

        // Drained for the whole encode so a chatty child never blocks on a full pipe.
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                buf
            })
        });

        log::info!(
            "FFmpeg encoder started: {}x{} @ {}fps, codec={}",
            spec.width,
            spec.height,
            spec.fps,
            settings.codec
        );

        Ok(Self {
            child,
            stderr,
            output: spec.output.clone(),
            frame_bytes: spec.width as usize * spec.height as usize * 4,
            frames: 0,
            finished: false,
        })
    }
}

fn path_arg(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .with_context(|| format!("Path is not valid UTF-8: {}", path.display()))
}

impl VideoWriter for FfmpegEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let raw: &[u8] = frame;
        anyhow::ensure!(
            raw.len() == self.frame_bytes,
            "Frame is {} bytes, encoder expects {}",
            raw.len(),
            self.frame_bytes
        );
        let stdin = self.child.stdin.as_mut().context("FFmpeg stdin not available")?;
        stdin.write_all(raw).context("Failed to write frame to ffmpeg")?;
        self.frames += 1;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        // Close stdin to signal EOF
        drop(self.child.stdin.take());

        let status = self.child.wait().context("Failed to wait for ffmpeg")?;
        self.finished = true;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            anyhow::bail!("FFmpeg exited with error:\n{}", String::from_utf8_lossy(&stderr));
        }

        log::info!("FFmpeg encoding complete ({} frames)", self.frames);
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        log::warn!("Abandoning ffmpeg after {} frames", self.frames);
        // Kill before stdin closes so ffmpeg never sees a clean EOF.
        let _ = self.child.kill();
        let _ = self.child.wait();
        drop(self.child.stdin.take());
        if let Some(handle) = self.stderr.take() {
            let _ = handle.join();
        }
        if self.output.exists() {
            if let Err(err) = std::fs::remove_file(&self.output) {
                log::warn!("Failed to remove partial output {}: {}", self.output.display(), err);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FfmpegFactory {
    pub settings: FfmpegSettings,
}

impl FfmpegFactory {
    pub fn new(settings: FfmpegSettings) -> Self {
        Self { settings }
    }
}

impl EncoderFactory for FfmpegFactory {
    fn open_writer(&self, spec: &WriterSpec) -> Result<Box<dyn VideoWriter>> {
        Ok(Box::new(FfmpegEncoder::new(spec, &self.settings)?))
    }
}
