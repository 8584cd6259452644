use anyhow::{Context, Result};
use image::imageops::FilterType;
use std::path::Path;

use super::frame::Frame;

/// Loads a still image and fits it to the output resolution.
pub trait ImageLoader: Send + Sync {
    fn load_and_resize(&self, path: &Path, width: u32, height: u32) -> Result<Frame>;
}

/// Decodes with the `image` crate and center-crops to fill the frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsImageLoader;

impl ImageLoader for FsImageLoader {
    fn load_and_resize(&self, path: &Path, width: u32, height: u32) -> Result<Frame> {
        let img = image::open(path).with_context(|| format!("Failed to decode {}", path.display()))?;
        let (w, h) = (img.width(), img.height());
        let fitted = if (w, h) == (width, height) {
            img
        } else {
            img.resize_to_fill(width, height, FilterType::Triangle)
        };
        log::debug!("Loaded {} ({}x{} -> {}x{})", path.display(), w, h, width, height);
        Ok(fitted.to_rgba8())
    }
}
