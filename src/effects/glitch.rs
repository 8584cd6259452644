//! Digital corruption primitives. Each mutates a frame in place using the
//! job's seeded RNG, so a glitch replays identically for the same seed.

use rand::rngs::StdRng;
use rand::Rng;

use super::{finite, Effect, EffectContext, EffectSpec};
use crate::audio::FeatureKind;
use crate::error::EffectError;
use crate::render::frame::Frame;

/// Shift a random horizontal band of rows sideways, wrapping around.
pub fn row_shift(frame: &mut Frame, rng: &mut StdRng, strength: f32) {
    let (w, h) = frame.dimensions();
    if w < 2 || h == 0 {
        return;
    }
    let band = ((h as f32 * (0.02 + 0.08 * strength)).ceil() as u32).clamp(1, h);
    let start = rng.random_range(0..=h - band);
    let max_shift = ((w as f32 * 0.1 * strength).ceil() as i64).max(1);
    let shift = rng.random_range(-max_shift..=max_shift);
    let row_len = w as usize * 4;
    let raw: &mut [u8] = frame;
    for y in start..start + band {
        let row = &mut raw[y as usize * row_len..(y as usize + 1) * row_len];
        let px = shift.rem_euclid(w as i64) as usize * 4;
        row.rotate_right(px);
    }
}

/// Offset the red and blue channels in opposite directions.
pub fn channel_shift(frame: &mut Frame, rng: &mut StdRng, strength: f32) {
    let (w, h) = frame.dimensions();
    if w < 2 {
        return;
    }
    let max = ((w as f32 * 0.02 * strength).ceil() as i64).max(1);
    let offset = rng.random_range(1..=max);
    let src = frame.clone();
    for y in 0..h {
        for x in 0..w {
            let rx = (x as i64 + offset).clamp(0, w as i64 - 1) as u32;
            let bx = (x as i64 - offset).clamp(0, w as i64 - 1) as u32;
            let px = frame.get_pixel_mut(x, y);
            px[0] = src.get_pixel(rx, y)[0];
            px[2] = src.get_pixel(bx, y)[2];
        }
    }
}

/// Copy a random block to another random position.
pub fn block_displace(frame: &mut Frame, rng: &mut StdRng, strength: f32) {
    let (w, h) = frame.dimensions();
    let bw = ((w as f32 * (0.05 + 0.15 * strength)).ceil() as u32).clamp(1, w.max(1));
    let bh = ((h as f32 * (0.02 + 0.08 * strength)).ceil() as u32).clamp(1, h.max(1));
    if w == 0 || h == 0 {
        return;
    }
    let sx = rng.random_range(0..=w - bw);
    let sy = rng.random_range(0..=h - bh);
    let dx = rng.random_range(0..=w - bw);
    let dy = rng.random_range(0..=h - bh);
    let block = image::imageops::crop_imm(&*frame, sx, sy, bw, bh).to_image();
    image::imageops::replace(frame, &block, dx as i64, dy as i64);
}

/// Reduce color depth; stronger glitches keep fewer levels.
pub fn quantize(frame: &mut Frame, _rng: &mut StdRng, strength: f32) {
    let levels = (16.0 - 12.0 * strength.clamp(0.0, 1.0)).round().max(2.0) as u32;
    let step = 255.0 / (levels - 1) as f32;
    for px in frame.pixels_mut() {
        for c in 0..3 {
            px[c] = ((px[c] as f32 / step).round() * step).round().clamp(0.0, 255.0) as u8;
        }
    }
}

type Primitive = fn(&mut Frame, &mut StdRng, f32);

const PRIMITIVES: [Primitive; 4] = [row_shift, channel_shift, block_displace, quantize];

/// Bursts of random corruption on feature spikes.
pub struct Glitch {
    feature: FeatureKind,
    intensity: f32,
    threshold: f32,
}

impl Glitch {
    pub fn from_spec(spec: &EffectSpec) -> Self {
        Self {
            feature: spec.feature,
            intensity: spec.intensity,
            threshold: spec.param_f32("threshold", 0.85),
        }
    }
}

impl Effect for Glitch {
    fn name(&self) -> &'static str {
        "glitch"
    }

    fn apply(&mut self, input: &Frame, ctx: &mut EffectContext<'_>) -> Result<Frame, EffectError> {
        let value = ctx.feature(self.feature);
        if value <= self.threshold {
            return Ok(input.clone());
        }
        let strength = finite(value * self.intensity * ctx.intensity_scale, "glitch")?;
        let bursts = 1 + (strength * 4.0).round().clamp(0.0, 16.0) as usize;
        let mut out = input.clone();
        for _ in 0..bursts {
            let primitive = PRIMITIVES[ctx.rng.random_range(0..PRIMITIVES.len())];
            primitive(&mut out, &mut *ctx.rng, strength.min(1.0));
        }
        Ok(out)
    }
}
