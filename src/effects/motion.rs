use rand::Rng;

use super::{finite, Effect, EffectContext, EffectSpec};
use crate::audio::FeatureKind;
use crate::error::EffectError;
use crate::render::frame::{self, Frame};

/// Feature level above which motion effects smear in their previous output.
const TRAIL_THRESHOLD: f32 = 0.5;
const TRAIL_MIX: f32 = 0.15;

/// Blend a little of the previous output in when the beat is strong.
fn with_trail(out: Frame, previous: &mut Option<Frame>, feature: f32) -> Frame {
    let result = match previous.as_ref() {
        Some(prev) if feature > TRAIL_THRESHOLD && prev.dimensions() == out.dimensions() => {
            frame::blend(&out, prev, TRAIL_MIX)
        }
        _ => out,
    };
    *previous = Some(result.clone());
    result
}

/// Isotropic zoom proportional to the feature.
pub struct Pulse {
    feature: FeatureKind,
    intensity: f32,
    max_zoom: f32,
    previous: Option<Frame>,
}

impl Pulse {
    pub fn from_spec(spec: &EffectSpec) -> Self {
        Self {
            feature: spec.feature,
            intensity: spec.intensity,
            max_zoom: spec.param_f32("max_zoom", 0.1),
            previous: None,
        }
    }
}

impl Effect for Pulse {
    fn name(&self) -> &'static str {
        "pulse"
    }

    fn is_motion(&self) -> bool {
        true
    }

    fn apply(&mut self, input: &Frame, ctx: &mut EffectContext<'_>) -> Result<Frame, EffectError> {
        let value = ctx.feature(self.feature);
        let zoom = finite(1.0 + value * self.intensity * ctx.intensity_scale * self.max_zoom, "pulse zoom")?;
        let out = frame::zoom(input, zoom.max(0.5));
        Ok(with_trail(out, &mut self.previous, value))
    }
}

/// Random translation on strong feature values.
pub struct Shake {
    feature: FeatureKind,
    intensity: f32,
    threshold: f32,
    max_offset: f32,
    previous: Option<Frame>,
}

impl Shake {
    pub fn from_spec(spec: &EffectSpec) -> Self {
        Self {
            feature: spec.feature,
            intensity: spec.intensity,
            threshold: spec.param_f32("threshold", 0.7),
            max_offset: spec.param_f32("max_offset", 0.03),
            previous: None,
        }
    }
}

impl Effect for Shake {
    fn name(&self) -> &'static str {
        "shake"
    }

    fn is_motion(&self) -> bool {
        true
    }

    fn apply(&mut self, input: &Frame, ctx: &mut EffectContext<'_>) -> Result<Frame, EffectError> {
        let value = ctx.feature(self.feature);
        if value < self.threshold {
            self.previous = None;
            return Ok(input.clone());
        }
        let shorter = input.width().min(input.height()) as f32;
        let magnitude = finite(value * self.intensity * ctx.intensity_scale * self.max_offset * shorter, "shake")?;
        let dx = ctx.rng.random_range(-1.0f32..=1.0) * magnitude;
        let dy = ctx.rng.random_range(-1.0f32..=1.0) * magnitude;
        let out = frame::translate(input, dx, dy);
        Ok(with_trail(out, &mut self.previous, value))
    }
}

/// Radial sinusoidal displacement whose phase advances with time.
pub struct Warp {
    feature: FeatureKind,
    intensity: f32,
    threshold: f32,
    max_amplitude: f32,
    frequency: f32,
    speed: f32,
}

impl Warp {
    pub fn from_spec(spec: &EffectSpec) -> Self {
        Self {
            feature: spec.feature,
            intensity: spec.intensity,
            threshold: spec.param_f32("threshold", 0.3),
            max_amplitude: spec.param_f32("max_amplitude", 0.015),
            frequency: spec.param_f32("frequency", 6.0),
            speed: spec.param_f32("speed", 4.0),
        }
    }
}

impl Effect for Warp {
    fn name(&self) -> &'static str {
        "warp"
    }

    fn is_motion(&self) -> bool {
        true
    }

    fn apply(&mut self, input: &Frame, ctx: &mut EffectContext<'_>) -> Result<Frame, EffectError> {
        let value = ctx.feature(self.feature);
        if value < self.threshold {
            return Ok(input.clone());
        }
        let (w, h) = input.dimensions();
        let shorter = w.min(h) as f32;
        let amplitude = finite(value * self.intensity * ctx.intensity_scale * self.max_amplitude * shorter, "warp")?;
        let phase = finite(ctx.time * self.speed, "warp phase")?;
        let cx = w as f32 / 2.0;
        let cy = h as f32 / 2.0;
        let max_r = (cx * cx + cy * cy).sqrt().max(1.0);
        let frequency = self.frequency;

        Ok(frame::remap(input, |x, y| {
            let dx = x - cx;
            let dy = y - cy;
            let r = (dx * dx + dy * dy).sqrt();
            if r < 1e-3 {
                return (x, y);
            }
            let offset = amplitude * (std::f32::consts::TAU * frequency * r / max_r + phase).sin();
            let scale = (r + offset) / r;
            (cx + dx * scale, cy + dy * scale)
        }))
    }
}
