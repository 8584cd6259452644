//! Per-frame visual effects, each driven by one music feature.

mod anticipation;
mod color;
mod glitch;
mod motion;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::audio::{FeatureKind, MusicAnalysis};
use crate::error::EffectError;
use crate::render::frame::Frame;

pub use anticipation::Anticipation;
pub use color::{ColorShift, Flash, Vignette};
pub use glitch::{block_displace, channel_shift, quantize, row_shift, Glitch};
pub use motion::{Pulse, Shake, Warp};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectType {
    Pulse,
    ColorShift,
    Shake,
    Flash,
    Warp,
    Vignette,
    Glitch,
    Anticipation,
}

/// One configured effect of a preset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EffectSpec {
    #[serde(rename = "type")]
    pub effect_type: EffectType,
    #[serde(default = "default_intensity")]
    pub intensity: f32,
    pub feature: FeatureKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_json::Value>,
}

fn default_intensity() -> f32 {
    1.0
}

impl EffectSpec {
    pub fn new(effect_type: EffectType, intensity: f32, feature: FeatureKind) -> Self {
        Self {
            effect_type,
            intensity,
            feature,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: &str, value: serde_json::Value) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    pub fn param_f32(&self, name: &str, default: f32) -> f32 {
        self.params
            .get(name)
            .and_then(|v| v.as_f64())
            .map(|v| v as f32)
            .filter(|v| v.is_finite())
            .unwrap_or(default)
    }

    /// `[r, g, b]` array of 0-255 components.
    pub fn param_color(&self, name: &str, default: [u8; 3]) -> [u8; 3] {
        let Some(arr) = self.params.get(name).and_then(|v| v.as_array()) else {
            return default;
        };
        let mut out = default;
        for (i, slot) in out.iter_mut().enumerate() {
            if let Some(v) = arr.get(i).and_then(|v| v.as_f64()) {
                *slot = v.clamp(0.0, 255.0) as u8;
            }
        }
        out
    }
}

/// Per-frame inputs handed to every effect.
pub struct EffectContext<'a> {
    pub time: f32,
    pub analysis: &'a MusicAnalysis,
    /// Resolution every frame of the job must have.
    pub resolution: (u32, u32),
    /// Multiplier on the effect's configured intensity for this frame.
    pub intensity_scale: f32,
    pub rng: &'a mut StdRng,
}

impl EffectContext<'_> {
    pub fn feature(&self, kind: FeatureKind) -> f32 {
        self.analysis.feature_at(kind, self.time)
    }
}

pub trait Effect: Send {
    fn name(&self) -> &'static str;

    /// Motion effects are scaled by segment intensity.
    fn is_motion(&self) -> bool {
        false
    }

    fn is_anticipation(&self) -> bool {
        false
    }

    fn apply(&mut self, frame: &Frame, ctx: &mut EffectContext<'_>) -> Result<Frame, EffectError>;
}

/// Run one effect, returning the input unchanged on any failure.
pub fn apply_guarded(effect: &mut dyn Effect, frame: &Frame, ctx: &mut EffectContext<'_>) -> Frame {
    if frame.dimensions() != ctx.resolution || frame.width() == 0 || frame.height() == 0 {
        let err = EffectError::SizeMismatch {
            expected: ctx.resolution,
            actual: frame.dimensions(),
        };
        log::debug!("{} skipped: {}", effect.name(), err);
        return frame.clone();
    }

    match catch_unwind(AssertUnwindSafe(|| effect.apply(frame, ctx))) {
        Ok(Ok(out)) if out.dimensions() == frame.dimensions() => out,
        Ok(Ok(out)) => {
            let err = EffectError::SizeMismatch {
                expected: frame.dimensions(),
                actual: out.dimensions(),
            };
            log::debug!("{} discarded: {}", effect.name(), err);
            frame.clone()
        }
        Ok(Err(err)) => {
            log::debug!("{} failed at {:.2}s: {}", effect.name(), ctx.time, err);
            frame.clone()
        }
        Err(_) => {
            log::debug!("{} failed at {:.2}s: {}", effect.name(), ctx.time, EffectError::Panicked);
            frame.clone()
        }
    }
}

pub(crate) fn finite(value: f32, what: &'static str) -> Result<f32, EffectError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EffectError::NonFinite(what))
    }
}

pub fn build_effect(spec: &EffectSpec) -> Box<dyn Effect> {
    match spec.effect_type {
        EffectType::Pulse => Box::new(Pulse::from_spec(spec)),
        EffectType::ColorShift => Box::new(ColorShift::from_spec(spec)),
        EffectType::Shake => Box::new(Shake::from_spec(spec)),
        EffectType::Flash => Box::new(Flash::from_spec(spec)),
        EffectType::Warp => Box::new(Warp::from_spec(spec)),
        EffectType::Vignette => Box::new(Vignette::from_spec(spec)),
        EffectType::Glitch => Box::new(Glitch::from_spec(spec)),
        EffectType::Anticipation => Box::new(Anticipation::from_spec(spec)),
    }
}

pub fn build_chain(specs: &[EffectSpec]) -> Vec<Box<dyn Effect>> {
    specs.iter().map(build_effect).collect()
}
