use super::color::vignette;
use super::{finite, Effect, EffectContext, EffectSpec};
use crate::audio::FeatureKind;
use crate::error::EffectError;
use crate::render::frame::{self, Frame};

const MAX_ZOOM_OUT: f32 = 0.06;
const MAX_TINT: f32 = 0.2;
const MAX_VIGNETTE: f32 = 0.5;
const TINT: [u8; 3] = [90, 140, 255];

/// Coils up before each beat: zooms out, cools and closes in as the beat
/// approaches, then releases on impact.
pub struct Anticipation {
    feature: FeatureKind,
    intensity: f32,
    window: Option<f32>,
    tint: [u8; 3],
}

impl Anticipation {
    pub fn from_spec(spec: &EffectSpec) -> Self {
        let window = spec.param_f32("window", -1.0);
        Self {
            feature: spec.feature,
            intensity: spec.intensity,
            window: (window > 0.0).then_some(window),
            tint: spec.param_color("tint", TINT),
        }
    }

    /// Build-up in [0, 1] for the frame at `ctx.time`.
    fn strength(&self, ctx: &EffectContext<'_>) -> f32 {
        let window = self.window.unwrap_or(ctx.analysis.anticipation_time);
        if window.is_nan() || window <= 0.0 {
            return 0.0;
        }
        let until_beat = ctx.analysis.time_to_next_beat(ctx.time);
        if until_beat <= 1e-3 || until_beat > window {
            return 0.0;
        }
        let progress = 1.0 - until_beat / window;
        let upcoming = ctx.analysis.feature_at(self.feature, ctx.time + until_beat);
        (progress * upcoming * self.intensity * ctx.intensity_scale).clamp(0.0, 1.0)
    }
}

impl Effect for Anticipation {
    fn name(&self) -> &'static str {
        "anticipation"
    }

    fn is_anticipation(&self) -> bool {
        true
    }

    fn apply(&mut self, input: &Frame, ctx: &mut EffectContext<'_>) -> Result<Frame, EffectError> {
        let s = finite(self.strength(ctx), "anticipation")?;
        if s <= 0.0 {
            return Ok(input.clone());
        }
        let out = frame::zoom(input, 1.0 - s * MAX_ZOOM_OUT);
        let out = frame::blend_color(&out, self.tint, s * MAX_TINT);
        Ok(vignette(&out, s * MAX_VIGNETTE))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{apply_guarded, EffectType};
    use super::*;

    fn effect() -> Anticipation {
        Anticipation::from_spec(&EffectSpec::new(EffectType::Anticipation, 1.0, FeatureKind::Beats))
    }

    #[test]
    fn idle_outside_window() {
        let a = analysis();
        let mut rng = rng();
        let frame = test_frame(32, 24);
        // next beat at 1.0 s is 0.4 s away, window is 0.3 s
        let mut c = ctx(&a, &mut rng, 0.6);
        assert_eq!(apply_guarded(&mut effect(), &frame, &mut c), frame);
        // on the beat itself
        let mut c = ctx(&a, &mut rng, 1.0);
        assert_eq!(apply_guarded(&mut effect(), &frame, &mut c), frame);
    }

    #[test]
    fn builds_toward_the_beat() {
        let a = analysis();
        let mut rng = rng();
        let e = effect();
        let early = e.strength(&ctx(&a, &mut rng, 0.75));
        let late = e.strength(&ctx(&a, &mut rng, 0.95));
        assert!(early > 0.0);
        assert!(late > early);

        let frame = test_frame(32, 24);
        let mut c = ctx(&a, &mut rng, 0.95);
        assert_ne!(apply_guarded(&mut effect(), &frame, &mut c), frame);
    }

    #[test]
    fn window_param_overrides_analysis() {
        let a = analysis();
        let mut rng = rng();
        let wide = Anticipation::from_spec(
            &EffectSpec::new(EffectType::Anticipation, 1.0, FeatureKind::Beats).with_param("window", serde_json::json!(0.5)),
        );
        assert!(wide.strength(&ctx(&a, &mut rng, 0.6)) > 0.0);
        assert_eq!(effect().strength(&ctx(&a, &mut rng, 0.6)), 0.0);
    }
}
