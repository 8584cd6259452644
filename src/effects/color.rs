use super::{finite, Effect, EffectContext, EffectSpec};
use crate::audio::FeatureKind;
use crate::error::EffectError;
use crate::render::frame::{self, Frame};

/// Hue rotation proportional to the feature, with a saturation lift on strong beats.
pub struct ColorShift {
    feature: FeatureKind,
    intensity: f32,
    max_hue: f32,
    saturation_threshold: f32,
}

impl ColorShift {
    pub fn from_spec(spec: &EffectSpec) -> Self {
        Self {
            feature: spec.feature,
            intensity: spec.intensity,
            max_hue: spec.param_f32("max_hue", 60.0),
            saturation_threshold: spec.param_f32("saturation_threshold", 0.8),
        }
    }
}

impl Effect for ColorShift {
    fn name(&self) -> &'static str {
        "color_shift"
    }

    fn apply(&mut self, input: &Frame, ctx: &mut EffectContext<'_>) -> Result<Frame, EffectError> {
        let value = ctx.feature(self.feature);
        let strength = value * self.intensity * ctx.intensity_scale;
        let hue_shift = finite(strength * self.max_hue, "hue shift")?;
        let beat = ctx.feature(FeatureKind::Beats);
        let saturation = if beat > self.saturation_threshold {
            finite(1.0 + 0.3 * self.intensity * ctx.intensity_scale, "saturation")?
        } else {
            1.0
        };
        if hue_shift.abs() < 0.5 && saturation == 1.0 {
            return Ok(input.clone());
        }

        Ok(frame::map_pixels(input, |_, _, p| {
            let (h, s, v) = frame::rgb_to_hsv(p[0], p[1], p[2]);
            let [r, g, b] = frame::hsv_to_rgb(h + hue_shift, s * saturation, v);
            [r, g, b, p[3]]
        }))
    }
}

/// Blend toward a solid color when the feature crosses a threshold.
pub struct Flash {
    feature: FeatureKind,
    intensity: f32,
    threshold: f32,
    color: [u8; 3],
}

/// A flash never fully replaces the image.
const MAX_FLASH: f32 = 0.7;

impl Flash {
    pub fn from_spec(spec: &EffectSpec) -> Self {
        Self {
            feature: spec.feature,
            intensity: spec.intensity,
            threshold: spec.param_f32("threshold", 0.8).clamp(0.0, 0.99),
            color: spec.param_color("color", [255, 255, 255]),
        }
    }
}

impl Effect for Flash {
    fn name(&self) -> &'static str {
        "flash"
    }

    fn apply(&mut self, input: &Frame, ctx: &mut EffectContext<'_>) -> Result<Frame, EffectError> {
        let value = ctx.feature(self.feature);
        if value <= self.threshold {
            return Ok(input.clone());
        }
        let over = (value - self.threshold) / (1.0 - self.threshold);
        let amount = finite(over * self.intensity * ctx.intensity_scale, "flash")?.clamp(0.0, MAX_FLASH);
        Ok(frame::blend_color(input, self.color, amount))
    }
}

/// Edge darkening that opens up as the feature rises.
pub struct Vignette {
    feature: FeatureKind,
    intensity: f32,
}

impl Vignette {
    pub fn from_spec(spec: &EffectSpec) -> Self {
        Self {
            feature: spec.feature,
            intensity: spec.intensity,
        }
    }
}

/// Darken toward the corners; `strength` is the brightness removed at the corners.
pub(crate) fn vignette(input: &Frame, strength: f32) -> Frame {
    let (w, h) = input.dimensions();
    let darkness = strength.clamp(0.0, 1.0);
    frame::map_pixels(input, |x, y, p| {
        let d = frame::radial_distance(x, y, w, h);
        // smoothstep from 0.3 to 1.0 of the radius
        let t = ((d - 0.3) / 0.7).clamp(0.0, 1.0);
        let falloff = t * t * (3.0 - 2.0 * t);
        let keep = 1.0 - darkness * falloff;
        [
            (p[0] as f32 * keep).round() as u8,
            (p[1] as f32 * keep).round() as u8,
            (p[2] as f32 * keep).round() as u8,
            p[3],
        ]
    })
}

impl Effect for Vignette {
    fn name(&self) -> &'static str {
        "vignette"
    }

    fn apply(&mut self, input: &Frame, ctx: &mut EffectContext<'_>) -> Result<Frame, EffectError> {
        let value = ctx.feature(self.feature);
        let strength = finite(0.9 - value * 0.6 * self.intensity * ctx.intensity_scale, "vignette")?.clamp(0.3, 0.9);
        Ok(vignette(input, strength))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{apply_guarded, EffectType};
    use super::*;
    use image::Rgba;

    #[test]
    fn color_shift_rotates_hue() {
        let a = analysis_with_energy(1.0);
        let mut rng = rng();
        let red = Frame::from_pixel(32, 24, Rgba([255, 0, 0, 255]));
        let mut shift = ColorShift::from_spec(&EffectSpec::new(EffectType::ColorShift, 1.0, FeatureKind::Energy));
        let mut c = ctx(&a, &mut rng, 1.0);
        let out = apply_guarded(&mut shift, &red, &mut c);
        let (h, _, _) = frame::rgb_to_hsv(out.get_pixel(0, 0)[0], out.get_pixel(0, 0)[1], out.get_pixel(0, 0)[2]);
        assert!((h - 60.0).abs() < 2.0, "hue {}", h);
    }

    #[test]
    fn color_shift_is_identity_at_zero() {
        let a = analysis_with_energy(0.0);
        let mut rng = rng();
        let frame = test_frame(32, 24);
        let mut shift = ColorShift::from_spec(&EffectSpec::new(EffectType::ColorShift, 1.0, FeatureKind::Energy));
        let mut c = ctx(&a, &mut rng, 1.0);
        assert_eq!(apply_guarded(&mut shift, &frame, &mut c), frame);
    }

    #[test]
    fn strong_beat_lifts_saturation_without_hue_feature() {
        let a = analysis_with_energy(0.0);
        let mut rng = rng();
        let muted = Frame::from_pixel(32, 24, Rgba([200, 100, 100, 255]));
        let mut shift = ColorShift::from_spec(&EffectSpec::new(EffectType::ColorShift, 1.0, FeatureKind::Energy));
        let saturation = |frame: &Frame| {
            let p = frame.get_pixel(5, 5);
            frame::rgb_to_hsv(p[0], p[1], p[2]).1
        };

        // 2.0 s is a full-strength beat
        let mut c = ctx(&a, &mut rng, 2.0);
        let on_beat = apply_guarded(&mut shift, &muted, &mut c);
        assert!(saturation(&on_beat) > saturation(&muted) + 0.1);

        let mut c = ctx(&a, &mut rng, 2.25);
        assert_eq!(apply_guarded(&mut shift, &muted, &mut c), muted);
    }

    #[test]
    fn flash_caps_at_seventy_percent() {
        let a = analysis_with_energy(1.0);
        let mut rng = rng();
        let black = Frame::from_pixel(32, 24, Rgba([0, 0, 0, 255]));
        let mut flash = Flash::from_spec(&EffectSpec::new(EffectType::Flash, 5.0, FeatureKind::Energy));
        let mut c = ctx(&a, &mut rng, 1.0);
        let out = apply_guarded(&mut flash, &black, &mut c);
        let px = out.get_pixel(3, 3).0;
        assert!((178..=179).contains(&px[0]), "{:?}", px);
    }

    #[test]
    fn flash_idle_below_threshold() {
        let a = analysis_with_energy(0.8);
        let mut rng = rng();
        let frame = test_frame(32, 24);
        let mut flash = Flash::from_spec(&EffectSpec::new(EffectType::Flash, 1.0, FeatureKind::Energy));
        let mut c = ctx(&a, &mut rng, 1.0);
        assert_eq!(apply_guarded(&mut flash, &frame, &mut c), frame);
    }

    #[test]
    fn vignette_darkens_corners_more_when_quiet() {
        let white = Frame::from_pixel(32, 24, Rgba([255, 255, 255, 255]));
        let mut rng = rng();
        let mut corner = |level: f32| {
            let a = analysis_with_energy(level);
            let mut v = Vignette::from_spec(&EffectSpec::new(EffectType::Vignette, 1.0, FeatureKind::Energy));
            let mut c = ctx(&a, &mut rng, 1.0);
            let out = apply_guarded(&mut v, &white, &mut c);
            assert_eq!(out.get_pixel(16, 12).0, [255, 255, 255, 255]);
            out.get_pixel(0, 0)[0]
        };
        assert!(corner(0.0) < corner(1.0));
    }
}
