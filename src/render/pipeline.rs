//! The per-job frame loop: analysis, then one pass over the timeline applying
//! effects and transitions to the current still image.

use image::imageops::FilterType;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::frame::Frame;
use super::images::{FsImageLoader, ImageLoader};
use super::intensity::SegmentIntensityCurve;
use super::transitions::{TransitionSettings, TransitionSystem};
use crate::audio::{FeatureExtractor, MusicAnalysis, MusicAnalyzer, SymphoniaExtractor};
use crate::config::Config;
use crate::effects::{apply_guarded, build_chain, Effect, EffectContext};
use crate::encode::{EncoderFactory, FfmpegFactory, FfmpegSettings, WriterSpec};
use crate::error::RenderError;
use crate::presets::{Preset, PresetStore};

/// Within this distance of a strong beat the image rate doubles.
const BEAT_RATE_WINDOW: f32 = 0.05;
const STRONG_BEAT: f32 = 0.8;
/// Anticipation effects are boosted this close to the next beat.
const ANTICIPATION_BOOST_WINDOW: f32 = 0.3;
const ANTICIPATION_BOOST: f32 = 1.5;

/// Collaborators and settings shared by render jobs. Cheap to clone.
#[derive(Clone)]
pub struct RenderContext {
    pub extractor: Arc<dyn FeatureExtractor>,
    pub images: Arc<dyn ImageLoader>,
    pub encoder: Arc<dyn EncoderFactory>,
    pub presets: Arc<PresetStore>,
    pub config: Config,
}

impl RenderContext {
    /// Production collaborators: symphonia decoding, `image` loading, ffmpeg.
    pub fn new(config: Config, presets: Arc<PresetStore>) -> Self {
        let settings = FfmpegSettings {
            codec: config.output.codec.clone(),
            pix_fmt: config.output.pix_fmt.clone(),
            crf: config.output.crf,
            ..FfmpegSettings::default()
        };
        Self {
            extractor: Arc::new(SymphoniaExtractor::new(&config.analysis)),
            images: Arc::new(FsImageLoader),
            encoder: Arc::new(FfmpegFactory::new(settings)),
            presets,
            config,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn FeatureExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_image_loader(mut self, images: Arc<dyn ImageLoader>) -> Self {
        self.images = images;
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn EncoderFactory>) -> Self {
        self.encoder = encoder;
        self
    }
}

/// One render job's inputs.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub images: Vec<PathBuf>,
    pub audio: PathBuf,
    pub output: PathBuf,
    pub fps: u32,
    /// Requested length in seconds, capped by `render.max_duration`.
    pub duration: f32,
    pub width: u32,
    pub height: u32,
    /// Overrides the preset's effect intensity when set.
    pub effect_intensity: Option<f32>,
    /// Overrides the preset's anticipation window when set.
    pub anticipation_time: Option<f32>,
    pub smart_transitions: bool,
    pub preset: String,
    pub custom_preset: Option<String>,
    pub seed: u64,
}

impl RenderRequest {
    pub fn new(images: Vec<PathBuf>, audio: PathBuf, output: PathBuf) -> Self {
        Self {
            images,
            audio,
            output,
            fps: 30,
            duration: 30.0,
            width: 1080,
            height: 1920,
            effect_intensity: None,
            anticipation_time: None,
            smart_transitions: true,
            preset: crate::presets::DEFAULT_PRESET.to_string(),
            custom_preset: None,
            seed: 42,
        }
    }
}

/// Job-granular cancellation flag, checked before each frame.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderProgress {
    pub frame: u64,
    pub total: u64,
}

fn validate(request: &RenderRequest) -> Result<(), RenderError> {
    if request.images.is_empty() {
        return Err(RenderError::NoImages);
    }
    if let Some(missing) = request.images.iter().find(|p| !p.exists()) {
        return Err(RenderError::ImageNotFound(missing.clone()));
    }
    if !request.audio.exists() {
        return Err(RenderError::AudioNotFound(request.audio.clone()));
    }
    if request.width == 0 || request.height == 0 {
        return Err(RenderError::InvalidResolution {
            width: request.width,
            height: request.height,
        });
    }
    if request.fps == 0 {
        return Err(RenderError::InvalidFps(request.fps));
    }
    if !request.duration.is_finite() || request.duration <= 0.0 {
        return Err(RenderError::InvalidDuration(request.duration));
    }
    Ok(())
}

fn load_images(ctx: &RenderContext, request: &RenderRequest) -> Result<Vec<Frame>, RenderError> {
    let (width, height) = (request.width, request.height);
    request
        .images
        .par_iter()
        .map(|path| {
            let frame = ctx
                .images
                .load_and_resize(path, width, height)
                .map_err(|source| RenderError::ImageLoad {
                    path: path.clone(),
                    source,
                })?;
            if frame.dimensions() == (width, height) {
                Ok(frame)
            } else {
                Ok(image::imageops::resize(&frame, width, height, FilterType::Triangle))
            }
        })
        .collect()
}

/// Render `request` to a video file and return its path.
///
/// Input problems fail before any frame is produced; encoder failures abort
/// the job. Analysis and per-frame effect problems degrade silently.
pub fn render_music_responsive_video(
    ctx: &RenderContext,
    request: &RenderRequest,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(RenderProgress),
) -> Result<PathBuf, RenderError> {
    validate(request)?;

    let max_duration = ctx.config.render.max_duration;
    let duration = if request.duration > max_duration {
        log::warn!(
            "Requested duration {:.1}s exceeds the maximum, capping at {:.1}s",
            request.duration,
            max_duration
        );
        max_duration
    } else {
        request.duration
    };

    let preset = ctx.presets.resolve(&request.preset, request.custom_preset.as_deref());
    let effect_intensity = request.effect_intensity.unwrap_or(preset.effect_intensity);
    let anticipation_time = request.anticipation_time.unwrap_or(preset.anticipation_time);
    log::info!(
        "Rendering {} image(s), {}x{} @ {}fps, {:.1}s, preset '{}'",
        request.images.len(),
        request.width,
        request.height,
        request.fps,
        duration,
        preset.name
    );

    let images = load_images(ctx, request)?;

    let analyzer = MusicAnalyzer::new(Arc::clone(&ctx.extractor), ctx.config.analysis.clone());
    let analysis = analyzer.analyze(&request.audio, anticipation_time, duration);
    log::info!(
        "Music: {:.1} BPM, {} beats, groove {}{}",
        analysis.tempo(),
        analysis.features.beat_times.len(),
        analysis.groove,
        if analysis.synthetic { " (synthetic)" } else { "" }
    );

    let settings = TransitionSettings {
        duration: ctx.config.render.transition_duration,
        min_interval: ctx.config.render.min_transition_interval,
        smart: request.smart_transitions,
    };
    let mut job = RenderJob::new(&analysis, &preset, images, settings, duration, effect_intensity, request);

    let total = ((duration * request.fps as f32).round() as u64).max(1);
    let report_every = (total / 10).max(1);
    let spec = WriterSpec {
        output: request.output.clone(),
        audio: Some(request.audio.clone()),
        fps: request.fps,
        width: request.width,
        height: request.height,
    };
    let mut writer = ctx.encoder.open_writer(&spec).map_err(RenderError::Encoder)?;

    for i in 0..total {
        if cancel.is_cancelled() {
            log::warn!("Render cancelled at frame {}/{}", i, total);
            return Err(RenderError::Cancelled);
        }
        let time = i as f32 / request.fps as f32;
        let frame = job.render_frame(time, 1.0 / request.fps as f32);
        writer.write_frame(&frame).map_err(RenderError::Encoder)?;

        let done = i + 1;
        if done % report_every == 0 || done == total {
            progress(RenderProgress { frame: done, total });
        }
    }

    writer.close().map_err(RenderError::Encoder)?;
    log::info!(
        "Rendered {} frames, {} transitions",
        total,
        job.transitions.state().used_counts.values().sum::<u32>()
    );
    Ok(request.output.clone())
}

/// Mutable state of one job's frame loop.
struct RenderJob<'a> {
    analysis: &'a MusicAnalysis,
    intensity: SegmentIntensityCurve,
    images: Vec<Frame>,
    effects: Vec<Box<dyn Effect>>,
    transitions: TransitionSystem,
    rng: StdRng,
    effect_intensity: f32,
    resolution: (u32, u32),
    image_index: usize,
    /// Fractional progress toward the next image.
    advance: f32,
    last_output: Option<Frame>,
}

impl<'a> RenderJob<'a> {
    fn new(
        analysis: &'a MusicAnalysis,
        preset: &Preset,
        images: Vec<Frame>,
        settings: TransitionSettings,
        duration: f32,
        effect_intensity: f32,
        request: &RenderRequest,
    ) -> Self {
        Self {
            analysis,
            intensity: SegmentIntensityCurve::compute(analysis, duration),
            images,
            effects: build_chain(&preset.effects),
            transitions: TransitionSystem::new(analysis, settings),
            rng: StdRng::seed_from_u64(request.seed),
            effect_intensity,
            resolution: (request.width, request.height),
            image_index: 0,
            advance: 0.0,
            last_output: None,
        }
    }

    fn render_frame(&mut self, time: f32, dt: f32) -> Frame {
        let segment = self.intensity.at(time);
        let mut rate = image_rate(segment);
        if let Some((beat, strength)) = self.analysis.nearest_beat(time) {
            if (beat - time).abs() <= BEAT_RATE_WINDOW && strength > STRONG_BEAT {
                rate *= 2.0;
            }
        }
        self.advance += rate * dt;

        let started = self
            .transitions
            .update(time, self.analysis, self.last_output.as_ref(), &mut self.rng);
        if started.is_some() {
            self.next_image();
            self.advance = 0.0;
        } else if self.advance >= 1.0 {
            self.next_image();
            self.advance -= self.advance.floor();
        }

        let mut frame = self.images[self.image_index].clone();
        let near_beat = self.analysis.time_to_next_beat(time) <= ANTICIPATION_BOOST_WINDOW;
        for effect in self.effects.iter_mut() {
            let mut scale = self.effect_intensity;
            if effect.is_motion() {
                scale *= 0.5 + segment * 0.5;
            }
            if effect.is_anticipation() && near_beat {
                scale *= ANTICIPATION_BOOST;
            }
            let mut ctx = EffectContext {
                time,
                analysis: self.analysis,
                resolution: self.resolution,
                intensity_scale: scale,
                rng: &mut self.rng,
            };
            frame = apply_guarded(effect.as_mut(), &frame, &mut ctx);
        }

        let out = self.transitions.apply(time, &frame);
        self.last_output = Some(out.clone());
        out
    }

    fn next_image(&mut self) {
        if self.images.len() > 1 {
            self.image_index = (self.image_index + 1) % self.images.len();
        }
    }
}

/// Images per second for a segment intensity.
fn image_rate(intensity: f32) -> f32 {
    if intensity > 0.8 {
        1.5
    } else if intensity > 0.5 {
        1.0
    } else {
        0.5
    }
}
