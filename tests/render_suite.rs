use anyhow::{bail, Result};
use image::Rgba;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use beatreel::audio::{AudioFeatures, FeatureExtractor};
use beatreel::config::Config;
use beatreel::encode::{EncoderFactory, VideoWriter, WriterSpec};
use beatreel::render::frame::Frame;
use beatreel::render::images::ImageLoader;
use beatreel::{
    render_music_responsive_video, CancelToken, Preset, PresetStore, RenderContext, RenderError, RenderProgress,
    RenderRequest,
};

struct FixedExtractor(AudioFeatures);

impl FeatureExtractor for FixedExtractor {
    fn decode_and_extract(&self, _path: &Path) -> Result<AudioFeatures> {
        Ok(self.0.clone())
    }
}

struct BrokenExtractor;

impl FeatureExtractor for BrokenExtractor {
    fn decode_and_extract(&self, _path: &Path) -> Result<AudioFeatures> {
        bail!("not audio")
    }
}

/// Solid frames whose color depends on the digit in the file name.
struct SolidImages;

impl ImageLoader for SolidImages {
    fn load_and_resize(&self, path: &Path, width: u32, height: u32) -> Result<Frame> {
        let digit = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.chars().last())
            .and_then(|c| c.to_digit(10))
            .unwrap_or(0);
        let shade = (digit * 60).min(240) as u8;
        Ok(Frame::from_pixel(width, height, Rgba([shade, 255 - shade, 128, 255])))
    }
}

#[derive(Default)]
struct Recorded {
    spec: Option<WriterSpec>,
    frames: Vec<Frame>,
    closed: bool,
}

#[derive(Clone, Default)]
struct RecordingEncoder {
    recorded: Arc<Mutex<Recorded>>,
    fail_after: Option<usize>,
}

struct RecordingWriter {
    recorded: Arc<Mutex<Recorded>>,
    fail_after: Option<usize>,
}

impl EncoderFactory for RecordingEncoder {
    fn open_writer(&self, spec: &WriterSpec) -> Result<Box<dyn VideoWriter>> {
        self.recorded.lock().unwrap().spec = Some(spec.clone());
        Ok(Box::new(RecordingWriter {
            recorded: Arc::clone(&self.recorded),
            fail_after: self.fail_after,
        }))
    }
}

impl VideoWriter for RecordingWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mut rec = self.recorded.lock().unwrap();
        if self.fail_after.is_some_and(|n| rec.frames.len() >= n) {
            bail!("disk full");
        }
        rec.frames.push(frame.clone());
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.recorded.lock().unwrap().closed = true;
        Ok(())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    images: Vec<PathBuf>,
    audio: PathBuf,
    output: PathBuf,
}

fn fixture(image_count: usize) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let images: Vec<PathBuf> = (0..image_count)
        .map(|i| {
            let p = dir.path().join(format!("img{}.png", i));
            std::fs::write(&p, b"placeholder").unwrap();
            p
        })
        .collect();
    let audio = dir.path().join("track.wav");
    std::fs::write(&audio, b"placeholder").unwrap();
    let output = dir.path().join("out.mp4");
    Fixture {
        _dir: dir,
        images,
        audio,
        output,
    }
}

fn context(extractor: Arc<dyn FeatureExtractor>, encoder: RecordingEncoder) -> RenderContext {
    RenderContext::new(Config::default(), Arc::new(PresetStore::in_memory()))
        .with_extractor(extractor)
        .with_image_loader(Arc::new(SolidImages))
        .with_encoder(Arc::new(encoder))
}

fn request(f: &Fixture, duration: f32, fps: u32) -> RenderRequest {
    let mut r = RenderRequest::new(f.images.clone(), f.audio.clone(), f.output.clone());
    r.duration = duration;
    r.fps = fps;
    r.width = 48;
    r.height = 32;
    r
}

fn music(duration: f32) -> Arc<dyn FeatureExtractor> {
    let mut features = AudioFeatures::synthetic(duration, 128.0);
    let frames = features.rms_energy.len();
    features.rms_energy = (0..frames).map(|i| if i < frames / 2 { 0.2 } else { 1.0 }).collect();
    features.spectral_centroid = (0..frames).map(|i| (i % 17) as f32).collect();
    Arc::new(FixedExtractor(features))
}

#[test]
fn three_second_standard_render_emits_thirty_frames() {
    let f = fixture(1);
    let encoder = RecordingEncoder::default();
    let ctx = context(Arc::new(BrokenExtractor), encoder.clone());
    let req = request(&f, 3.0, 10);

    let mut reports = Vec::new();
    let out = render_music_responsive_video(&ctx, &req, &CancelToken::new(), &mut |p: RenderProgress| reports.push(p))
        .unwrap();

    assert_eq!(out, f.output);
    let rec = encoder.recorded.lock().unwrap();
    assert_eq!(rec.frames.len(), 30);
    assert!(rec.frames.iter().all(|fr| fr.dimensions() == (48, 32)));
    assert!(rec.closed);
    let spec = rec.spec.as_ref().unwrap();
    assert_eq!((spec.fps, spec.width, spec.height), (10, 48, 32));
    assert_eq!(spec.audio.as_deref(), Some(f.audio.as_path()));

    assert_eq!(reports.last(), Some(&RenderProgress { frame: 30, total: 30 }));
    assert!(reports.len() <= 11);
    assert!(reports.windows(2).all(|w| w[0].frame < w[1].frame));
}

#[test]
fn every_preset_renders_with_real_structure() {
    for name in ["standard", "subtle", "intense", "cinematic", "glitch", "unknown-preset"] {
        let f = fixture(3);
        let encoder = RecordingEncoder::default();
        let ctx = context(music(12.0), encoder.clone());
        let mut req = request(&f, 12.0, 8);
        req.preset = name.to_string();
        render_music_responsive_video(&ctx, &req, &CancelToken::new(), &mut |_| {}).unwrap();
        let rec = encoder.recorded.lock().unwrap();
        assert_eq!(rec.frames.len(), 96, "{}", name);
        assert!(rec.frames.iter().all(|fr| fr.dimensions() == (48, 32)), "{}", name);
    }
}

#[test]
fn same_seed_renders_identically() {
    let render = |seed: u64| {
        let f = fixture(2);
        let encoder = RecordingEncoder::default();
        let ctx = context(music(6.0), encoder.clone());
        let mut req = request(&f, 6.0, 10);
        req.preset = "intense".into();
        req.seed = seed;
        render_music_responsive_video(&ctx, &req, &CancelToken::new(), &mut |_| {}).unwrap();
        let frames = std::mem::take(&mut encoder.recorded.lock().unwrap().frames);
        frames
    };
    assert_eq!(render(5), render(5));
}

#[test]
fn multiple_images_are_all_shown() {
    let f = fixture(3);
    let encoder = RecordingEncoder::default();
    let ctx = context(music(20.0), encoder.clone());
    let mut req = request(&f, 20.0, 5);
    req.preset = "subtle".into();
    req.effect_intensity = Some(0.0);
    render_music_responsive_video(&ctx, &req, &CancelToken::new(), &mut |_| {}).unwrap();

    let rec = encoder.recorded.lock().unwrap();
    let solid: Vec<Frame> = f
        .images
        .iter()
        .map(|p| SolidImages.load_and_resize(p, 48, 32).unwrap())
        .collect();
    for image in &solid {
        let center = image.get_pixel(24, 16);
        assert!(
            rec.frames.iter().any(|fr| fr.get_pixel(24, 16) == center),
            "image {:?} never shown",
            center
        );
    }
}

#[test]
fn input_errors_fail_before_any_frame() {
    let f = fixture(1);
    let encoder = RecordingEncoder::default();
    let ctx = context(music(3.0), encoder.clone());

    let mut no_images = request(&f, 3.0, 10);
    no_images.images.clear();
    let err = render_music_responsive_video(&ctx, &no_images, &CancelToken::new(), &mut |_| {}).unwrap_err();
    assert!(matches!(err, RenderError::NoImages));
    assert!(err.is_input_error());

    let mut bad_res = request(&f, 3.0, 10);
    bad_res.height = 0;
    let err = render_music_responsive_video(&ctx, &bad_res, &CancelToken::new(), &mut |_| {}).unwrap_err();
    assert!(matches!(err, RenderError::InvalidResolution { .. }));

    let mut no_audio = request(&f, 3.0, 10);
    no_audio.audio = PathBuf::from("/definitely/not/here.mp3");
    let err = render_music_responsive_video(&ctx, &no_audio, &CancelToken::new(), &mut |_| {}).unwrap_err();
    assert!(matches!(err, RenderError::AudioNotFound(_)));

    let rec = encoder.recorded.lock().unwrap();
    assert!(rec.spec.is_none());
    assert!(rec.frames.is_empty());
}

#[test]
fn duration_is_capped() {
    let f = fixture(1);
    let encoder = RecordingEncoder::default();
    let mut cfg = Config::default();
    cfg.render.max_duration = 2.0;
    let ctx = RenderContext::new(cfg, Arc::new(PresetStore::in_memory()))
        .with_extractor(music(10.0))
        .with_image_loader(Arc::new(SolidImages))
        .with_encoder(Arc::new(encoder.clone()));
    render_music_responsive_video(&ctx, &request(&f, 10.0, 10), &CancelToken::new(), &mut |_| {}).unwrap();
    assert_eq!(encoder.recorded.lock().unwrap().frames.len(), 20);
}

#[test]
fn encoder_failure_aborts_the_job() {
    let f = fixture(1);
    let encoder = RecordingEncoder {
        fail_after: Some(5),
        ..Default::default()
    };
    let ctx = context(music(3.0), encoder.clone());
    let err = render_music_responsive_video(&ctx, &request(&f, 3.0, 10), &CancelToken::new(), &mut |_| {})
        .unwrap_err();
    assert!(matches!(err, RenderError::Encoder(_)));
    assert!(!err.is_input_error());
    let rec = encoder.recorded.lock().unwrap();
    assert_eq!(rec.frames.len(), 5);
    assert!(!rec.closed);
}

#[test]
fn cancelled_job_stops_before_next_frame() {
    let f = fixture(1);
    let encoder = RecordingEncoder::default();
    let ctx = context(music(3.0), encoder.clone());
    let token = CancelToken::new();
    let trigger = token.clone();
    let err = render_music_responsive_video(&ctx, &request(&f, 3.0, 10), &token, &mut |p: RenderProgress| {
        if p.frame >= 9 {
            trigger.cancel();
        }
    })
    .unwrap_err();
    assert!(matches!(err, RenderError::Cancelled));
    assert_eq!(encoder.recorded.lock().unwrap().frames.len(), 9);
}

#[test]
fn custom_preset_round_trips_and_drives_the_render() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(PresetStore::open(dir.path()).unwrap());
    let preset = Preset::from_json(
        r#"{
            "name": "Only Flash",
            "effect_intensity": 1.0,
            "anticipation_time": 0.1,
            "effects": [{ "type": "flash", "intensity": 1.0, "feature": "beats", "params": { "threshold": 0.5 } }]
        }"#,
    )
    .unwrap();
    let id = store.create(preset.clone()).unwrap();
    assert_eq!(store.get(&id), Some(preset));

    let f = fixture(1);
    let encoder = RecordingEncoder::default();
    let ctx = RenderContext::new(Config::default(), Arc::clone(&store))
        .with_extractor(Arc::new(BrokenExtractor))
        .with_image_loader(Arc::new(SolidImages))
        .with_encoder(Arc::new(encoder.clone()));
    let mut req = request(&f, 2.0, 10);
    req.custom_preset = Some(id);
    render_music_responsive_video(&ctx, &req, &CancelToken::new(), &mut |_| {}).unwrap();

    let rec = encoder.recorded.lock().unwrap();
    // frame 0 sits on a strong beat and flashes toward white
    let base = SolidImages.load_and_resize(&f.images[0], 48, 32).unwrap();
    assert!(rec.frames[0].get_pixel(24, 16)[0] > base.get_pixel(24, 16)[0]);
}

#[test]
fn jobs_run_concurrently_without_interference() {
    let handles: Vec<_> = (0..3)
        .map(|_| {
            std::thread::spawn(|| {
                let f = fixture(2);
                let encoder = RecordingEncoder::default();
                let ctx = context(music(4.0), encoder.clone());
                let mut req = request(&f, 4.0, 10);
                req.preset = "glitch".into();
                render_music_responsive_video(&ctx, &req, &CancelToken::new(), &mut |_| {}).unwrap();
                let frames = std::mem::take(&mut encoder.recorded.lock().unwrap().frames);
                frames
            })
        })
        .collect();
    let results: Vec<Vec<Frame>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results[0], results[1]);
    assert_eq!(results[1], results[2]);
}
