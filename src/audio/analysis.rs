use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use super::extract::FeatureExtractor;
use super::features::{
    AudioFeatures, BeatPattern, BuildupWindow, FeatureKind, Groove, StructuralMoment,
    BEAT_STRENGTH_FLOOR,
};
use super::structure;
use crate::config::AnalysisConfig;

/// Tempo of the synthetic fallback feature set.
pub const FALLBACK_TEMPO: f32 = 120.0;
/// Returned by `time_to_next_beat` when no beat is known.
pub const DEFAULT_TIME_TO_BEAT: f32 = 0.5;

const BEAT_WINDOW: f32 = 0.1;
const ONSET_WINDOW: f32 = 0.05;
const PHRASE_WINDOW: f32 = 0.25;
const PHRASE_BEAT_BOOST_WINDOW: f32 = 0.1;
const PHRASE_BEAT_BOOST: f32 = 1.5;
const DROP_ONSET_BOOST_WINDOW: f32 = 0.2;
const DROP_ONSET_BOOST: f32 = 2.0;
const DROP_HOLD: f32 = 0.5;
/// Transition points closer than this are merged.
const TRANSITION_MERGE_WINDOW: f32 = 0.1;

/// How musically significant a transition point is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Importance {
    Minor = 1,
    Phrase = 2,
    Drop = 3,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransitionPoint {
    pub time: f32,
    pub importance: Importance,
}

/// Audio features plus everything derived from them. Read-only once built.
#[derive(Clone, Debug)]
pub struct MusicAnalysis {
    pub features: AudioFeatures,
    pub energy: Vec<f32>,
    pub centroid: Vec<f32>,
    pub contrast: Vec<f32>,
    pub beat_patterns: Vec<BeatPattern>,
    pub drops: Vec<f32>,
    pub buildups: Vec<BuildupWindow>,
    pub phrase_boundaries: Vec<f32>,
    pub phrase_length: Option<usize>,
    pub groove: Groove,
    pub anticipation_time: f32,
    /// True when the features are the deterministic fallback set.
    pub synthetic: bool,
}

/// Runs feature extraction and the derived structural analyses.
pub struct MusicAnalyzer {
    extractor: Arc<dyn FeatureExtractor>,
    config: AnalysisConfig,
}

impl MusicAnalyzer {
    pub fn new(extractor: Arc<dyn FeatureExtractor>, config: AnalysisConfig) -> Self {
        Self { extractor, config }
    }

    /// Never fails: undecodable or degenerate audio yields the synthetic
    /// feature set. It covers the decoded duration when one is known, else
    /// `fallback_duration` seconds.
    pub fn analyze(&self, audio_path: &Path, anticipation_time: f32, fallback_duration: f32) -> MusicAnalysis {
        log::info!("Analyzing audio: {}", audio_path.display());
        let features = match self.extractor.decode_and_extract(audio_path) {
            Ok(features) => features,
            Err(err) => {
                log::warn!("Feature extraction failed ({:#}), using synthetic features", err);
                return MusicAnalysis::synthetic(fallback_duration, anticipation_time);
            }
        };

        match self.degeneracy(&features) {
            None => MusicAnalysis::from_features(features, &self.config, anticipation_time),
            Some(reason) => {
                log::warn!("Degenerate audio ({}), using synthetic features", reason);
                let duration = if features.duration.is_finite() && features.duration > 0.0 {
                    features.duration
                } else {
                    fallback_duration
                };
                MusicAnalysis::synthetic(duration, anticipation_time)
            }
        }
    }

    fn degeneracy(&self, features: &AudioFeatures) -> Option<String> {
        if features.duration < self.config.min_duration {
            return Some(format!("{:.2}s long", features.duration));
        }
        let peak_rms = features.rms_energy.iter().copied().fold(0.0f32, f32::max);
        if peak_rms < self.config.silence_rms {
            return Some(format!("peak RMS {:.2e}", peak_rms));
        }
        if features.beat_times.len() < 2 {
            return Some(format!("{} beats", features.beat_times.len()));
        }
        None
    }
}

impl MusicAnalysis {
    pub fn from_features(features: AudioFeatures, config: &AnalysisConfig, anticipation_time: f32) -> Self {
        let features = sanitize(features);
        let energy = normalize_curve(&features.rms_energy);
        let centroid = normalize_curve(&features.spectral_centroid);
        let contrast = normalize_curve(&features.mean_contrast());

        // Independent sub-analyses; each degrades to an empty result.
        let ((beat_patterns, (drops, buildups)), (phrase_length, phrase_boundaries)) = rayon::join(
            || {
                rayon::join(
                    || best_effort("beat patterns", || structure::detect_beat_patterns(&features.beat_times)),
                    || {
                        best_effort("drops", || {
                            structure::detect_drops(&features.rms_energy, features.frame_rate, &config.drops)
                        })
                    },
                )
            },
            || best_effort("phrases", || structure::detect_phrase_boundaries(&features.beat_times)),
        );

        let mean_energy = if energy.is_empty() {
            0.0
        } else {
            energy.iter().sum::<f32>() / energy.len() as f32
        };
        let groove = Groove::classify(features.tempo_bpm, mean_energy);

        log::info!(
            "Structure: {} beat patterns, {} drops, {} phrase boundaries (length {:?}), groove {}",
            beat_patterns.len(),
            drops.len(),
            phrase_boundaries.len(),
            phrase_length,
            groove
        );

        Self {
            features,
            energy,
            centroid,
            contrast,
            beat_patterns,
            drops,
            buildups,
            phrase_boundaries,
            phrase_length,
            groove,
            anticipation_time,
            synthetic: false,
        }
    }

    /// Fallback analysis: 120 BPM grid, neutral groove.
    pub fn synthetic(duration: f32, anticipation_time: f32) -> Self {
        let features = AudioFeatures::synthetic(duration, FALLBACK_TEMPO);
        let mut analysis = Self::from_features(features, &AnalysisConfig::default(), anticipation_time);
        // Flat curves normalize to 1.0; keep them at mid level instead.
        for curve in [&mut analysis.energy, &mut analysis.centroid, &mut analysis.contrast] {
            curve.iter_mut().for_each(|v| *v = 0.5);
        }
        analysis.groove = Groove::default();
        analysis.synthetic = true;
        analysis
    }

    pub fn duration(&self) -> f32 {
        self.features.duration
    }

    pub fn tempo(&self) -> f32 {
        self.features.tempo_bpm
    }

    /// Value of a music feature at `time`, always in [0, 1].
    pub fn feature_at(&self, kind: FeatureKind, time: f32) -> f32 {
        let value = match kind {
            FeatureKind::Beats => self.beat_value(time),
            FeatureKind::Onsets => self.onset_value(time),
            FeatureKind::SpectralContrast => self.curve_at(&self.contrast, time),
            FeatureKind::SpectralCentroid => self.curve_at(&self.centroid, time),
            FeatureKind::Energy => self.curve_at(&self.energy, time),
            FeatureKind::BeatPatternIntensity => self.pattern_value(time),
            FeatureKind::DropProximity => self.drop_proximity(time),
            FeatureKind::PhraseBoundary => {
                window_ramp(nearest_distance(&self.phrase_boundaries, time), PHRASE_WINDOW)
            }
        };
        if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Seconds until the next beat at or after `time`.
    pub fn time_to_next_beat(&self, time: f32) -> f32 {
        let beats = &self.features.beat_times;
        if beats.is_empty() {
            return DEFAULT_TIME_TO_BEAT;
        }
        let idx = beats.partition_point(|&b| b < time);
        if let Some(&next) = beats.get(idx) {
            return next - time;
        }
        // Past the last beat: continue the grid at the track tempo.
        let period = 60.0 / self.features.tempo_bpm;
        if !period.is_finite() || period <= 0.0 {
            return DEFAULT_TIME_TO_BEAT;
        }
        let since = time - beats[beats.len() - 1];
        let rem = since % period;
        if rem <= f32::EPSILON { 0.0 } else { period - rem }
    }

    /// Nearest beat to `time` as `(beat_time, strength)`.
    pub fn nearest_beat(&self, time: f32) -> Option<(f32, f32)> {
        let beats = &self.features.beat_times;
        let idx = nearest_index(beats, time)?;
        Some((beats[idx], self.features.beat_strengths.get(idx).copied().unwrap_or(1.0)))
    }

    pub fn structural_moments(&self) -> Vec<StructuralMoment> {
        let mut moments: Vec<StructuralMoment> = self
            .drops
            .iter()
            .map(|&t| StructuralMoment::Drop(t))
            .chain(self.phrase_boundaries.iter().map(|&t| StructuralMoment::PhraseBoundary(t)))
            .chain(self.buildups.iter().map(|&w| StructuralMoment::Buildup(w)))
            .collect();
        moments.sort_by(|a, b| a.time().total_cmp(&b.time()));
        moments
    }

    /// Union of drops and phrase boundaries, sorted. Points within 0.1 s are
    /// merged and a drop always wins over a phrase boundary.
    pub fn transition_points(&self) -> Vec<TransitionPoint> {
        let mut points: Vec<TransitionPoint> = self
            .drops
            .iter()
            .map(|&time| TransitionPoint {
                time,
                importance: Importance::Drop,
            })
            .chain(self.phrase_boundaries.iter().map(|&time| TransitionPoint {
                time,
                importance: Importance::Phrase,
            }))
            .collect();
        points.sort_by(|a, b| a.time.total_cmp(&b.time).then(b.importance.cmp(&a.importance)));

        let mut merged: Vec<TransitionPoint> = Vec::with_capacity(points.len());
        for point in points {
            match merged.last_mut() {
                Some(last) if point.time - last.time < TRANSITION_MERGE_WINDOW => {
                    if point.importance > last.importance {
                        *last = point;
                    }
                }
                _ => merged.push(point),
            }
        }
        merged
    }

    fn beat_value(&self, time: f32) -> f32 {
        let Some(idx) = nearest_index(&self.features.beat_times, time) else {
            return 0.0;
        };
        let distance = (self.features.beat_times[idx] - time).abs();
        let strength = self.features.beat_strengths.get(idx).copied().unwrap_or(1.0);
        let mut value = strength * window_ramp(distance, BEAT_WINDOW);
        if nearest_distance(&self.phrase_boundaries, time) < PHRASE_BEAT_BOOST_WINDOW {
            value = (value * PHRASE_BEAT_BOOST).min(1.0);
        }
        value
    }

    fn onset_value(&self, time: f32) -> f32 {
        let mut value = window_ramp(nearest_distance(&self.features.onset_times, time), ONSET_WINDOW);
        if nearest_distance(&self.drops, time) < DROP_ONSET_BOOST_WINDOW {
            value = (value * DROP_ONSET_BOOST).min(1.0);
        }
        value
    }

    fn pattern_value(&self, time: f32) -> f32 {
        self.beat_patterns
            .iter()
            .find(|p| time >= p.start_time && time <= p.end_time)
            .map_or(0.0, |p| 0.5 + 0.5 * (p.beat_count as f32 / 16.0).min(1.0))
    }

    fn drop_proximity(&self, time: f32) -> f32 {
        if self.drops.iter().any(|&d| time >= d && time <= d + DROP_HOLD) {
            return 1.0;
        }
        self.buildups
            .iter()
            .filter(|w| time >= w.start && time < w.end && w.end > w.start)
            .map(|w| (time - w.start) / (w.end - w.start))
            .fold(0.0, f32::max)
    }

    fn curve_at(&self, curve: &[f32], time: f32) -> f32 {
        if curve.is_empty() {
            return 0.0;
        }
        let pos = (time * self.features.frame_rate).max(0.0);
        let i = pos.floor() as usize;
        if i + 1 >= curve.len() {
            return curve[curve.len() - 1];
        }
        let frac = pos - i as f32;
        curve[i] * (1.0 - frac) + curve[i + 1] * frac
    }
}

/// Runs a sub-analysis, turning a panic into its empty result.
fn best_effort<T: Default>(name: &str, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => {
            log::warn!("{} analysis failed, continuing without it", name);
            T::default()
        }
    }
}

/// Drops non-finite and non-increasing beats so the timestamp invariants hold.
fn sanitize(mut features: AudioFeatures) -> AudioFeatures {
    let strengths = std::mem::take(&mut features.beat_strengths);
    let mut times = Vec::with_capacity(features.beat_times.len());
    let mut kept = Vec::with_capacity(strengths.len());
    for (i, &t) in features.beat_times.iter().enumerate() {
        if !t.is_finite() || t < 0.0 || times.last().is_some_and(|&last| t <= last) {
            continue;
        }
        times.push(t);
        let s = strengths.get(i).copied().unwrap_or(1.0);
        kept.push(if s.is_finite() { s.clamp(BEAT_STRENGTH_FLOOR, 1.0) } else { 1.0 });
    }
    features.beat_times = times;
    features.beat_strengths = kept;
    features.onset_times.retain(|t| t.is_finite() && *t >= 0.0);
    features.onset_times.sort_by(f32::total_cmp);
    if !features.tempo_bpm.is_finite() || features.tempo_bpm <= 0.0 {
        features.tempo_bpm = FALLBACK_TEMPO;
    }
    if !features.frame_rate.is_finite() || features.frame_rate <= 0.0 {
        features.frame_rate = 1.0;
    }
    features
}

fn normalize_curve(values: &[f32]) -> Vec<f32> {
    let peak = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0f32, f32::max);
    if peak <= 1e-10 {
        return vec![0.0; values.len()];
    }
    values
        .iter()
        .map(|v| if v.is_finite() { (v / peak).clamp(0.0, 1.0) } else { 0.0 })
        .collect()
}

fn nearest_index(sorted: &[f32], time: f32) -> Option<usize> {
    if sorted.is_empty() {
        return None;
    }
    let idx = sorted.partition_point(|&t| t < time);
    if idx == 0 {
        return Some(0);
    }
    if idx >= sorted.len() {
        return Some(sorted.len() - 1);
    }
    if (sorted[idx] - time).abs() < (time - sorted[idx - 1]).abs() {
        Some(idx)
    } else {
        Some(idx - 1)
    }
}

fn nearest_distance(sorted: &[f32], time: f32) -> f32 {
    nearest_index(sorted, time).map_or(f32::INFINITY, |i| (sorted[i] - time).abs())
}

/// 1 at distance 0, falling linearly to 0 at `window`.
fn window_ramp(distance: f32, window: f32) -> f32 {
    if distance >= window {
        0.0
    } else {
        1.0 - distance / window
    }
}
