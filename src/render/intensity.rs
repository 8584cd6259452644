//! Per-second "how intense is this part of the song" curve driving image pacing
//! and motion-effect scaling.

use crate::audio::{FeatureKind, MusicAnalysis};

/// Raw sampling resolution in seconds.
const SAMPLE_STEP: f32 = 0.5;
const ENERGY_WEIGHT: f32 = 0.4;
const CENTROID_WEIGHT: f32 = 0.3;
const DENSITY_WEIGHT: f32 = 0.3;
const FLOOR: f32 = 0.2;
const FLAT_LEVEL: f32 = 0.6;
const CHANGE_BOOST: f32 = 1.2;

/// One value per second, each in [0.2, 1].
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentIntensityCurve {
    values: Vec<f32>,
}

impl SegmentIntensityCurve {
    pub fn compute(analysis: &MusicAnalysis, render_duration: f32) -> Self {
        let raw = sample_raw(analysis);
        let filtered = moving_average3(&median5(&raw));
        let rescaled = rescale(&filtered);
        let boosted = boost_changes(&rescaled);
        let per_second = block_average(&boosted, (1.0 / SAMPLE_STEP) as usize);
        let seconds = render_duration.max(0.0).ceil() as usize;
        let values = pad(per_second, seconds);
        log::info!(
            "Segment intensity: {} segments, mean {:.2}",
            values.len(),
            values.iter().sum::<f32>() / values.len().max(1) as f32
        );
        Self { values }
    }

    pub fn from_values(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Intensity of the segment containing `time`; the last segment holds.
    pub fn at(&self, time: f32) -> f32 {
        if self.values.is_empty() {
            return FLAT_LEVEL;
        }
        let idx = (time.max(0.0).floor() as usize).min(self.values.len() - 1);
        self.values[idx]
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Weighted energy, centroid and beat density every half second.
fn sample_raw(analysis: &MusicAnalysis) -> Vec<f32> {
    let duration = analysis.duration().max(0.0);
    let count = ((duration / SAMPLE_STEP).ceil() as usize).max(1);
    let beats = &analysis.features.beat_times;

    let density: Vec<f32> = (0..count)
        .map(|i| {
            let start = i as f32 * SAMPLE_STEP;
            let end = start + SAMPLE_STEP;
            let from = beats.partition_point(|&b| b < start);
            let to = beats.partition_point(|&b| b < end);
            (to - from) as f32
        })
        .collect();
    let max_density = density.iter().copied().fold(0.0f32, f32::max);

    (0..count)
        .map(|i| {
            let t = i as f32 * SAMPLE_STEP;
            let d = if max_density > 0.0 { density[i] / max_density } else { 0.0 };
            ENERGY_WEIGHT * analysis.feature_at(FeatureKind::Energy, t)
                + CENTROID_WEIGHT * analysis.feature_at(FeatureKind::SpectralCentroid, t)
                + DENSITY_WEIGHT * d
        })
        .collect()
}

/// Centered window filter; the window shrinks at the edges.
fn window_filter(values: &[f32], radius: usize, reduce: impl Fn(&mut Vec<f32>) -> f32) -> Vec<f32> {
    let mut window = Vec::with_capacity(radius * 2 + 1);
    (0..values.len())
        .map(|i| {
            window.clear();
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(values.len());
            window.extend_from_slice(&values[lo..hi]);
            reduce(&mut window)
        })
        .collect()
}

pub(crate) fn median5(values: &[f32]) -> Vec<f32> {
    window_filter(values, 2, |w| {
        w.sort_by(f32::total_cmp);
        let mid = w.len() / 2;
        if w.len() % 2 == 1 {
            w[mid]
        } else {
            (w[mid - 1] + w[mid]) / 2.0
        }
    })
}

pub(crate) fn moving_average3(values: &[f32]) -> Vec<f32> {
    window_filter(values, 1, |w| w.iter().sum::<f32>() / w.len() as f32)
}

/// Min-max rescale into [0.2, 1]; a flat curve maps to 0.6.
pub(crate) fn rescale(values: &[f32]) -> Vec<f32> {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if !range.is_finite() || range < 1e-6 {
        return vec![FLAT_LEVEL; values.len()];
    }
    values
        .iter()
        .map(|v| FLOOR + (1.0 - FLOOR) * (v - min) / range)
        .collect()
}

/// Raise values where the curve is changing quickly.
pub(crate) fn boost_changes(values: &[f32]) -> Vec<f32> {
    let n = values.len();
    (0..n)
        .map(|i| {
            let rate = match (i.checked_sub(1), (i + 1 < n).then_some(i + 1)) {
                (Some(a), Some(b)) => (values[b] - values[a]).abs() / 2.0,
                (None, Some(b)) => (values[b] - values[i]).abs(),
                (Some(a), None) => (values[i] - values[a]).abs(),
                (None, None) => 0.0,
            };
            (values[i] + rate * CHANGE_BOOST).clamp(0.0, 1.0)
        })
        .collect()
}

pub(crate) fn block_average(values: &[f32], block: usize) -> Vec<f32> {
    values
        .chunks(block.max(1))
        .map(|c| c.iter().sum::<f32>() / c.len() as f32)
        .collect()
}

fn pad(mut values: Vec<f32>, len: usize) -> Vec<f32> {
    let fill = values.last().copied().unwrap_or(FLAT_LEVEL);
    if values.len() < len {
        values.resize(len, fill);
    }
    values
}
