//! Musical structure derived from raw features: steady beat runs,
//! drops with their buildups, and phrase boundaries.

use super::features::{BeatPattern, BuildupWindow};
use crate::config::DropDetectionConfig;

/// Minimum beats in a steady run.
pub const MIN_PATTERN_BEATS: usize = 5;
/// Allowed deviation of an interval from the run median.
pub const PATTERN_TOLERANCE: f32 = 0.10;
/// Phrase lengths in beats, tried in priority order.
pub const PHRASE_LENGTHS: [usize; 3] = [16, 8, 4];
/// A buildup starts between these many seconds before its drop.
pub const BUILDUP_MAX_LEAD: f32 = 4.0;
pub const BUILDUP_MIN_LEAD: f32 = 2.0;

/// Runs of at least `MIN_PATTERN_BEATS` beats whose inter-beat intervals stay
/// within `PATTERN_TOLERANCE` of the run's median interval.
pub fn detect_beat_patterns(beat_times: &[f32]) -> Vec<BeatPattern> {
    let mut patterns = Vec::new();
    if beat_times.len() < MIN_PATTERN_BEATS {
        return patterns;
    }

    let intervals: Vec<f32> = beat_times.windows(2).map(|w| w[1] - w[0]).collect();
    let mut start = 0;
    while start < intervals.len() {
        // Greedily extend the run while every interval stays near the median.
        let mut end = start + 1;
        while end < intervals.len() {
            let candidate = &intervals[start..=end];
            let med = median(candidate);
            if med <= 0.0 || candidate.iter().any(|&i| ((i - med) / med).abs() >= PATTERN_TOLERANCE) {
                break;
            }
            end += 1;
        }

        let run = &intervals[start..end];
        let beat_count = run.len() + 1;
        let med = median(run);
        let steady = med > 0.0 && run.iter().all(|&i| ((i - med) / med).abs() < PATTERN_TOLERANCE);
        if beat_count >= MIN_PATTERN_BEATS && steady {
            let mean = run.iter().sum::<f32>() / run.len() as f32;
            patterns.push(BeatPattern {
                start_time: beat_times[start],
                end_time: beat_times[end],
                beat_count,
                average_tempo: 60.0 / mean,
            });
            start = end;
        } else {
            start += 1;
        }
    }
    patterns
}

/// Drops are peaks in the smoothed first difference of the normalized
/// energy curve. Returns drop times and their buildup windows.
pub fn detect_drops(
    rms_energy: &[f32],
    frame_rate: f32,
    config: &DropDetectionConfig,
) -> (Vec<f32>, Vec<BuildupWindow>) {
    if rms_energy.len() < 3 || frame_rate <= 0.0 {
        return (Vec::new(), Vec::new());
    }
    let peak = rms_energy.iter().copied().fold(0.0f32, f32::max);
    if peak <= 1e-10 {
        return (Vec::new(), Vec::new());
    }

    let normalized: Vec<f32> = rms_energy.iter().map(|e| e / peak).collect();
    let diff: Vec<f32> = normalized.windows(2).map(|w| w[1] - w[0]).collect();
    let smoothed = gaussian_smooth(&diff, config.gaussian_sigma);
    let energy_smoothed = gaussian_smooth(&normalized, config.gaussian_sigma);

    let peaks = peak_pick(&smoothed, config);
    let mut drops = Vec::with_capacity(peaks.len());
    let mut buildups = Vec::with_capacity(peaks.len());
    for idx in peaks {
        // diff[i] is the change from frame i to i + 1
        let drop_frame = idx + 1;
        let drop_time = drop_frame as f32 / frame_rate;
        drops.push(drop_time);

        let lo = ((drop_time - BUILDUP_MAX_LEAD).max(0.0) * frame_rate) as usize;
        let hi = ((drop_time - BUILDUP_MIN_LEAD).max(0.0) * frame_rate) as usize;
        let start_frame = if hi > lo {
            (lo..=hi.min(energy_smoothed.len() - 1))
                .min_by(|&a, &b| energy_smoothed[a].total_cmp(&energy_smoothed[b]))
                .unwrap_or(lo)
        } else {
            lo
        };
        let start = start_frame as f32 / frame_rate;
        if start < drop_time {
            buildups.push(BuildupWindow {
                start,
                end: drop_time,
            });
        }
    }
    (drops, buildups)
}

/// Beat indices divisible by the first phrase length with at least one full
/// phrase available. Returns the chosen length and boundary times.
pub fn detect_phrase_boundaries(beat_times: &[f32]) -> (Option<usize>, Vec<f32>) {
    for &length in &PHRASE_LENGTHS {
        if beat_times.len() >= length {
            let boundaries = beat_times.iter().step_by(length).copied().collect();
            return (Some(length), boundaries);
        }
    }
    (None, Vec::new())
}

pub fn gaussian_smooth(values: &[f32], sigma: f32) -> Vec<f32> {
    if sigma <= 0.0 || values.is_empty() {
        return values.to_vec();
    }
    let radius = (sigma * 4.0).ceil() as isize;
    let kernel: Vec<f32> = (-radius..=radius)
        .map(|x| (-(x * x) as f32 / (2.0 * sigma * sigma)).exp())
        .collect();
    let n = values.len() as isize;

    (0..n)
        .map(|i| {
            let mut acc = 0.0;
            let mut weight = 0.0;
            for (k, w) in kernel.iter().enumerate() {
                let j = i + k as isize - radius;
                // Reflect at the edges
                let j = if j < 0 { -j - 1 } else if j >= n { 2 * n - j - 1 } else { j };
                if (0..n).contains(&j) {
                    acc += values[j as usize] * w;
                    weight += w;
                }
            }
            if weight > 0.0 { acc / weight } else { 0.0 }
        })
        .collect()
}

/// Indices that are the maximum of their `pre_max`/`post_max` neighborhood,
/// exceed the local mean by `delta`, and follow the previous peak by `wait`.
pub fn peak_pick(values: &[f32], config: &DropDetectionConfig) -> Vec<usize> {
    let n = values.len();
    let mut peaks = Vec::new();
    let mut last: Option<usize> = None;

    for i in 0..n {
        let max_lo = i.saturating_sub(config.pre_max);
        let max_hi = (i + config.post_max + 1).min(n);
        let local_max = values[max_lo..max_hi].iter().copied().fold(f32::MIN, f32::max);
        if values[i] < local_max {
            continue;
        }

        let avg_lo = i.saturating_sub(config.pre_avg);
        let avg_hi = (i + config.post_avg + 1).min(n);
        let local_mean = values[avg_lo..avg_hi].iter().sum::<f32>() / (avg_hi - avg_lo) as f32;
        if values[i] < local_mean + config.delta {
            continue;
        }

        if last.map_or(true, |l| i > l + config.wait) {
            peaks.push(i);
            last = Some(i);
        }
    }
    peaks
}

fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    sorted[sorted.len() / 2]
}
