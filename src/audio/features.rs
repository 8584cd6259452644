use serde::{Deserialize, Serialize};
use std::fmt;

/// Floor applied to every beat strength so no detected beat is mute.
pub const BEAT_STRENGTH_FLOOR: f32 = 0.1;

/// Number of spectral-contrast bands per frame.
pub const CONTRAST_BANDS: usize = 6;

/// Raw per-track features, produced once by a `FeatureExtractor`.
#[derive(Clone, Debug, Default)]
pub struct AudioFeatures {
    pub sample_rate: u32,
    /// Track length in seconds
    pub duration: f32,
    /// Frames per second of every per-frame curve below
    pub frame_rate: f32,
    /// Strictly increasing beat times in seconds
    pub beat_times: Vec<f32>,
    /// Beat strengths parallel to `beat_times`, in [BEAT_STRENGTH_FLOOR, 1]
    pub beat_strengths: Vec<f32>,
    pub onset_times: Vec<f32>,
    pub tempo_bpm: f32,
    /// Spectral centroid per frame (Hz)
    pub spectral_centroid: Vec<f32>,
    /// Spectral contrast per frame, `CONTRAST_BANDS` values each
    pub spectral_contrast: Vec<Vec<f32>>,
    /// RMS energy per frame (linear)
    pub rms_energy: Vec<f32>,
    /// Chroma per frame, 12 pitch classes starting at C
    pub chroma: Vec<[f32; 12]>,
    /// Energy of the harmonic component per frame
    pub harmonic: Vec<f32>,
    /// Energy of the percussive component per frame
    pub percussive: Vec<f32>,
}

impl AudioFeatures {
    /// Deterministic stand-in used when real analysis is impossible:
    /// evenly spaced beats at `tempo_bpm`, flat mid-level curves.
    pub fn synthetic(duration: f32, tempo_bpm: f32) -> Self {
        let duration = duration.max(0.0);
        let period = 60.0 / tempo_bpm.max(1.0);
        let count = (duration / period).ceil() as usize;
        let beat_times: Vec<f32> = (0..count)
            .map(|i| i as f32 * period)
            .filter(|&t| t < duration)
            .collect();
        let beat_strengths = (0..beat_times.len())
            .map(|i| if i % 4 == 0 { 1.0 } else { 0.7 })
            .collect();

        let frame_rate = 10.0;
        let frames = ((duration * frame_rate).ceil() as usize).max(1);

        Self {
            sample_rate: 22050,
            duration,
            frame_rate,
            onset_times: beat_times.clone(),
            beat_times,
            beat_strengths,
            tempo_bpm,
            spectral_centroid: vec![0.5; frames],
            spectral_contrast: vec![vec![0.5; CONTRAST_BANDS]; frames],
            rms_energy: vec![0.5; frames],
            chroma: vec![[1.0 / 12.0; 12]; frames],
            harmonic: vec![0.5; frames],
            percussive: vec![0.5; frames],
        }
    }

    pub fn frame_count(&self) -> usize {
        self.rms_energy.len()
    }

    /// Mean contrast across bands, one value per frame.
    pub fn mean_contrast(&self) -> Vec<f32> {
        self.spectral_contrast
            .iter()
            .map(|bands| {
                if bands.is_empty() {
                    0.0
                } else {
                    bands.iter().sum::<f32>() / bands.len() as f32
                }
            })
            .collect()
    }
}

/// The music feature an effect or transition reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Beats,
    Onsets,
    SpectralContrast,
    SpectralCentroid,
    Energy,
    BeatPatternIntensity,
    DropProximity,
    PhraseBoundary,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 8] = [
        FeatureKind::Beats,
        FeatureKind::Onsets,
        FeatureKind::SpectralContrast,
        FeatureKind::SpectralCentroid,
        FeatureKind::Energy,
        FeatureKind::BeatPatternIntensity,
        FeatureKind::DropProximity,
        FeatureKind::PhraseBoundary,
    ];
}

/// A run of beats with a steady inter-beat interval.
#[derive(Clone, Debug, PartialEq)]
pub struct BeatPattern {
    pub start_time: f32,
    pub end_time: f32,
    pub beat_count: usize,
    pub average_tempo: f32,
}

/// Lead-in window before a drop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BuildupWindow {
    pub start: f32,
    pub end: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StructuralMoment {
    Drop(f32),
    PhraseBoundary(f32),
    Buildup(BuildupWindow),
}

impl StructuralMoment {
    pub fn time(&self) -> f32 {
        match self {
            Self::Drop(t) | Self::PhraseBoundary(t) => *t,
            Self::Buildup(window) => window.start,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pace {
    Slow,
    Medium,
    Fast,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnergyLevel {
    High,
    Low,
}

/// Coarse tempo and energy character of a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Groove {
    pub pace: Pace,
    pub energy: Option<EnergyLevel>,
}

impl Groove {
    pub fn classify(tempo_bpm: f32, mean_energy: f32) -> Self {
        let pace = if tempo_bpm < 85.0 {
            Pace::Slow
        } else if tempo_bpm < 110.0 {
            Pace::Medium
        } else {
            Pace::Fast
        };
        let energy = if mean_energy > 0.7 {
            Some(EnergyLevel::High)
        } else if mean_energy < 0.4 {
            Some(EnergyLevel::Low)
        } else {
            None
        };
        Self { pace, energy }
    }
}

impl Default for Groove {
    fn default() -> Self {
        Self {
            pace: Pace::Medium,
            energy: None,
        }
    }
}

impl fmt::Display for Groove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pace = match self.pace {
            Pace::Slow => "slow",
            Pace::Medium => "medium",
            Pace::Fast => "fast",
        };
        match self.energy {
            Some(EnergyLevel::High) => write!(f, "{}_high_energy", pace),
            Some(EnergyLevel::Low) => write!(f, "{}_low_energy", pace),
            None => f.write_str(pace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_beats_are_even() {
        let f = AudioFeatures::synthetic(60.0, 120.0);
        assert_eq!(f.beat_times.len(), 120);
        assert_eq!(f.beat_strengths.len(), 120);
        for w in f.beat_times.windows(2) {
            assert!((w[1] - w[0] - 0.5).abs() < 1e-4);
        }
        assert!(f.beat_strengths.iter().all(|&s| s >= BEAT_STRENGTH_FLOOR && s <= 1.0));
    }

    #[test]
    fn groove_labels() {
        assert_eq!(Groove::classify(70.0, 0.5).to_string(), "slow");
        assert_eq!(Groove::classify(100.0, 0.8).to_string(), "medium_high_energy");
        assert_eq!(Groove::classify(128.0, 0.2).to_string(), "fast_low_energy");
        assert_eq!(Groove::classify(110.0, 0.5).to_string(), "fast");
        assert_eq!(Groove::classify(85.0, 0.4).to_string(), "medium");
    }

    #[test]
    fn feature_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FeatureKind::DropProximity).unwrap();
        assert_eq!(json, "\"drop_proximity\"");
        let back: FeatureKind = serde_json::from_str("\"beat_pattern_intensity\"").unwrap();
        assert_eq!(back, FeatureKind::BeatPatternIntensity);
    }
}
