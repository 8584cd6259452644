use anyhow::Result;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use std::path::Path;

use super::decode::{decode_audio, AudioData};
use super::features::{AudioFeatures, BEAT_STRENGTH_FLOOR, CONTRAST_BANDS};
use crate::config::AnalysisConfig;

/// Number of log-spaced bands the spectrum is reduced to for flux and HPSS.
const REDUCED_BANDS: usize = 64;
/// Median filter half-widths for harmonic/percussive separation.
const HPSS_TIME_RADIUS: usize = 8;
const HPSS_FREQ_RADIUS: usize = 4;
const CONTRAST_EDGES_HZ: [f32; CONTRAST_BANDS] = [200.0, 400.0, 800.0, 1600.0, 3200.0, 6400.0];

/// Decodes an audio file and turns it into raw signal features.
pub trait FeatureExtractor: Send + Sync {
    fn decode_and_extract(&self, path: &Path) -> Result<AudioFeatures>;
}

/// Default extractor: symphonia decode, rustfft STFT.
pub struct SymphoniaExtractor {
    fft_size: usize,
    hop_size: usize,
}

impl SymphoniaExtractor {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            fft_size: config.fft_size.max(64),
            hop_size: config.hop_size.max(16),
        }
    }
}

impl FeatureExtractor for SymphoniaExtractor {
    fn decode_and_extract(&self, path: &Path) -> Result<AudioFeatures> {
        let audio = decode_audio(path)?;
        Ok(extract_features(&audio, self.fft_size, self.hop_size))
    }
}

struct FrameSpectrum {
    rms: f32,
    centroid: f32,
    contrast: Vec<f32>,
    chroma: [f32; 12],
    bands: Vec<f32>,
}

pub fn extract_features(audio: &AudioData, fft_size: usize, hop_size: usize) -> AudioFeatures {
    let samples = &audio.samples;
    let sr = audio.sample_rate.max(1);
    let duration = audio.duration();
    let frame_rate = sr as f32 / hop_size as f32;
    let n_frames = samples.len().div_ceil(hop_size).max(1);

    log::info!("STFT: {} frames ({:.1} frames/s)", n_frames, frame_rate);
    let spectra = stft_frames(samples, sr, fft_size, hop_size, n_frames);

    let bands: Vec<&[f32]> = spectra.iter().map(|s| s.bands.as_slice()).collect();
    let envelope = onset_envelope(&bands);
    let (harmonic, percussive) = hpss_energy(&bands);

    let onset_times = pick_onsets(&envelope, frame_rate);
    let tempo_bpm = estimate_tempo(&envelope, frame_rate);
    let (beat_times, beat_strengths) = track_beats(&envelope, frame_rate, tempo_bpm);

    log::info!(
        "Features: onsets={}, beats={}, tempo={:.1} BPM",
        onset_times.len(),
        beat_times.len(),
        tempo_bpm
    );

    AudioFeatures {
        sample_rate: sr,
        duration,
        frame_rate,
        beat_times,
        beat_strengths,
        onset_times,
        tempo_bpm,
        spectral_centroid: spectra.iter().map(|s| s.centroid).collect(),
        spectral_contrast: spectra.iter().map(|s| s.contrast.clone()).collect(),
        rms_energy: spectra.iter().map(|s| s.rms).collect(),
        chroma: spectra.iter().map(|s| s.chroma).collect(),
        harmonic,
        percussive,
    }
}

fn stft_frames(
    samples: &[f32],
    sample_rate: u32,
    fft_size: usize,
    hop_size: usize,
    n_frames: usize,
) -> Vec<FrameSpectrum> {
    let half = fft_size / 2;
    let freq_resolution = sample_rate as f32 / fft_size as f32;
    let nyquist = sample_rate as f32 / 2.0;
    let hann = hann_window(fft_size);
    let band_edges = log_band_edges(half, freq_resolution, nyquist);
    let contrast_edges: Vec<usize> = CONTRAST_EDGES_HZ
        .iter()
        .map(|&hz| ((hz / freq_resolution) as usize).min(half))
        .chain(std::iter::once(half))
        .collect();
    let chroma_classes: Vec<Option<usize>> = (0..half)
        .map(|bin| pitch_class(bin as f32 * freq_resolution))
        .collect();

    (0..n_frames)
        .into_par_iter()
        .map_init(
            || FftPlanner::<f32>::new().plan_fft_forward(fft_size),
            |fft, frame_idx| {
                let start = frame_idx * hop_size;
                let end = (start + fft_size).min(samples.len());
                let window = if start < end { &samples[start..end] } else { &[][..] };

                let mut buffer = vec![Complex::new(0.0f32, 0.0); fft_size];
                for (i, &s) in window.iter().enumerate() {
                    buffer[i] = Complex::new(s * hann[i], 0.0);
                }
                fft.process(&mut buffer);
                let mags: Vec<f32> = buffer[..half].iter().map(|c| c.norm()).collect();

                let rms = if window.is_empty() {
                    0.0
                } else {
                    (window.iter().map(|s| s * s).sum::<f32>() / window.len() as f32).sqrt()
                };

                let total: f32 = mags.iter().sum();
                let centroid = if total > 1e-10 {
                    mags.iter()
                        .enumerate()
                        .map(|(i, &m)| i as f32 * freq_resolution * m)
                        .sum::<f32>()
                        / total
                } else {
                    0.0
                };

                let contrast = contrast_edges
                    .windows(2)
                    .map(|w| band_contrast(&mags[w[0]..w[1]]))
                    .collect();

                let mut chroma = [0.0f32; 12];
                for (bin, class) in chroma_classes.iter().enumerate() {
                    if let Some(c) = class {
                        chroma[*c] += mags[bin] * mags[bin];
                    }
                }
                let peak = chroma.iter().copied().fold(0.0f32, f32::max);
                if peak > 1e-10 {
                    chroma.iter_mut().for_each(|v| *v /= peak);
                }

                let bands = band_edges
                    .windows(2)
                    .map(|w| {
                        let slice = &mags[w[0]..w[1].max(w[0] + 1).min(half)];
                        slice.iter().sum::<f32>() / slice.len().max(1) as f32
                    })
                    .collect();

                FrameSpectrum {
                    rms,
                    centroid,
                    contrast,
                    chroma,
                    bands,
                }
            },
        )
        .collect()
}

/// Bin indices of `REDUCED_BANDS` log-spaced bands between 30 Hz and 16 kHz.
fn log_band_edges(half: usize, freq_resolution: f32, nyquist: f32) -> Vec<usize> {
    let low = 30.0f32;
    let high = nyquist.min(16000.0).max(low * 2.0);
    let ratio = (high / low).ln();
    (0..=REDUCED_BANDS)
        .map(|i| {
            let hz = low * (ratio * i as f32 / REDUCED_BANDS as f32).exp();
            ((hz / freq_resolution) as usize).min(half.saturating_sub(1))
        })
        .collect()
}

/// Peak-minus-valley in log magnitude over the top and bottom 20% of a band.
fn band_contrast(mags: &[f32]) -> f32 {
    if mags.is_empty() {
        return 0.0;
    }
    let mut sorted = mags.to_vec();
    sorted.sort_by(f32::total_cmp);
    let k = (sorted.len() / 5).max(1);
    let valley = sorted[..k].iter().sum::<f32>() / k as f32;
    let peak = sorted[sorted.len() - k..].iter().sum::<f32>() / k as f32;
    ((peak + 1e-10).log10() - (valley + 1e-10).log10()).max(0.0)
}

fn pitch_class(freq: f32) -> Option<usize> {
    if !(32.7..=4186.0).contains(&freq) {
        return None;
    }
    let midi = 12.0 * (freq / 440.0).log2() + 69.0;
    Some((midi.round() as i64).rem_euclid(12) as usize)
}

/// Half-wave rectified log spectral flux over the reduced bands.
fn onset_envelope(bands: &[&[f32]]) -> Vec<f32> {
    let mut envelope = vec![0.0f32; bands.len()];
    for i in 1..bands.len() {
        envelope[i] = bands[i]
            .iter()
            .zip(bands[i - 1].iter())
            .map(|(cur, prev)| (cur.ln_1p() - prev.ln_1p()).max(0.0))
            .sum();
    }
    envelope
}

/// Median-filter harmonic/percussive separation; returns per-frame energies.
fn hpss_energy(bands: &[&[f32]]) -> (Vec<f32>, Vec<f32>) {
    let n = bands.len();
    (0..n)
        .into_par_iter()
        .map(|i| {
            let lo = i.saturating_sub(HPSS_TIME_RADIUS);
            let hi = (i + HPSS_TIME_RADIUS + 1).min(n);
            let row = bands[i];
            let mut harmonic = 0.0f32;
            let mut percussive = 0.0f32;
            for (b, &x) in row.iter().enumerate() {
                let h = median(bands[lo..hi].iter().map(|r| r[b]));
                let fl = b.saturating_sub(HPSS_FREQ_RADIUS);
                let fh = (b + HPSS_FREQ_RADIUS + 1).min(row.len());
                let p = median(row[fl..fh].iter().copied());
                let (h2, p2) = (h * h, p * p);
                let denom = h2 + p2;
                if denom > 1e-12 {
                    harmonic += x * h2 / denom;
                    percussive += x * p2 / denom;
                }
            }
            (harmonic, percussive)
        })
        .unzip()
}

fn median(values: impl Iterator<Item = f32>) -> f32 {
    let mut v: Vec<f32> = values.collect();
    if v.is_empty() {
        return 0.0;
    }
    v.sort_by(f32::total_cmp);
    v[v.len() / 2]
}

/// Adaptive-threshold peak picking on the onset envelope.
fn pick_onsets(envelope: &[f32], frame_rate: f32) -> Vec<f32> {
    let window = ((0.25 * frame_rate) as usize).max(1);
    let mut onsets: Vec<f32> = Vec::new();

    for i in 0..envelope.len() {
        let start = i.saturating_sub(window);
        let end = (i + window + 1).min(envelope.len());
        let local_mean = envelope[start..end].iter().sum::<f32>() / (end - start) as f32;
        let threshold = local_mean * 1.5 + 0.01;

        if envelope[i] <= threshold {
            continue;
        }
        let is_peak = (i == 0 || envelope[i] >= envelope[i - 1])
            && (i + 1 == envelope.len() || envelope[i] >= envelope[i + 1]);
        let time = i as f32 / frame_rate;
        // Minimum gap between onsets (100ms)
        let far_enough = onsets.last().map_or(true, |&last| time - last > 0.1);
        if is_peak && far_enough {
            onsets.push(time);
        }
    }
    onsets
}

/// Autocorrelation tempo estimate over 60-200 BPM; 120 when undetermined.
fn estimate_tempo(envelope: &[f32], frame_rate: f32) -> f32 {
    let mean = envelope.iter().sum::<f32>() / envelope.len().max(1) as f32;
    let centered: Vec<f32> = envelope.iter().map(|v| v - mean).collect();

    let min_lag = ((60.0 / 200.0) * frame_rate).round().max(1.0) as usize;
    let max_lag = ((60.0 / 60.0) * frame_rate).round() as usize;
    if centered.len() <= max_lag + 1 {
        return 120.0;
    }

    let mut best: Option<(usize, f32)> = None;
    for lag in min_lag..=max_lag {
        let corr: f32 = centered[lag..]
            .iter()
            .zip(centered.iter())
            .map(|(a, b)| a * b)
            .sum();
        // Mild preference for tempi near 120 BPM
        let bpm = 60.0 * frame_rate / lag as f32;
        let prior = (-0.5 * (bpm / 120.0).log2().powi(2)).exp();
        let score = corr * prior;
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((lag, score));
        }
    }

    match best {
        Some((lag, score)) if score > 0.0 => 60.0 * frame_rate / lag as f32,
        _ => 120.0,
    }
}

/// Fixed-period beat grid aligned to the onset envelope, each beat snapped
/// to the strongest envelope frame within 10% of a period.
fn track_beats(envelope: &[f32], frame_rate: f32, tempo_bpm: f32) -> (Vec<f32>, Vec<f32>) {
    let max_env = envelope.iter().copied().fold(0.0f32, f32::max);
    if max_env <= 1e-10 || tempo_bpm <= 0.0 {
        return (Vec::new(), Vec::new());
    }
    let period = 60.0 / tempo_bpm * frame_rate;
    if period < 1.0 {
        return (Vec::new(), Vec::new());
    }

    let n = envelope.len();
    let phases = period.round() as usize;
    let best_phase = (0..phases)
        .map(|phase| {
            let mut score = 0.0;
            let mut pos = phase as f32;
            while (pos as usize) < n {
                score += envelope[pos as usize];
                pos += period;
            }
            (phase, score)
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(0, |(phase, _)| phase);

    let radius = (period * 0.1).round() as usize;
    let mut times = Vec::new();
    let mut strengths = Vec::new();
    let mut last_idx: Option<usize> = None;
    let mut center = best_phase as f32;
    while (center as usize) < n {
        let c = center as usize;
        let lo = c.saturating_sub(radius);
        let hi = (c + radius + 1).min(n);
        let idx = (lo..hi)
            .max_by(|&a, &b| envelope[a].total_cmp(&envelope[b]))
            .unwrap_or(c);
        if last_idx.map_or(true, |last| idx > last) {
            times.push(idx as f32 / frame_rate);
            strengths.push((envelope[idx] / max_env).clamp(BEAT_STRENGTH_FLOOR, 1.0));
            last_idx = Some(idx);
        }
        center += period;
    }
    (times, strengths)
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decaying noise-like clicks at `bpm` over a quiet sine bed.
    fn click_track(bpm: f32, seconds: f32, sr: u32) -> AudioData {
        let n = (seconds * sr as f32) as usize;
        let period = (60.0 / bpm * sr as f32) as usize;
        let mut samples = vec![0.0f32; n];
        for (i, s) in samples.iter_mut().enumerate() {
            let t = i as f32 / sr as f32;
            *s = 0.05 * (2.0 * std::f32::consts::PI * 220.0 * t).sin();
            let since = i % period;
            if since < sr as usize / 50 {
                let decay = (-(since as f32) / (sr as f32 / 400.0)).exp();
                let hash = ((i as u32).wrapping_mul(2654435761) >> 16) as f32 / 65535.0;
                *s += decay * (hash * 2.0 - 1.0) * 0.8;
            }
        }
        AudioData {
            samples,
            sample_rate: sr,
        }
    }

    #[test]
    fn click_track_tempo_and_beats() {
        let audio = click_track(120.0, 10.0, 22050);
        let f = extract_features(&audio, 1024, 256);
        assert!((f.tempo_bpm - 120.0).abs() < 6.0, "tempo {}", f.tempo_bpm);
        assert!(f.beat_times.len() >= 15, "beats {}", f.beat_times.len());
        for w in f.beat_times.windows(2) {
            assert!(w[1] > w[0]);
        }
        assert!(f.beat_times.iter().all(|&t| t >= 0.0));
        assert!(f
            .beat_strengths
            .iter()
            .all(|&s| (BEAT_STRENGTH_FLOOR..=1.0).contains(&s)));
        assert!(!f.onset_times.is_empty());
    }

    #[test]
    fn curves_share_frame_count() {
        let audio = click_track(100.0, 3.0, 22050);
        let f = extract_features(&audio, 1024, 512);
        let n = f.frame_count();
        assert_eq!(f.spectral_centroid.len(), n);
        assert_eq!(f.spectral_contrast.len(), n);
        assert_eq!(f.chroma.len(), n);
        assert_eq!(f.harmonic.len(), n);
        assert_eq!(f.percussive.len(), n);
        assert!(f.spectral_contrast.iter().all(|b| b.len() == CONTRAST_BANDS));
    }

    #[test]
    fn silence_has_no_beats() {
        let audio = AudioData {
            samples: vec![0.0; 22050 * 2],
            sample_rate: 22050,
        };
        let f = extract_features(&audio, 1024, 512);
        assert!(f.beat_times.is_empty());
        assert_eq!(f.tempo_bpm, 120.0);
    }

    #[test]
    fn pitch_class_of_a440() {
        assert_eq!(pitch_class(440.0), Some(9));
        assert_eq!(pitch_class(261.63), Some(0));
        assert_eq!(pitch_class(10.0), None);
    }
}
