//! Transition state machine: decides when a transition starts, which type it
//! uses, and blends the outgoing frame into the incoming one.

mod renderers;

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::audio::{FeatureKind, Importance, MusicAnalysis, TransitionPoint};
use crate::render::frame::Frame;

pub use renderers::{render, Direction, Variant};

/// Distance within which a scheduled point fires.
const SCHEDULE_WINDOW: f32 = 0.1;
const DROP_TRIGGER: f32 = 0.95;
const PHRASE_TRIGGER: f32 = 0.8;
const PATTERN_TRIGGER: f32 = 0.8;
const PATTERN_BEAT_TRIGGER: f32 = 0.95;
/// Beats between transitions when smart selection is off.
const FIXED_BEAT_INTERVAL: usize = 8;
const USAGE_PENALTY: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    Crossfade,
    Zoom,
    Slide,
    Wipe,
    Dissolve,
    FadeToBlack,
    Radial,
    Spiral,
    Pixelate,
    Spin,
    FlashFade,
    Glitch,
}

impl TransitionType {
    pub const ALL: [TransitionType; 12] = [
        TransitionType::Crossfade,
        TransitionType::Zoom,
        TransitionType::Slide,
        TransitionType::Wipe,
        TransitionType::Dissolve,
        TransitionType::FadeToBlack,
        TransitionType::Radial,
        TransitionType::Spiral,
        TransitionType::Pixelate,
        TransitionType::Spin,
        TransitionType::FlashFade,
        TransitionType::Glitch,
    ];
}

/// Weighted candidates for a transition of the given importance.
pub fn candidates(importance: Importance, energy: f32) -> Vec<(TransitionType, f32)> {
    use TransitionType::*;
    let mut list = match importance {
        Importance::Drop => vec![(FlashFade, 1.0), (Zoom, 0.8), (Glitch, 0.8)],
        Importance::Phrase => vec![(Crossfade, 1.0), (Slide, 0.8), (Wipe, 0.8), (Dissolve, 0.6)],
        Importance::Minor => vec![(Crossfade, 1.0), (Dissolve, 0.7), (Zoom, 0.5)],
    };
    match importance {
        Importance::Drop if energy > 0.7 => list.extend([(Spin, 0.6), (Radial, 0.6)]),
        Importance::Phrase if energy > 0.6 => list.extend([(Zoom, 0.5), (Radial, 0.5)]),
        Importance::Minor if energy > 0.7 => list.push((Slide, 0.5)),
        _ => {}
    }
    list
}

/// Mutable transition state of one render job.
#[derive(Clone, Debug, Default)]
pub struct TransitionState {
    pub is_transitioning: bool,
    pub transition_type: Option<TransitionType>,
    pub start_time: f32,
    pub progress: f32,
    pub previous_frame: Option<Frame>,
    pub current_frame: Option<Frame>,
    pub used_counts: HashMap<TransitionType, u32>,
    pub variant: Variant,
    /// Start time of the most recent transition, for debouncing.
    pub last_start: Option<f32>,
}

#[derive(Clone, Copy, Debug)]
pub struct TransitionSettings {
    pub duration: f32,
    pub min_interval: f32,
    pub smart: bool,
}

pub struct TransitionSystem {
    state: TransitionState,
    settings: TransitionSettings,
    points: Vec<TransitionPoint>,
    next_point: usize,
    last_fixed_beat: Option<usize>,
}

impl TransitionSystem {
    pub fn new(analysis: &MusicAnalysis, settings: TransitionSettings) -> Self {
        let points = analysis.transition_points();
        log::debug!(
            "Transition system: {} scheduled points, smart={}",
            points.len(),
            settings.smart
        );
        Self {
            state: TransitionState::default(),
            settings: TransitionSettings {
                duration: settings.duration.max(1e-3),
                ..settings
            },
            points,
            next_point: 0,
            last_fixed_beat: None,
        }
    }

    pub fn state(&self) -> &TransitionState {
        &self.state
    }

    pub fn is_transitioning(&self) -> bool {
        self.state.is_transitioning
    }

    /// Decide whether a transition should start at `time`, ignoring the debounce.
    fn trigger(&mut self, time: f32, analysis: &MusicAnalysis) -> Option<Importance> {
        if !self.settings.smart {
            return self.fixed_trigger(time, analysis);
        }

        while self
            .points
            .get(self.next_point)
            .is_some_and(|p| p.time < time - SCHEDULE_WINDOW)
        {
            self.next_point += 1;
        }
        if let Some(point) = self.points.get(self.next_point) {
            if (point.time - time).abs() <= SCHEDULE_WINDOW {
                // Consumed even if the debounce or a missing frame then blocks the start.
                self.next_point += 1;
                return Some(point.importance);
            }
        }

        if analysis.feature_at(FeatureKind::DropProximity, time) > DROP_TRIGGER {
            return Some(Importance::Drop);
        }
        if analysis.feature_at(FeatureKind::PhraseBoundary, time) > PHRASE_TRIGGER {
            return Some(Importance::Phrase);
        }
        if analysis.feature_at(FeatureKind::BeatPatternIntensity, time) > PATTERN_TRIGGER
            && analysis.feature_at(FeatureKind::Beats, time) > PATTERN_BEAT_TRIGGER
        {
            return Some(Importance::Minor);
        }
        None
    }

    fn fixed_trigger(&mut self, time: f32, analysis: &MusicAnalysis) -> Option<Importance> {
        let beats = &analysis.features.beat_times;
        let idx = beats.partition_point(|&b| b < time - SCHEDULE_WINDOW);
        let beat = *beats.get(idx)?;
        if idx == 0 || idx % FIXED_BEAT_INTERVAL != 0 || (beat - time).abs() > SCHEDULE_WINDOW {
            return None;
        }
        if self.last_fixed_beat == Some(idx) {
            return None;
        }
        self.last_fixed_beat = Some(idx);
        Some(Importance::Minor)
    }

    /// Self-balancing weighted pick among the candidates for `importance`.
    pub fn choose_type(&self, importance: Importance, energy: f32, rng: &mut StdRng) -> TransitionType {
        let list = if self.settings.smart {
            candidates(importance, energy)
        } else {
            TransitionType::ALL.iter().map(|&t| (t, 1.0)).collect()
        };
        let weighted: Vec<(TransitionType, f32)> = list
            .into_iter()
            .map(|(kind, base)| {
                let used = self.state.used_counts.get(&kind).copied().unwrap_or(0) as f32;
                (kind, base / (1.0 + used * USAGE_PENALTY))
            })
            .collect();
        let total: f32 = weighted.iter().map(|(_, w)| w).sum();
        let mut pick = rng.random::<f32>() * total;
        for &(kind, weight) in &weighted {
            if pick < weight {
                return kind;
            }
            pick -= weight;
        }
        weighted.last().map_or(TransitionType::Crossfade, |&(kind, _)| kind)
    }

    /// Check the triggers at `time` and start a transition away from
    /// `last_output` if one fires. Returns the chosen type on a start.
    pub fn update(
        &mut self,
        time: f32,
        analysis: &MusicAnalysis,
        last_output: Option<&Frame>,
        rng: &mut StdRng,
    ) -> Option<TransitionType> {
        if self.state.is_transitioning {
            return None;
        }
        let importance = self.trigger(time, analysis)?;
        if self
            .state
            .last_start
            .is_some_and(|start| time - start < self.settings.min_interval)
        {
            return None;
        }
        let previous = last_output?;

        let energy = analysis.feature_at(FeatureKind::Energy, time);
        let kind = self.choose_type(importance, energy, rng);
        let variant = Variant {
            direction: Direction::ALL[rng.random_range(0..Direction::ALL.len())],
            seed: rng.random(),
        };
        log::debug!("Transition {:?} at {:.2}s (importance {:?})", kind, time, importance);

        let state = &mut self.state;
        state.is_transitioning = true;
        state.transition_type = Some(kind);
        state.start_time = time;
        state.progress = 0.0;
        state.previous_frame = Some(previous.clone());
        state.current_frame = None;
        state.variant = variant;
        state.last_start = Some(time);
        Some(kind)
    }

    /// Blend the active transition over `current`. Passes `current` through
    /// when idle and completes the transition once progress reaches 1.
    pub fn apply(&mut self, time: f32, current: &Frame) -> Frame {
        let state = &mut self.state;
        let (Some(kind), Some(previous)) = (state.transition_type, state.previous_frame.as_ref()) else {
            return current.clone();
        };
        if !state.is_transitioning {
            return current.clone();
        }

        let raw = ((time - state.start_time) / self.settings.duration).clamp(0.0, 1.0);
        state.progress = state.progress.max(raw);
        let out = render(kind, previous, current, state.progress, state.variant);
        state.current_frame = Some(current.clone());

        if state.progress >= 1.0 {
            *state.used_counts.entry(kind).or_insert(0) += 1;
            state.is_transitioning = false;
            state.previous_frame = None;
            state.current_frame = None;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::features::{BeatPattern, BuildupWindow};
    use image::Rgba;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn settings(smart: bool) -> TransitionSettings {
        TransitionSettings {
            duration: 0.5,
            min_interval: 2.0,
            smart,
        }
    }

    fn solid(v: u8) -> Frame {
        Frame::from_pixel(16, 12, Rgba([v, v, v, 255]))
    }

    /// 20 s grid at 120 BPM with nothing scheduled, so only features can trigger.
    fn unscheduled() -> MusicAnalysis {
        let mut a = MusicAnalysis::synthetic(20.0, 0.2);
        a.drops.clear();
        a.phrase_boundaries.clear();
        a.buildups.clear();
        a.beat_patterns.clear();
        a
    }

    fn kinds(importance: Importance) -> HashSet<TransitionType> {
        candidates(importance, 0.5).into_iter().map(|(kind, _)| kind).collect()
    }

    fn fire(analysis: &MusicAnalysis, time: f32, seed: u64) -> Option<TransitionType> {
        let mut system = TransitionSystem::new(analysis, settings(true));
        let mut rng = StdRng::seed_from_u64(seed);
        system.update(time, analysis, Some(&solid(0)), &mut rng)
    }

    #[test]
    fn drop_candidates_at_high_energy() {
        let analysis = MusicAnalysis::synthetic(10.0, 0.2);
        let system = TransitionSystem::new(&analysis, settings(true));
        let allowed: HashSet<_> = [
            TransitionType::FlashFade,
            TransitionType::Zoom,
            TransitionType::Glitch,
            TransitionType::Spin,
            TransitionType::Radial,
        ]
        .into_iter()
        .collect();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let kind = system.choose_type(Importance::Drop, 0.9, &mut rng);
            assert!(allowed.contains(&kind), "{:?}", kind);
        }
    }

    #[test]
    fn used_types_lose_weight() {
        let analysis = MusicAnalysis::synthetic(10.0, 0.2);
        let mut system = TransitionSystem::new(&analysis, settings(true));
        system.state.used_counts.insert(TransitionType::Crossfade, 20);
        let mut rng = StdRng::seed_from_u64(11);
        let crossfades = (0..300)
            .filter(|_| system.choose_type(Importance::Minor, 0.5, &mut rng) == TransitionType::Crossfade)
            .count();
        // weight 1/11 against 0.7 + 0.5
        assert!(crossfades < 60, "{}", crossfades);
    }

    #[test]
    fn same_seed_same_choices() {
        let analysis = MusicAnalysis::synthetic(10.0, 0.2);
        let system = TransitionSystem::new(&analysis, settings(true));
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..20)
                .map(|_| system.choose_type(Importance::Phrase, 0.8, &mut rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(5), draw(5));
    }

    #[test]
    fn progress_is_monotonic_and_completes() {
        let analysis = MusicAnalysis::synthetic(20.0, 0.2);
        let mut system = TransitionSystem::new(&analysis, settings(true));
        let mut rng = StdRng::seed_from_u64(1);
        let prev = solid(0);
        let curr = solid(200);

        // phrase boundary at 8.0 s (16-beat phrases)
        let kind = system.update(8.0, &analysis, Some(&prev), &mut rng);
        assert!(kind.is_some());
        assert!(system.is_transitioning());

        let mut last = -1.0;
        for step in 0..=6 {
            let t = 8.0 + step as f32 * 0.1;
            system.apply(t, &curr);
            let progress = system.state().progress;
            assert!(progress >= last);
            last = progress;
        }
        assert!(!system.is_transitioning());
        assert_eq!(system.state().used_counts.values().sum::<u32>(), 1);
        assert_eq!(system.apply(9.0, &curr), curr);
    }

    #[test]
    fn no_second_transition_while_active_or_debounced() {
        let analysis = MusicAnalysis::synthetic(20.0, 0.2);
        let mut system = TransitionSystem::new(&analysis, settings(true));
        let mut rng = StdRng::seed_from_u64(1);
        let prev = solid(0);
        assert!(system.update(0.0, &analysis, Some(&prev), &mut rng).is_some());
        assert!(system.update(0.05, &analysis, Some(&prev), &mut rng).is_none());
        system.apply(0.6, &prev);
        assert!(!system.is_transitioning());
        // the boundary at 8.0 s is past the debounce window
        assert!(system.update(8.0, &analysis, Some(&prev), &mut rng).is_some());
    }

    #[test]
    fn fixed_mode_reaches_every_renderer() {
        let analysis = MusicAnalysis::synthetic(20.0, 0.2);
        let mut system = TransitionSystem::new(&analysis, settings(false));
        let mut rng = StdRng::seed_from_u64(9);
        let mut seen = HashSet::new();
        for _ in 0..400 {
            seen.insert(system.choose_type(Importance::Minor, 0.5, &mut rng));
        }
        assert_eq!(seen.len(), 12);

        let prev = solid(0);
        // beat 8 at 4.0 s, beat 4 at 2.0 s is not a multiple of 8
        assert!(system.update(2.0, &analysis, Some(&prev), &mut rng).is_none());
        assert!(system.update(4.0, &analysis, Some(&prev), &mut rng).is_some());
    }

    #[test]
    fn buildup_end_triggers_drop_transition() {
        let mut a = unscheduled();
        a.buildups = vec![BuildupWindow { start: 5.0, end: 7.0 }];
        assert!(a.transition_points().is_empty());
        // proximity 0.9 at 6.8 s, 0.975 at 6.95 s
        assert_eq!(fire(&a, 6.8, 1), None);
        for seed in 0..20 {
            let kind = fire(&a, 6.95, seed).unwrap();
            assert!(kinds(Importance::Drop).contains(&kind), "{:?}", kind);
        }
    }

    #[test]
    fn phrase_feature_triggers_without_scheduled_point() {
        let a = unscheduled();
        let mut featured = a.clone();
        featured.phrase_boundaries = vec![12.0];
        let mut system = TransitionSystem::new(&a, settings(true));
        let mut rng = StdRng::seed_from_u64(4);
        let prev = solid(0);
        // 0.2 s away scores 0.2, 0.02 s away scores 0.92
        assert_eq!(system.update(11.8, &featured, Some(&prev), &mut rng), None);
        let kind = system.update(12.02, &featured, Some(&prev), &mut rng).unwrap();
        assert!(kinds(Importance::Phrase).contains(&kind), "{:?}", kind);
    }

    #[test]
    fn steady_pattern_on_strong_beat_triggers_minor() {
        let mut a = unscheduled();
        a.beat_patterns = vec![BeatPattern {
            start_time: 0.0,
            end_time: 20.0,
            beat_count: 40,
            average_tempo: 120.0,
        }];
        // 2.5 s is a 0.7-strength beat, 4.0 s a full one
        assert_eq!(fire(&a, 2.5, 2), None);
        for seed in 0..20 {
            let kind = fire(&a, 4.0, seed).unwrap();
            assert!(kinds(Importance::Minor).contains(&kind), "{:?}", kind);
        }

        a.beat_patterns.clear();
        assert_eq!(fire(&a, 4.0, 2), None);
    }

    #[test]
    fn drop_outranks_phrase_and_pattern() {
        let mut a = unscheduled();
        a.buildups = vec![BuildupWindow { start: 2.0, end: 4.02 }];
        a.beat_patterns = vec![BeatPattern {
            start_time: 0.0,
            end_time: 20.0,
            beat_count: 40,
            average_tempo: 120.0,
        }];
        let schedule = a.clone();
        a.phrase_boundaries = vec![4.0];
        let drop_only: HashSet<_> = [TransitionType::FlashFade, TransitionType::Glitch].into_iter().collect();
        let mut drop_only_seen = false;
        for seed in 0..30 {
            let mut system = TransitionSystem::new(&schedule, settings(true));
            let mut rng = StdRng::seed_from_u64(seed);
            let kind = system.update(4.0, &a, Some(&solid(0)), &mut rng).unwrap();
            assert!(kinds(Importance::Drop).contains(&kind), "{:?}", kind);
            drop_only_seen |= drop_only.contains(&kind);
        }
        assert!(drop_only_seen);
    }
}
