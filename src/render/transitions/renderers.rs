//! Pure transition renderers: `(previous, current, progress, variant) -> frame`.
//! Progress 0 shows `previous`, progress 1 shows `current`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::{PI, TAU};

use super::TransitionType;
use crate::effects::{block_displace, channel_shift, row_shift};
use crate::render::frame::{self, Frame};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Direction::Left, Direction::Right, Direction::Up, Direction::Down];
}

/// Per-transition randomness, drawn once when the transition starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Variant {
    pub direction: Direction,
    pub seed: u64,
}

impl Default for Variant {
    fn default() -> Self {
        Self {
            direction: Direction::Left,
            seed: 0,
        }
    }
}

const WHITE: [u8; 3] = [255, 255, 255];
const BLACK: [u8; 3] = [0, 0, 0];
const RADIAL_EDGE: f32 = 0.05;

pub fn render(kind: TransitionType, previous: &Frame, current: &Frame, progress: f32, variant: Variant) -> Frame {
    if previous.dimensions() != current.dimensions() || progress >= 1.0 || progress.is_nan() {
        return current.clone();
    }
    if progress <= 0.0 {
        return previous.clone();
    }
    let p = progress;
    match kind {
        TransitionType::Crossfade => frame::blend(previous, current, p),
        TransitionType::Zoom => frame::blend(&frame::zoom(previous, 1.0 + p * 0.5), current, p),
        TransitionType::Slide => slide(previous, current, p, variant.direction),
        TransitionType::Wipe => wipe(previous, current, p, variant.direction),
        TransitionType::Dissolve => dissolve(previous, current, p, variant.seed),
        TransitionType::FadeToBlack => {
            if p < 0.5 {
                frame::blend_color(previous, BLACK, p * 2.0)
            } else {
                frame::blend_color(current, BLACK, (1.0 - p) * 2.0)
            }
        }
        TransitionType::Radial => radial(previous, current, p),
        TransitionType::Spiral => spiral(previous, current, p),
        TransitionType::Pixelate => {
            let (w, h) = current.dimensions();
            let max_block = (w.min(h) / 16).max(2) as f32;
            let block = 1 + ((PI * p).sin() * max_block).round() as u32;
            frame::pixelate(if p < 0.5 { previous } else { current }, block)
        }
        TransitionType::Spin => {
            let spun = frame::rotate_scale(previous, p * PI, 1.0 - p * 0.5);
            frame::blend(&spun, current, p)
        }
        TransitionType::FlashFade => {
            if p < 1.0 / 3.0 {
                frame::blend_color(previous, WHITE, p * 3.0)
            } else if p < 2.0 / 3.0 {
                frame::blend_color(current, WHITE, 1.0)
            } else {
                frame::blend_color(current, WHITE, (1.0 - p) * 3.0)
            }
        }
        TransitionType::Glitch => glitch(previous, current, p, variant.seed),
    }
}

fn slide(previous: &Frame, current: &Frame, p: f32, direction: Direction) -> Frame {
    let (w, h) = current.dimensions();
    let (wi, hi) = (w as i64, h as i64);
    let shift_x = (p * w as f32).round() as i64;
    let shift_y = (p * h as f32).round() as i64;
    frame::from_fn_par(w, h, |x, y| {
        let (x, y) = (x as i64, y as i64);
        let (sx, sy, from_prev) = match direction {
            Direction::Left => (x + shift_x, y, x + shift_x < wi),
            Direction::Right => (x - shift_x, y, x - shift_x >= 0),
            Direction::Up => (x, y + shift_y, y + shift_y < hi),
            Direction::Down => (x, y - shift_y, y - shift_y >= 0),
        };
        if from_prev {
            previous.get_pixel(sx as u32, sy as u32).0
        } else {
            let cx = sx.rem_euclid(wi) as u32;
            let cy = sy.rem_euclid(hi) as u32;
            current.get_pixel(cx, cy).0
        }
    })
}

fn wipe(previous: &Frame, current: &Frame, p: f32, direction: Direction) -> Frame {
    let (w, h) = current.dimensions();
    frame::from_fn_par(w, h, |x, y| {
        let fx = (x as f32 + 0.5) / w as f32;
        let fy = (y as f32 + 0.5) / h as f32;
        let u = match direction {
            Direction::Left => 1.0 - fx,
            Direction::Right => fx,
            Direction::Up => 1.0 - fy,
            Direction::Down => fy,
        };
        if u < p {
            current.get_pixel(x, y).0
        } else {
            previous.get_pixel(x, y).0
        }
    })
}

/// Stable per-pixel value in [0, 1).
#[inline]
fn pixel_noise(x: u32, y: u32, seed: u64) -> f32 {
    let mut z = seed ^ ((x as u64) << 32 | y as u64);
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 40) as f32 / (1u64 << 24) as f32
}

fn dissolve(previous: &Frame, current: &Frame, p: f32, seed: u64) -> Frame {
    frame::map_pixels(previous, |x, y, prev| {
        if pixel_noise(x, y, seed) < p {
            current.get_pixel(x, y).0
        } else {
            prev
        }
    })
}

fn radial(previous: &Frame, current: &Frame, p: f32) -> Frame {
    let (w, h) = current.dimensions();
    let radius = p * (1.0 + RADIAL_EDGE);
    frame::map_pixels(previous, |x, y, prev| {
        let d = frame::radial_distance(x, y, w, h);
        let t = ((radius - d) / RADIAL_EDGE).clamp(0.0, 1.0);
        frame::lerp_px(prev, current.get_pixel(x, y).0, t)
    })
}

fn spiral(previous: &Frame, current: &Frame, p: f32) -> Frame {
    let (w, h) = current.dimensions();
    let cx = w as f32 / 2.0;
    let cy = h as f32 / 2.0;
    frame::map_pixels(previous, |x, y, prev| {
        let angle = (y as f32 + 0.5 - cy).atan2(x as f32 + 0.5 - cx);
        let turn = (angle + PI) / TAU;
        let d = frame::radial_distance(x, y, w, h);
        let key = (turn + 2.0 * d) / 3.0;
        if key < p {
            current.get_pixel(x, y).0
        } else {
            prev
        }
    })
}

fn glitch(previous: &Frame, current: &Frame, p: f32, seed: u64) -> Frame {
    let mut out = frame::blend(previous, current, p);
    let chaos = 1.0 - p;
    let step = (p * 1000.0) as u64;
    let mut rng = StdRng::seed_from_u64(seed ^ step.wrapping_mul(0x2545_F491_4F6C_DD1D));
    let bursts = (chaos * 4.0).round() as usize;
    for _ in 0..bursts {
        match rng.random_range(0..3) {
            0 => row_shift(&mut out, &mut rng, chaos),
            1 => channel_shift(&mut out, &mut rng, chaos),
            _ => block_displace(&mut out, &mut rng, chaos),
        }
    }
    out
}
