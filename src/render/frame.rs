//! CPU frame buffers and the pixel operations shared by effects and
//! transitions. Frames are straight RGBA8, row-major, as piped to the encoder.

use image::RgbaImage;
use rayon::prelude::*;

pub type Frame = RgbaImage;

/// Build a frame from a per-pixel function, one row per rayon task.
pub fn from_fn_par<F>(width: u32, height: u32, f: F) -> Frame
where
    F: Fn(u32, u32) -> [u8; 4] + Sync,
{
    let mut out = Frame::new(width, height);
    let row_len = width as usize * 4;
    if row_len == 0 {
        return out;
    }
    let buf: &mut [u8] = &mut out;
    buf.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            px.copy_from_slice(&f(x as u32, y as u32));
        }
    });
    out
}

/// Apply `f` to every pixel of a copy of `src`.
pub fn map_pixels<F>(src: &Frame, f: F) -> Frame
where
    F: Fn(u32, u32, [u8; 4]) -> [u8; 4] + Sync,
{
    from_fn_par(src.width(), src.height(), |x, y| f(x, y, src.get_pixel(x, y).0))
}

/// Bilinear sample with clamp-to-edge addressing.
pub fn sample_bilinear(src: &Frame, x: f32, y: f32) -> [u8; 4] {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return [0, 0, 0, 255];
    }
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = src.get_pixel(x0, y0).0;
    let p10 = src.get_pixel(x1, y0).0;
    let p01 = src.get_pixel(x0, y1).0;
    let p11 = src.get_pixel(x1, y1).0;
    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Inverse-mapped warp: each output pixel samples `src` at `map(x, y)`.
pub fn remap<F>(src: &Frame, map: F) -> Frame
where
    F: Fn(f32, f32) -> (f32, f32) + Sync,
{
    from_fn_par(src.width(), src.height(), |x, y| {
        let (sx, sy) = map(x as f32, y as f32);
        sample_bilinear(src, sx, sy)
    })
}

/// Scale about the center. `factor > 1` zooms in.
pub fn zoom(src: &Frame, factor: f32) -> Frame {
    if !factor.is_finite() || factor <= 0.0 || (factor - 1.0).abs() < 1e-4 {
        return src.clone();
    }
    let cx = src.width() as f32 / 2.0;
    let cy = src.height() as f32 / 2.0;
    remap(src, |x, y| (cx + (x - cx) / factor, cy + (y - cy) / factor))
}

pub fn translate(src: &Frame, dx: f32, dy: f32) -> Frame {
    if dx.abs() < 0.5 && dy.abs() < 0.5 {
        return src.clone();
    }
    remap(src, |x, y| (x - dx, y - dy))
}

/// Rotate by `angle` radians and scale by `scale` about the center.
pub fn rotate_scale(src: &Frame, angle: f32, scale: f32) -> Frame {
    let cx = src.width() as f32 / 2.0;
    let cy = src.height() as f32 / 2.0;
    let (sin, cos) = (-angle).sin_cos();
    let inv = 1.0 / scale.max(1e-3);
    remap(src, |x, y| {
        let dx = (x - cx) * inv;
        let dy = (y - cy) * inv;
        (cx + dx * cos - dy * sin, cy + dx * sin + dy * cos)
    })
}

#[inline]
pub fn lerp_px(a: [u8; 4], b: [u8; 4], t: f32) -> [u8; 4] {
    let t = t.clamp(0.0, 1.0);
    let mut out = [0u8; 4];
    for c in 0..4 {
        out[c] = (a[c] as f32 + (b[c] as f32 - a[c] as f32) * t).round() as u8;
    }
    out
}

/// Linear blend, `t = 0` gives `a`. Frames must share dimensions.
pub fn blend(a: &Frame, b: &Frame, t: f32) -> Frame {
    if t <= 0.0 {
        return a.clone();
    }
    if t >= 1.0 {
        return b.clone();
    }
    map_pixels(a, |x, y, pa| lerp_px(pa, b.get_pixel(x, y).0, t))
}

/// Blend every pixel toward a solid color.
pub fn blend_color(src: &Frame, color: [u8; 3], t: f32) -> Frame {
    let target = [color[0], color[1], color[2], 255];
    map_pixels(src, |_, _, p| lerp_px(p, target, t))
}

/// Average `block`-sized tiles.
pub fn pixelate(src: &Frame, block: u32) -> Frame {
    let block = block.max(1);
    if block == 1 {
        return src.clone();
    }
    let (w, h) = src.dimensions();
    let bw = w.div_ceil(block);
    let bh = h.div_ceil(block);
    let averages: Vec<[u8; 4]> = (0..bw * bh)
        .into_par_iter()
        .map(|i| {
            let bx = (i % bw) * block;
            let by = (i / bw) * block;
            let mut sum = [0u32; 4];
            let mut n = 0u32;
            for y in by..(by + block).min(h) {
                for x in bx..(bx + block).min(w) {
                    let p = src.get_pixel(x, y).0;
                    for c in 0..4 {
                        sum[c] += p[c] as u32;
                    }
                    n += 1;
                }
            }
            let n = n.max(1);
            [(sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8, (sum[3] / n) as u8]
        })
        .collect();
    from_fn_par(w, h, |x, y| averages[((y / block) * bw + x / block) as usize])
}

/// Normalized distance from the center: 0 at the center, 1 at the corners.
#[inline]
pub fn radial_distance(x: u32, y: u32, width: u32, height: u32) -> f32 {
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let dx = x as f32 + 0.5 - cx;
    let dy = y as f32 + 0.5 - cy;
    let max = (cx * cx + cy * cy).sqrt().max(1e-6);
    (dx * dx + dy * dy).sqrt() / max
}

pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta < 1e-6 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let sat = if max <= 0.0 { 0.0 } else { delta / max };
    (hue, sat, max)
}

pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let h = h.rem_euclid(360.0);
    let s = s.clamp(0.0, 1.0);
    let v = v.clamp(0.0, 1.0);
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    [
        ((r + m) * 255.0).round() as u8,
        ((g + m) * 255.0).round() as u8,
        ((b + m) * 255.0).round() as u8,
    ]
}
