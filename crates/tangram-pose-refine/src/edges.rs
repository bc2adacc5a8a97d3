//! Auto-thresholded Canny-style edges inside the detection ROI.
//!
//! Sobel gradients with border clamping, 4-direction non-maximum suppression,
//! hysteresis with thresholds `(1 -/+ sigma) * median` of the gradient
//! magnitude over the mask boundary band, and a parabolic sub-pixel offset
//! along the gradient for every surviving pixel.

use std::collections::VecDeque;

use tangram_pose_core::{GrayImageView, Mask};

use crate::mask::Roi;

type Kernel3 = [[f32; 3]; 3];

const SOBEL_KERNEL_X: Kernel3 = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
const SOBEL_KERNEL_Y: Kernel3 = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

const TAN_22_5_DEG: f32 = 0.414_213_57;

/// Gradient buffers over an ROI, row-major in ROI coordinates.
#[derive(Clone, Debug)]
pub struct Gradients {
    pub width: usize,
    pub height: usize,
    pub gx: Vec<f32>,
    pub gy: Vec<f32>,
    pub mag: Vec<f32>,
}

impl Gradients {
    #[inline]
    fn idx(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }
}

pub fn sobel_gradients(gray: &GrayImageView<'_>, roi: Roi) -> Gradients {
    let (w, h) = (roi.width(), roi.height());
    let mut gx = vec![0.0f32; w * h];
    let mut gy = vec![0.0f32; w * h];
    let mut mag = vec![0.0f32; w * h];
    let fetch = |x: i64, y: i64| -> f32 {
        let xc = x.clamp(0, gray.width as i64 - 1) as usize;
        let yc = y.clamp(0, gray.height as i64 - 1) as usize;
        gray.get(xc, yc) as f32
    };
    for y in 0..h {
        let fy = (y + roi.y0) as i64;
        for x in 0..w {
            let fx = (x + roi.x0) as i64;
            let (mut sx, mut sy) = (0.0f32, 0.0f32);
            for (ky, (row_x, row_y)) in SOBEL_KERNEL_X.iter().zip(&SOBEL_KERNEL_Y).enumerate() {
                for kx in 0..3 {
                    let v = fetch(fx + kx as i64 - 1, fy + ky as i64 - 1);
                    sx += row_x[kx] * v;
                    sy += row_y[kx] * v;
                }
            }
            let i = y * w + x;
            gx[i] = sx;
            gy[i] = sy;
            mag[i] = (sx * sx + sy * sy).sqrt();
        }
    }
    Gradients {
        width: w,
        height: h,
        gx,
        gy,
        mag,
    }
}

/// Surviving edge sample in frame coordinates (sub-pixel).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgePixel {
    pub x: f64,
    pub y: f64,
    pub magnitude: f32,
    /// Gradient direction in radians, `(-pi, pi]`.
    pub direction: f32,
}

#[derive(Clone, Debug, Default)]
pub struct EdgeMap {
    pub edges: Vec<EdgePixel>,
    pub low_threshold: f32,
    pub high_threshold: f32,
}

/// Neighbour offsets along the quantized gradient direction.
fn nms_offsets(gx: f32, gy: f32) -> (i64, i64) {
    let (ax, ay) = (gx.abs(), gy.abs());
    if ay <= ax * TAN_22_5_DEG {
        (1, 0)
    } else if ax <= ay * TAN_22_5_DEG {
        (0, 1)
    } else if (gx >= 0.0) == (gy >= 0.0) {
        (1, 1)
    } else {
        (1, -1)
    }
}

fn median(mut values: Vec<f32>) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *m
}

/// Detect edges inside `band` (ROI-sized mask).
pub fn detect_edges_auto(
    grad: &Gradients,
    roi: Roi,
    band: &Mask,
    sigma: f32,
    min_magnitude: f32,
) -> EdgeMap {
    let (w, h) = (grad.width, grad.height);
    if w < 3 || h < 3 {
        return EdgeMap::default();
    }

    let band_mags: Vec<f32> = (0..w * h)
        .filter(|&i| band.data[i] != 0)
        .map(|i| grad.mag[i])
        .collect();
    let med = median(band_mags);
    let low = ((1.0 - sigma) * med).max(min_magnitude);
    let high = ((1.0 + sigma) * med).max(min_magnitude).max(low);

    let mag_at = |x: i64, y: i64| -> f32 {
        if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
            0.0
        } else {
            grad.mag[y as usize * w + x as usize]
        }
    };

    // 0 = suppressed, 1 = weak, 2 = strong
    let mut class = vec![0u8; w * h];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = grad.idx(x, y);
            if band.data[i] == 0 {
                continue;
            }
            let m = grad.mag[i];
            if m < low {
                continue;
            }
            let (dx, dy) = nms_offsets(grad.gx[i], grad.gy[i]);
            let before = mag_at(x as i64 - dx, y as i64 - dy);
            let after = mag_at(x as i64 + dx, y as i64 + dy);
            // asymmetric test keeps exactly one pixel of a two-pixel plateau
            if m < before || m <= after {
                continue;
            }
            class[i] = if m >= high { 2 } else { 1 };
        }
    }

    let mut keep = vec![false; w * h];
    let mut queue: VecDeque<usize> = (0..w * h).filter(|&i| class[i] == 2).collect();
    for &i in &queue {
        keep[i] = true;
    }
    while let Some(i) = queue.pop_front() {
        let (x, y) = ((i % w) as i64, (i / w) as i64);
        for ny in (y - 1)..=(y + 1) {
            for nx in (x - 1)..=(x + 1) {
                if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                    continue;
                }
                let j = ny as usize * w + nx as usize;
                if class[j] == 1 && !keep[j] {
                    keep[j] = true;
                    queue.push_back(j);
                }
            }
        }
    }

    let mut edges = Vec::new();
    for i in (0..w * h).filter(|&i| keep[i]) {
        let (x, y) = (i % w, i / w);
        let (gx, gy) = (grad.gx[i], grad.gy[i]);
        let (dx, dy) = nms_offsets(gx, gy);
        let m0 = grad.mag[i];
        let mm = mag_at(x as i64 - dx, y as i64 - dy);
        let mp = mag_at(x as i64 + dx, y as i64 + dy);
        let denom = mm - 2.0 * m0 + mp;
        let t = if denom.abs() > 1e-6 {
            (0.5 * (mm - mp) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        };
        edges.push(EdgePixel {
            x: (x + roi.x0) as f64 + t as f64 * dx as f64,
            y: (y + roi.y0) as f64 + t as f64 * dy as f64,
            magnitude: m0,
            direction: gy.atan2(gx),
        });
    }

    EdgeMap {
        edges,
        low_threshold: low,
        high_threshold: high,
    }
}
