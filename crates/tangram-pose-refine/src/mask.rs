//! Binary mask operations on the detection ROI.

use std::collections::VecDeque;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tangram_pose_core::{GrayImageView, Mask};

use crate::MaskProbabilities;

/// Rectangular frame region `[x0, x1) x [y0, y1)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl Roi {
    pub fn width(&self) -> usize {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> usize {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn diagonal(&self) -> f64 {
        ((self.width() as f64).powi(2) + (self.height() as f64).powi(2)).sqrt()
    }
}

/// Frame-resolution mask restricted to an ROI.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoiMask {
    pub roi: Roi,
    pub mask: Mask,
}

impl RoiMask {
    /// Frame-pixel centers of foreground pixels on the mask boundary.
    pub fn boundary_points(&self) -> Vec<Point2<f64>> {
        let mut out = Vec::new();
        for y in 0..self.mask.height {
            for x in 0..self.mask.width {
                if self.mask.is_boundary(x, y) {
                    out.push(Point2::new(
                        (x + self.roi.x0) as f64,
                        (y + self.roi.y0) as f64,
                    ));
                }
            }
        }
        out
    }
}

/// Bilinear upsampling of prototype probabilities into the frame ROI.
///
/// `scale_x`/`scale_y` map frame pixels to prototype pixels.
pub fn upsample_mask(
    probs: &MaskProbabilities,
    roi: Roi,
    scale_x: f32,
    scale_y: f32,
    threshold: f32,
) -> RoiMask {
    let mut mask = Mask::new(roi.width(), roi.height());
    for y in 0..roi.height() {
        let py = (y + roi.y0) as f32 + 0.5;
        for x in 0..roi.width() {
            let px = (x + roi.x0) as f32 + 0.5;
            let v = probs.sample(px * scale_x - 0.5, py * scale_y - 0.5);
            if v >= threshold {
                mask.set(x, y, true);
            }
        }
    }
    RoiMask { roi, mask }
}

fn morph(mask: &Mask, radius: usize, dilate: bool) -> Mask {
    if radius == 0 {
        return mask.clone();
    }
    let (w, h) = (mask.width, mask.height);
    let r = radius as i64;
    let pick = |acc: bool, v: bool| if dilate { acc || v } else { acc && v };
    // separable square structuring element; outside counts as background
    let mut tmp = Mask::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = !dilate;
            for dx in -r..=r {
                acc = pick(acc, mask.get_i(x as i64 + dx, y as i64));
            }
            tmp.set(x, y, acc);
        }
    }
    let mut out = Mask::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let mut acc = !dilate;
            for dy in -r..=r {
                acc = pick(acc, tmp.get_i(x as i64, y as i64 + dy));
            }
            out.set(x, y, acc);
        }
    }
    out
}

pub fn dilate(mask: &Mask, radius: usize) -> Mask {
    morph(mask, radius, true)
}

pub fn erode(mask: &Mask, radius: usize) -> Mask {
    morph(mask, radius, false)
}

/// Pixels within `radius` of the foreground/background transition.
pub fn boundary_band(mask: &Mask, radius: usize) -> Mask {
    let outer = dilate(mask, radius);
    let inner = erode(mask, radius);
    let mut band = Mask::new(mask.width, mask.height);
    for (b, (&o, &i)) in band.data.iter_mut().zip(outer.data.iter().zip(&inner.data)) {
        *b = u8::from(o != 0 && i == 0);
    }
    band
}

/// Keep only the largest 4-connected foreground component.
pub fn largest_component(mask: &Mask) -> Mask {
    let (w, h) = (mask.width, mask.height);
    let mut label = vec![0u32; w * h];
    let mut best = (0u32, 0usize);
    let mut next = 0u32;
    let mut queue = VecDeque::new();
    for start in 0..w * h {
        if mask.data[start] == 0 || label[start] != 0 {
            continue;
        }
        next += 1;
        label[start] = next;
        queue.push_back(start);
        let mut size = 0usize;
        while let Some(idx) = queue.pop_front() {
            size += 1;
            let (x, y) = (idx % w, idx / w);
            let mut visit = |n: usize| {
                if mask.data[n] != 0 && label[n] == 0 {
                    label[n] = next;
                    queue.push_back(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < w {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - w);
            }
            if y + 1 < h {
                visit(idx + w);
            }
        }
        if size > best.1 {
            best = (next, size);
        }
    }
    let mut out = Mask::new(w, h);
    if best.0 == 0 {
        return out;
    }
    for (o, &l) in out.data.iter_mut().zip(&label) {
        *o = u8::from(l == best.0);
    }
    out
}

/// Relabel the boundary band by nearest class mean intensity.
///
/// Foreground statistics come from the eroded mask, background from the ROI
/// outside the dilated mask. Returns the number of passes actually applied.
pub fn refine_mask_band(
    roi_mask: &mut RoiMask,
    gray: &GrayImageView<'_>,
    band_px: usize,
    iterations: usize,
    min_contrast: f32,
) -> usize {
    let roi = roi_mask.roi;
    let mut applied = 0;
    for _ in 0..iterations {
        let mask = &roi_mask.mask;
        let inner = erode(mask, band_px);
        let outer = dilate(mask, band_px);
        let (mut fg_sum, mut fg_n, mut bg_sum, mut bg_n) = (0.0f64, 0usize, 0.0f64, 0usize);
        for y in 0..mask.height {
            for x in 0..mask.width {
                let g = gray.get(x + roi.x0, y + roi.y0) as f64;
                if inner.get(x, y) {
                    fg_sum += g;
                    fg_n += 1;
                } else if !outer.get(x, y) {
                    bg_sum += g;
                    bg_n += 1;
                }
            }
        }
        if fg_n == 0 || bg_n == 0 {
            break;
        }
        let fg = (fg_sum / fg_n as f64) as f32;
        let bg = (bg_sum / bg_n as f64) as f32;
        if (fg - bg).abs() < min_contrast {
            break;
        }
        let mut next = mask.clone();
        let mut changed = false;
        for y in 0..mask.height {
            for x in 0..mask.width {
                if inner.get(x, y) || !outer.get(x, y) {
                    continue;
                }
                let g = gray.get(x + roi.x0, y + roi.y0) as f32;
                let on = (g - fg).abs() < (g - bg).abs();
                if on != mask.get(x, y) {
                    next.set(x, y, on);
                    changed = true;
                }
            }
        }
        roi_mask.mask = largest_component(&next);
        applied += 1;
        if !changed {
            break;
        }
    }
    applied
}
