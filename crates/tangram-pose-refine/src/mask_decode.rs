//! Instance masks from the detector's shared prototype tensor.

use tangram_pose_core::BBox;

use crate::MaskDecodeParams;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtoMaskError {
    #[error("prototype tensor {channels}x{height}x{width} needs {expected} values, got {actual}")]
    Shape {
        channels: usize,
        height: usize,
        width: usize,
        expected: usize,
        actual: usize,
    },
    #[error("detection has {actual} mask coefficients, prototype tensor has {expected} channels")]
    Coefficients { expected: usize, actual: usize },
}

/// Borrowed `C x H x W` prototype tensor (channel-major).
#[derive(Clone, Copy, Debug)]
pub struct ProtoMasks<'a> {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: &'a [f32],
}

impl<'a> ProtoMasks<'a> {
    pub fn new(
        channels: usize,
        height: usize,
        width: usize,
        data: &'a [f32],
    ) -> Result<Self, ProtoMaskError> {
        let expected = channels * height * width;
        if expected == 0 || data.len() != expected {
            return Err(ProtoMaskError::Shape {
                channels,
                height,
                width,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    #[inline]
    fn plane(&self, c: usize) -> &'a [f32] {
        let n = self.height * self.width;
        &self.data[c * n..(c + 1) * n]
    }
}

/// Per-pixel foreground probability at prototype resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskProbabilities {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl MaskProbabilities {
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Bilinear lookup in prototype pixel coordinates; outside is 0.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let fetch = |xi: i64, yi: i64| -> f32 {
            if xi < 0 || yi < 0 || xi >= self.width as i64 || yi >= self.height as i64 {
                0.0
            } else {
                self.get(xi as usize, yi as usize)
            }
        };
        let x0 = x.floor() as i64;
        let y0 = y.floor() as i64;
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;
        let a = fetch(x0, y0) + fx * (fetch(x0 + 1, y0) - fetch(x0, y0));
        let b = fetch(x0, y0 + 1) + fx * (fetch(x0 + 1, y0 + 1) - fetch(x0, y0 + 1));
        a + fy * (b - a)
    }

    pub fn count_above(&self, threshold: f32) -> usize {
        self.data.iter().filter(|&&v| v >= threshold).count()
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// `sigmoid(sum_k c_k * P_k)`, zeroed below the threshold and outside the
/// detection box (box given in detector input pixels).
pub fn decode_mask(
    protos: &ProtoMasks<'_>,
    coeffs: &[f32],
    bbox: &BBox,
    params: &MaskDecodeParams,
) -> Result<MaskProbabilities, ProtoMaskError> {
    if coeffs.len() != protos.channels {
        return Err(ProtoMaskError::Coefficients {
            expected: protos.channels,
            actual: coeffs.len(),
        });
    }
    let (w, h) = (protos.width, protos.height);
    let mut acc = vec![0.0f32; w * h];
    for (c, &k) in coeffs.iter().enumerate() {
        if k == 0.0 {
            continue;
        }
        for (a, &p) in acc.iter_mut().zip(protos.plane(c)) {
            *a += k * p;
        }
    }

    let sx = w as f32 / params.input_size;
    let sy = h as f32 / params.input_size;
    let (x0, y0, x1, y1) = bbox.corners();
    let (bx0, by0, bx1, by1) = (x0 * sx, y0 * sy, x1 * sx, y1 * sy);

    let mut data = vec![0.0f32; w * h];
    for y in 0..h {
        let cy = y as f32 + 0.5;
        if cy < by0 || cy > by1 {
            continue;
        }
        for x in 0..w {
            let cx = x as f32 + 0.5;
            if cx < bx0 || cx > bx1 {
                continue;
            }
            let p = sigmoid(acc[y * w + x]);
            if p >= params.threshold {
                data[y * w + x] = p;
            }
        }
    }
    Ok(MaskProbabilities {
        width: w,
        height: h,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protos_with_square() -> Vec<f32> {
        // channel 0: +4 inside [4, 12) x [4, 12), -4 elsewhere; channel 1: constant 1
        let (w, h) = (16, 16);
        let mut data = vec![0.0f32; 2 * w * h];
        for y in 0..h {
            for x in 0..w {
                let inside = (4..12).contains(&x) && (4..12).contains(&y);
                data[y * w + x] = if inside { 4.0 } else { -4.0 };
                data[w * h + y * w + x] = 1.0;
            }
        }
        data
    }

    #[test]
    fn decodes_square_inside_box() {
        let raw = protos_with_square();
        let protos = ProtoMasks::new(2, 16, 16, &raw).unwrap();
        let params = MaskDecodeParams {
            threshold: 0.5,
            input_size: 64.0,
        };
        let bbox = BBox {
            cx: 32.0,
            cy: 32.0,
            w: 64.0,
            h: 64.0,
        };
        let m = decode_mask(&protos, &[1.0, 0.0], &bbox, &params).unwrap();
        assert_eq!(m.count_above(0.5), 64);
        assert!(m.get(8, 8) > 0.98);
        assert_eq!(m.get(0, 0), 0.0);
    }

    #[test]
    fn box_crops_the_mask() {
        let raw = protos_with_square();
        let protos = ProtoMasks::new(2, 16, 16, &raw).unwrap();
        let params = MaskDecodeParams {
            threshold: 0.5,
            input_size: 64.0,
        };
        // left half of the detector input only
        let bbox = BBox {
            cx: 16.0,
            cy: 32.0,
            w: 32.0,
            h: 64.0,
        };
        let m = decode_mask(&protos, &[1.0, 0.0], &bbox, &params).unwrap();
        assert_eq!(m.count_above(0.5), 4 * 8);
    }

    #[test]
    fn shape_and_coefficient_mismatches_are_errors() {
        let raw = vec![0.0f32; 10];
        assert!(matches!(
            ProtoMasks::new(2, 4, 4, &raw),
            Err(ProtoMaskError::Shape { expected: 32, .. })
        ));
        let raw = protos_with_square();
        let protos = ProtoMasks::new(2, 16, 16, &raw).unwrap();
        let err = decode_mask(&protos, &[1.0], &BBox::default(), &MaskDecodeParams::default());
        assert_eq!(
            err.unwrap_err(),
            ProtoMaskError::Coefficients {
                expected: 2,
                actual: 1
            }
        );
    }
}
