/// Errors for caller-provided camera frames.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has zero size ({width}x{height})")]
    Empty { width: usize, height: usize },
    #[error("unsupported channel count {0}; expected 1, 3 or 4")]
    UnsupportedChannels(usize),
    #[error("frame buffer has {actual} bytes, expected {expected}")]
    BufferLength { expected: usize, actual: usize },
}

/// Borrowed interleaved 8-bit camera frame (gray, BGR or BGRA).
#[derive(Clone, Copy, Debug)]
pub struct FrameView<'a> {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: &'a [u8],
}

impl<'a> FrameView<'a> {
    /// Validated constructor.
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        data: &'a [u8],
    ) -> Result<Self, FrameError> {
        let view = Self {
            width,
            height,
            channels,
            data,
        };
        view.validate()?;
        Ok(view)
    }

    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::Empty {
                width: self.width,
                height: self.height,
            });
        }
        if !matches!(self.channels, 1 | 3 | 4) {
            return Err(FrameError::UnsupportedChannels(self.channels));
        }
        let expected = self.width * self.height * self.channels;
        if self.data.len() != expected {
            return Err(FrameError::BufferLength {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Luma conversion; BGR(A) channel order, alpha ignored.
    pub fn to_gray(&self) -> GrayImage {
        if self.channels == 1 {
            return GrayImage {
                width: self.width,
                height: self.height,
                data: self.data.to_vec(),
            };
        }
        let data = self
            .data
            .chunks_exact(self.channels)
            .map(|px| {
                let (b, g, r) = (px[0] as f32, px[1] as f32, px[2] as f32);
                (0.114 * b + 0.587 * g + 0.299 * r).round().clamp(0.0, 255.0) as u8
            })
            .collect();
        GrayImage {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

#[derive(Clone, Debug, PartialEq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }
}

impl GrayImageView<'_> {
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }
}

/// Binary mask, one byte per pixel (0 or 1), row-major.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Mask {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl Mask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x] != 0
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, on: bool) {
        self.data[y * self.width + x] = u8::from(on);
    }

    /// Signed-coordinate lookup, outside counts as background.
    #[inline]
    pub fn get_i(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return false;
        }
        self.get(x as usize, y as usize)
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    /// Foreground pixel with at least one 4-neighbour in the background.
    pub fn is_boundary(&self, x: usize, y: usize) -> bool {
        if !self.get(x, y) {
            return false;
        }
        let (xi, yi) = (x as i64, y as i64);
        !self.get_i(xi - 1, yi)
            || !self.get_i(xi + 1, yi)
            || !self.get_i(xi, yi - 1)
            || !self.get_i(xi, yi + 1)
    }
}

#[inline]
fn get_gray(src: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i32 || y >= src.height as i32 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_gray(src, x0, y0) as f32;
    let p10 = get_gray(src, x0 + 1, y0) as f32;
    let p01 = get_gray(src, x0, y0 + 1) as f32;
    let p11 = get_gray(src, x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_validation_reports_mismatches() {
        let buf = vec![0u8; 12];
        assert!(FrameView::new(2, 2, 3, &buf).is_ok());
        assert_eq!(
            FrameView::new(2, 2, 2, &buf).unwrap_err(),
            FrameError::UnsupportedChannels(2)
        );
        assert_eq!(
            FrameView::new(3, 2, 3, &buf).unwrap_err(),
            FrameError::BufferLength {
                expected: 18,
                actual: 12
            }
        );
        assert!(matches!(
            FrameView::new(0, 2, 1, &[]),
            Err(FrameError::Empty { .. })
        ));
    }

    #[test]
    fn bgr_to_gray_uses_luma_weights() {
        let buf = [255u8, 255, 255, 0, 0, 255];
        let gray = FrameView::new(2, 1, 3, &buf).unwrap().to_gray();
        assert_eq!(gray.data, vec![255, 76]);
    }

    #[test]
    fn mask_boundary_detection() {
        let mut m = Mask::new(5, 5);
        for y in 1..4 {
            for x in 1..4 {
                m.set(x, y, true);
            }
        }
        assert_eq!(m.count(), 9);
        assert!(m.is_boundary(1, 1));
        assert!(!m.is_boundary(2, 2));
        assert!(!m.is_boundary(0, 0));
    }

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let img = GrayImage {
            width: 2,
            height: 1,
            data: vec![0, 100],
        };
        let v = sample_bilinear(&img.view(), 0.5, 0.0);
        assert!((v - 50.0).abs() < 1e-4);
    }
}
