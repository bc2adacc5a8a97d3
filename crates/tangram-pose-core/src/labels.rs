//! YOLO polygon label files: one piece per line, `class x1 y1 x2 y2 ...`
//! with coordinates normalized to the image size.

use std::fs;
use std::path::Path;

use nalgebra::Point2;

#[derive(thiserror::Error, Debug)]
pub enum LabelError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("line {line}: {msg}")]
    Parse { line: usize, msg: String },
}

/// One labeled polygon in pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledPolygon {
    pub class_id: usize,
    pub points: Vec<Point2<f64>>,
}

pub fn load_polygon_labels(
    path: impl AsRef<Path>,
    image_width: u32,
    image_height: u32,
) -> Result<Vec<LabeledPolygon>, LabelError> {
    let text = fs::read_to_string(path)?;
    parse_polygon_labels(&text, image_width, image_height)
}

/// Parse label text, scaling normalized coordinates to pixels.
///
/// Blank lines and `#` comments are skipped.
pub fn parse_polygon_labels(
    text: &str,
    image_width: u32,
    image_height: u32,
) -> Result<Vec<LabeledPolygon>, LabelError> {
    let (w, h) = (image_width as f64, image_height as f64);
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut tokens = trimmed.split_whitespace();
        let class_tok = tokens.next().unwrap_or_default();
        let class_id = class_tok
            .parse::<f64>()
            .ok()
            .filter(|c| c.fract() == 0.0 && *c >= 0.0)
            .map(|c| c as usize)
            .ok_or_else(|| LabelError::Parse {
                line,
                msg: format!("invalid class id `{class_tok}`"),
            })?;
        let coords = tokens
            .map(|t| {
                t.parse::<f64>().map_err(|_| LabelError::Parse {
                    line,
                    msg: format!("invalid coordinate `{t}`"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if coords.len() % 2 != 0 || coords.len() < 6 {
            return Err(LabelError::Parse {
                line,
                msg: format!("expected at least 3 coordinate pairs, got {} values", coords.len()),
            });
        }
        let points = coords
            .chunks_exact(2)
            .map(|c| Point2::new(c[0] * w, c[1] * h))
            .collect();
        out.push(LabeledPolygon { class_id, points });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_scales_to_pixels() {
        let text = "# frame 0\n1 0.1 0.1 0.2 0.1 0.2 0.2 0.1 0.2\n\n4 0.5 0.5 0.6 0.5 0.5 0.6\n";
        let labels = parse_polygon_labels(text, 640, 480).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].class_id, 1);
        assert_eq!(labels[0].points.len(), 4);
        assert!((labels[0].points[1].x - 128.0).abs() < 1e-9);
        assert!((labels[0].points[1].y - 48.0).abs() < 1e-9);
        assert_eq!(labels[1].points.len(), 3);
    }

    #[test]
    fn odd_coordinate_count_reports_line() {
        let err = parse_polygon_labels("2 0.1 0.1 0.2 0.2 0.3\n", 10, 10).unwrap_err();
        match err {
            LabelError::Parse { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn bad_class_token_is_rejected() {
        assert!(parse_polygon_labels("x 0 0 1 0 1 1\n", 10, 10).is_err());
        assert!(parse_polygon_labels("1.5 0 0 1 0 1 1\n", 10, 10).is_err());
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.txt");
        std::fs::write(&path, "5 0 0 0.5 0 0.25 0.5\n").unwrap();
        let labels = load_polygon_labels(&path, 100, 100).unwrap();
        assert_eq!(labels[0].points[2], Point2::new(25.0, 50.0));
    }
}
