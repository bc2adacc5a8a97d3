//! Canonical piece catalog.
//!
//! The catalog file is a JSON object keyed by model name:
//!
//! ```json
//! {
//!   "tangram_square": { "type": "square", "vertices": [[0, 0], [1, 0], [1, 1], [0, 1]] }
//! }
//! ```
//!
//! Optional display colors come from Wavefront `.mtl` files named after the
//! model (`<assets>/<model_name>.mtl`, first `Kd r g b` line, RGB in `[0, 1]`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, warn};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::polygon::{centroid, ensure_clockwise, signed_area};
use crate::types::{class_for_model_name, class_model_name, class_shape, ShapeType, NUM_CLASSES};

/// Neutral gray used when no material color is available.
pub const DEFAULT_COLOR_BGR: [u8; 3] = [128, 128, 128];

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("model `{name}`: unknown shape type `{kind}`")]
    UnknownShape { name: String, kind: String },
    #[error("model `{name}`: {shape:?} needs {expected} vertices, got {actual}")]
    VertexCount {
        name: String,
        shape: ShapeType,
        expected: usize,
        actual: usize,
    },
    #[error("model `{name}`: shape {actual:?} does not match class shape {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: ShapeType,
        actual: ShapeType,
    },
    #[error("model `{name}`: vertices are non-finite or degenerate")]
    Degenerate { name: String },
    #[error("catalog is missing model `{name}` for class {class_id}")]
    MissingClass { class_id: usize, name: &'static str },
}

/// Static description of one piece class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TangramModel {
    pub name: String,
    pub shape: ShapeType,
    /// Clockwise canonical outline in model units.
    pub vertices: Vec<Point2<f64>>,
    pub color_bgr: [u8; 3],
}

#[derive(Deserialize)]
struct RawModel {
    #[serde(rename = "type")]
    kind: String,
    vertices: Vec<[f64; 2]>,
}

/// All seven piece models, indexed by class id. Immutable once loaded.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelCatalog {
    models: Vec<TangramModel>,
}

impl ModelCatalog {
    /// Load and validate the catalog JSON file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = fs::read_to_string(path.as_ref())?;
        let catalog = Self::from_json_str(&raw)?;
        debug!("loaded {} tangram models from {}", NUM_CLASSES, path.as_ref().display());
        Ok(catalog)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        let parsed: BTreeMap<String, RawModel> = serde_json::from_str(raw)?;
        let mut slots: Vec<Option<TangramModel>> = vec![None; NUM_CLASSES];

        for (name, model) in parsed {
            let Some(class_id) = class_for_model_name(&name) else {
                warn!("ignoring unknown catalog model `{name}`");
                continue;
            };
            let shape = ShapeType::parse(&model.kind).ok_or_else(|| CatalogError::UnknownShape {
                name: name.clone(),
                kind: model.kind.clone(),
            })?;
            let vertices = model.vertices.iter().map(|v| Point2::new(v[0], v[1])).collect();
            slots[class_id] = Some(build_model(class_id, name, shape, vertices)?);
        }

        let mut models = Vec::with_capacity(NUM_CLASSES);
        for (class_id, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(m) => models.push(m),
                None => {
                    return Err(CatalogError::MissingClass {
                        class_id,
                        name: class_model_name(class_id).unwrap_or("?"),
                    })
                }
            }
        }
        Ok(Self { models })
    }

    /// The classic seven-piece set cut from a 4x4 square, each piece centered
    /// on its centroid.
    pub fn standard() -> Self {
        let s2 = std::f64::consts::SQRT_2;
        let outlines: [&[[f64; 2]]; NUM_CLASSES] = [
            &[[0.0, 0.0], [2.0, 0.0], [3.0, 1.0], [1.0, 1.0]],
            &[[0.0, 0.0], [s2, 0.0], [s2, s2], [0.0, s2]],
            &[[0.0, 0.0], [4.0, 0.0], [2.0, 2.0]],
            &[[0.0, 0.0], [4.0, 0.0], [2.0, 2.0]],
            &[[0.0, 0.0], [2.0, 0.0], [0.0, 2.0]],
            &[[0.0, 0.0], [2.0, 0.0], [1.0, 1.0]],
            &[[0.0, 0.0], [2.0, 0.0], [1.0, 1.0]],
        ];
        let models = outlines
            .iter()
            .enumerate()
            .map(|(class_id, outline)| {
                let pts: Vec<Point2<f64>> =
                    outline.iter().map(|v| Point2::new(v[0], v[1])).collect();
                let c = centroid(&pts).unwrap_or_else(Point2::origin);
                let mut vertices: Vec<_> = pts.iter().map(|p| Point2::new(p.x - c.x, p.y - c.y)).collect();
                ensure_clockwise(&mut vertices);
                TangramModel {
                    name: class_model_name(class_id).unwrap_or_default().to_string(),
                    shape: class_shape(class_id).unwrap_or(ShapeType::Triangle),
                    vertices,
                    color_bgr: DEFAULT_COLOR_BGR,
                }
            })
            .collect();
        Self { models }
    }

    /// Serialize back to the catalog file format.
    pub fn to_json(&self) -> Result<String, CatalogError> {
        let map: BTreeMap<&str, serde_json::Value> = self
            .models
            .iter()
            .map(|m| {
                let kind = match m.shape {
                    ShapeType::Triangle => "triangle",
                    ShapeType::Square => "square",
                    ShapeType::Parallelogram => "parallelogram",
                };
                let verts: Vec<[f64; 2]> = m.vertices.iter().map(|p| [p.x, p.y]).collect();
                (m.name.as_str(), serde_json::json!({ "type": kind, "vertices": verts }))
            })
            .collect();
        Ok(serde_json::to_string_pretty(&map)?)
    }

    pub fn get(&self, class_id: usize) -> Option<&TangramModel> {
        self.models.get(class_id)
    }

    pub fn by_name(&self, name: &str) -> Option<&TangramModel> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &TangramModel)> {
        self.models.iter().enumerate()
    }

    /// Annotate `color_bgr` from `<assets_dir>/<model_name>.mtl` files.
    ///
    /// Missing or unreadable files leave the default color in place.
    pub fn load_colors_from_assets(&mut self, assets_dir: impl AsRef<Path>) -> usize {
        let dir = assets_dir.as_ref();
        let mut loaded = 0;
        for model in &mut self.models {
            let path = dir.join(format!("{}.mtl", model.name));
            let Ok(text) = fs::read_to_string(&path) else {
                debug!("no material file for {}", model.name);
                continue;
            };
            match parse_mtl_diffuse(&text) {
                Some(rgb) => {
                    model.color_bgr = [rgb[2], rgb[1], rgb[0]];
                    loaded += 1;
                }
                None => warn!("{}: no usable Kd entry", path.display()),
            }
        }
        loaded
    }
}

fn build_model(
    class_id: usize,
    name: String,
    shape: ShapeType,
    mut vertices: Vec<Point2<f64>>,
) -> Result<TangramModel, CatalogError> {
    if let Some(expected) = class_shape(class_id) {
        if expected != shape {
            return Err(CatalogError::ShapeMismatch {
                name,
                expected,
                actual: shape,
            });
        }
    }
    if vertices.len() != shape.expected_vertices() {
        return Err(CatalogError::VertexCount {
            name,
            shape,
            expected: shape.expected_vertices(),
            actual: vertices.len(),
        });
    }
    let finite = vertices.iter().all(|p| p.x.is_finite() && p.y.is_finite());
    if !finite || signed_area(&vertices).abs() < 1e-12 {
        return Err(CatalogError::Degenerate { name });
    }
    ensure_clockwise(&mut vertices);
    Ok(TangramModel {
        name,
        shape,
        vertices,
        color_bgr: DEFAULT_COLOR_BGR,
    })
}

/// First `Kd r g b` entry of a material file as 8-bit RGB.
pub fn parse_mtl_diffuse(text: &str) -> Option<[u8; 3]> {
    for line in text.lines() {
        let mut it = line.split_whitespace();
        if it.next() != Some("Kd") {
            continue;
        }
        let vals: Vec<f64> = it.take(3).filter_map(|t| t.parse().ok()).collect();
        if vals.len() == 3 {
            let to_u8 = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
            return Some([to_u8(vals[0]), to_u8(vals[1]), to_u8(vals[2])]);
        }
    }
    None
}
