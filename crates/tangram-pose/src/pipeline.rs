use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use log::{debug, warn};
use nalgebra::Point2;
use tangram_pose_core::{
    polygon::{ensure_clockwise, simplify_polygon},
    BaInputs, BaSolution, CatalogError, Detection, FrameError, FrameView, LabelError,
    LabeledPolygon, ModelCatalog, PieceObservation,
};
use tangram_pose_refine::{decode_mask, ProtoMaskError, ProtoMasks, RefinementQuality, Refiner};
use tangram_pose_track::TrackedBundleAdjuster;

use crate::export::{plane_coordinates, PlaneCoordinates};
use crate::{ConfigError, PipelineConfig};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    ProtoMask(#[from] ProtoMaskError),
    #[error(transparent)]
    Label(#[from] LabelError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Pixel-space polygons keyed by class id.
pub type ClassPolygons = BTreeMap<usize, Vec<Point2<f64>>>;

/// Group labeled polygons by class; the first polygon of a class wins.
pub fn polygons_from_labels(labels: &[LabeledPolygon]) -> ClassPolygons {
    let mut out = ClassPolygons::new();
    for label in labels {
        if out.contains_key(&label.class_id) {
            warn!("duplicate label for class {}, keeping the first", label.class_id);
            continue;
        }
        out.insert(label.class_id, label.points.clone());
    }
    out
}

/// Frame-at-a-time orchestration: mask decode, polygon refinement, pose
/// solving and tracking for the seven tangram pieces.
///
/// All per-frame methods take `&mut self`; one instance serves one stream.
#[derive(Clone, Debug)]
pub struct TangramPipeline {
    catalog: ModelCatalog,
    config: PipelineConfig,
    refiner: Refiner,
    tracker: TrackedBundleAdjuster,
    last_detected: ClassPolygons,
    last_refined: ClassPolygons,
    last_refinement_quality: BTreeMap<usize, RefinementQuality>,
}

impl TangramPipeline {
    /// Load the model catalog (and optional `.mtl` colors) and build a pipeline.
    pub fn new(
        models_path: impl AsRef<Path>,
        assets_dir: Option<&Path>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let mut catalog = ModelCatalog::load_json(models_path)?;
        if let Some(dir) = assets_dir {
            let n = catalog.load_colors_from_assets(dir);
            debug!("loaded {n} model colors from {}", dir.display());
        }
        Ok(Self::with_catalog(catalog, config))
    }

    pub fn with_catalog(catalog: ModelCatalog, config: PipelineConfig) -> Self {
        Self {
            refiner: Refiner::new(config.refiner.clone(), config.mask_decode.clone()),
            tracker: TrackedBundleAdjuster::new(config.tracking.clone()),
            catalog,
            config,
            last_detected: ClassPolygons::new(),
            last_refined: ClassPolygons::new(),
            last_refinement_quality: BTreeMap::new(),
        }
    }

    pub fn models(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn tracker(&self) -> &TrackedBundleAdjuster {
        &self.tracker
    }

    /// Detected pixel polygons (clockwise, model vertex count) of the last frame.
    pub fn last_detected_points(&self) -> &ClassPolygons {
        &self.last_detected
    }

    /// Refined polygons of the last camera frame, normalized to the frame size.
    pub fn last_refined_polygons(&self) -> &ClassPolygons {
        &self.last_refined
    }

    pub fn last_refinement_quality(&self) -> &BTreeMap<usize, RefinementQuality> {
        &self.last_refinement_quality
    }

    pub fn reset(&mut self) {
        self.tracker.reset();
        self.last_detected.clear();
        self.last_refined.clear();
        self.last_refinement_quality.clear();
    }

    /// Enable or disable homography locking. Always resets the tracker.
    pub fn toggle_locking(&mut self, enabled: bool) {
        self.config.tracking.locking_enabled = enabled;
        self.tracker.set_locking_enabled(enabled);
    }

    pub fn is_homography_locked(&self) -> bool {
        self.tracker.is_homography_locked()
    }

    pub fn has_initialized_tracker(&self) -> bool {
        self.tracker.has_initialized_tracker()
    }

    pub fn plane_coordinates(&self, solution: &BaSolution) -> Vec<PlaneCoordinates> {
        plane_coordinates(solution, &self.catalog)
    }

    /// Process one camera frame with its raw detections.
    ///
    /// Errors are reserved for malformed inputs; frames where nothing can be
    /// solved still return a (zero-quality) solution.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            level = "info",
            skip_all,
            fields(width = frame.width, height = frame.height, detections = detections.len())
        )
    )]
    pub fn process_frame(
        &mut self,
        frame: &FrameView<'_>,
        detections: &[Detection],
        protos: &ProtoMasks<'_>,
        timestamp: f64,
    ) -> Result<BaSolution, PipelineError> {
        frame.validate()?;
        let started = Instant::now();
        let gray = frame.to_gray();
        let view = gray.view();

        self.last_refined.clear();
        self.last_refinement_quality.clear();
        let mut polygons = ClassPolygons::new();
        for det in detections {
            if self.catalog.get(det.class_id).is_none() {
                warn!("skipping detection with unknown class id {}", det.class_id);
                continue;
            }
            if self.last_refinement_quality.contains_key(&det.class_id) {
                debug!("skipping duplicate detection of class {}", det.class_id);
                continue;
            }
            let mask = decode_mask(protos, &det.mask_coeffs, &det.bbox, &self.config.mask_decode)?;
            let refined = self
                .refiner
                .refine(&view, det, &mask, 0, self.config.mask_refine_iterations);
            self.last_refinement_quality.insert(det.class_id, refined.quality);
            if !refined.quality.has_polygon() {
                warn!("class {}: no polygon recovered from its mask", det.class_id);
                continue;
            }
            self.last_refined.insert(det.class_id, refined.polygon_norm);
            polygons.insert(det.class_id, refined.polygon_px);
        }
        let refine_ms = started.elapsed().as_secs_f64() * 1e3;
        let mut solution = self.track_polygons(&polygons, timestamp);
        solution.timings.insert("refine".to_string(), refine_ms);
        Ok(solution)
    }

    /// Deterministic entry point for pre-labeled pixel polygons; skips mask
    /// decoding and refinement.
    pub fn process_frame_with_polygons(&mut self, polygons: &ClassPolygons, timestamp: f64) -> BaSolution {
        self.last_refined.clear();
        self.last_refinement_quality.clear();
        self.track_polygons(polygons, timestamp)
    }

    pub fn process_labels(&mut self, labels: &[LabeledPolygon], timestamp: f64) -> BaSolution {
        self.process_frame_with_polygons(&polygons_from_labels(labels), timestamp)
    }

    fn track_polygons(&mut self, polygons: &ClassPolygons, timestamp: f64) -> BaSolution {
        self.last_detected.clear();
        let mut pieces = Vec::with_capacity(polygons.len());
        for (&class_id, poly) in polygons {
            let Some(model) = self.catalog.get(class_id) else {
                warn!("skipping polygon with unknown class id {class_id}");
                continue;
            };
            let n = model.vertices.len();
            let mut detected = match poly.len() {
                len if len == n => poly.clone(),
                len if len > n => match simplify_polygon(poly, n) {
                    Some(p) => p,
                    None => {
                        warn!("class {class_id}: cannot reduce {len} points to {n} vertices");
                        continue;
                    }
                },
                len => {
                    warn!("class {class_id}: {len} points, model needs {n}");
                    continue;
                }
            };
            ensure_clockwise(&mut detected);
            self.last_detected.insert(class_id, detected.clone());
            pieces.push(PieceObservation {
                class_id,
                detected,
                model: model.vertices.clone(),
                shape: model.shape,
            });
        }
        let inputs = BaInputs {
            pieces,
            warm_start: None,
        };
        self.tracker.process_frame(&inputs, timestamp)
    }
}
