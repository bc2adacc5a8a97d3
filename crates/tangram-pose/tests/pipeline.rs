use nalgebra::{Matrix3, Point2};
use tangram_pose::core::{
    polygon::is_clockwise, BBox, Detection, FrameError, FrameView, Homography, LabeledPolygon,
    ModelCatalog, Pose, NUM_CLASSES,
};
use tangram_pose::refine::ProtoMaskError;
use tangram_pose::{
    polygons_from_labels, ClassPolygons, PipelineConfig, PipelineError, ProtoMasks, TangramPipeline,
};

const DT: f64 = 1.0 / 30.0;

fn pose(class_id: usize) -> Pose {
    Pose::new(
        0.35 * class_id as f64 - 1.0,
        4.5 * (class_id % 4) as f64 - 6.75,
        4.5 * (class_id / 4) as f64 - 2.25,
    )
}

fn project(h: &Homography, catalog: &ModelCatalog, class_id: usize) -> Vec<Point2<f64>> {
    let p = pose(class_id);
    catalog
        .get(class_id)
        .unwrap()
        .vertices
        .iter()
        .map(|m| h.apply(p.apply(*m)))
        .collect()
}

fn scene(h: &Homography) -> ClassPolygons {
    let catalog = ModelCatalog::standard();
    (0..NUM_CLASSES).map(|c| (c, project(h, &catalog, c))).collect()
}

fn hd_h() -> Homography {
    Homography::new(Matrix3::new(40.0, 3.0, 640.0, -2.0, 38.0, 360.0, 1e-3, -1e-3, 1.0))
}

fn pipeline() -> TangramPipeline {
    TangramPipeline::with_catalog(ModelCatalog::standard(), PipelineConfig::default())
}

#[test]
fn polygon_entry_point_is_deterministic() {
    let polygons = scene(&hd_h());
    let mut a = pipeline();
    let mut b = pipeline();
    for i in 0..3 {
        let ts = i as f64 * DT;
        let sa = a.process_frame_with_polygons(&polygons, ts);
        let sb = b.process_frame_with_polygons(&polygons, ts);
        assert_eq!(sa.without_timings(), sb.without_timings());
    }
}

#[test]
fn labeled_scene_is_tracked_and_locks() {
    let mut p = pipeline();
    let polygons = scene(&hd_h());
    let mut last = None;
    for i in 0..6 {
        last = Some(p.process_frame_with_polygons(&polygons, i as f64 * DT));
    }
    let sol = last.unwrap();
    assert!(sol.homography_locked);
    assert!(p.is_homography_locked());
    assert_eq!(sol.poses.len(), NUM_CLASSES);
    assert!(sol.mean_error().unwrap() < 0.5);
    assert!(sol.tracking_quality > 0.0 && sol.tracking_quality <= 1.0);
    assert_eq!(p.last_detected_points().len(), NUM_CLASSES);
    assert!(p.last_detected_points().values().all(|poly| is_clockwise(poly)));
    assert!(p.last_refined_polygons().is_empty());
}

#[test]
fn reset_makes_next_frame_a_first_frame() {
    let polygons = scene(&hd_h());
    let first = pipeline().process_frame_with_polygons(&polygons, 0.0);

    let mut p = pipeline();
    for i in 0..6 {
        p.process_frame_with_polygons(&polygons, i as f64 * DT);
    }
    p.reset();
    assert!(!p.is_homography_locked());
    assert!(!p.has_initialized_tracker());
    assert!(p.last_detected_points().is_empty());
    let again = p.process_frame_with_polygons(&polygons, 0.0);
    assert_eq!(again.without_timings(), first.without_timings());
}

#[test]
fn toggling_locking_resets_the_tracker() {
    let polygons = scene(&hd_h());
    let mut p = pipeline();
    p.process_frame_with_polygons(&polygons, 0.0);
    assert!(p.has_initialized_tracker());
    p.toggle_locking(false);
    assert!(!p.has_initialized_tracker());
    for i in 0..8 {
        assert!(!p.process_frame_with_polygons(&polygons, i as f64 * DT).homography_locked);
    }
    assert!(!p.config().tracking.locking_enabled);
}

#[test]
fn unknown_classes_and_short_polygons_are_skipped() {
    let mut polygons = scene(&hd_h());
    polygons.insert(11, polygons[&1].clone());
    polygons.get_mut(&2).unwrap().truncate(2);
    let mut p = pipeline();
    let sol = p.process_frame_with_polygons(&polygons, 0.0);
    assert!(!sol.poses.contains_key(&11));
    assert!(!sol.poses.contains_key(&2));
    assert_eq!(sol.poses.len(), NUM_CLASSES - 1);
}

#[test]
fn dense_outlines_are_reduced_to_model_vertices() {
    let mut polygons = scene(&hd_h());
    let square = polygons[&1].clone();
    let mut dense = Vec::new();
    for i in 0..4 {
        let (a, b) = (square[i], square[(i + 1) % 4]);
        for k in 0..5 {
            let t = k as f64 / 5.0;
            dense.push(Point2::new(a.x + t * (b.x - a.x), a.y + t * (b.y - a.y)));
        }
    }
    dense.reverse();
    polygons.insert(1, dense);
    let mut p = pipeline();
    let sol = p.process_frame_with_polygons(&polygons, 0.0);
    assert_eq!(p.last_detected_points()[&1].len(), 4);
    assert!(sol.errors[&1] < 0.5);
}

#[test]
fn first_label_of_a_class_wins() {
    let labels = vec![
        LabeledPolygon {
            class_id: 4,
            points: vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0), Point2::new(0.0, 1.0)],
        },
        LabeledPolygon {
            class_id: 4,
            points: vec![Point2::new(5.0, 5.0), Point2::new(6.0, 5.0), Point2::new(5.0, 6.0)],
        },
    ];
    let grouped = polygons_from_labels(&labels);
    assert_eq!(grouped.len(), 1);
    assert_eq!(grouped[&4][0], Point2::new(0.0, 0.0));
}

#[test]
fn catalog_and_colors_load_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let models = dir.path().join("models.json");
    std::fs::write(&models, ModelCatalog::standard().to_json().unwrap()).unwrap();
    std::fs::write(
        dir.path().join("tangram_square.mtl"),
        "newmtl square\nKd 1.0 0.0 0.0\n",
    )
    .unwrap();
    let p = TangramPipeline::new(&models, Some(dir.path()), PipelineConfig::default()).unwrap();
    assert_eq!(p.models().get(1).unwrap().color_bgr, [0, 0, 255]);

    let missing = TangramPipeline::new(dir.path().join("nope.json"), None, PipelineConfig::default());
    assert!(matches!(missing, Err(PipelineError::Catalog(_))));
}

// Camera-frame path: rendered pieces plus one prototype channel per piece.

const W: usize = 320;
const H: usize = 320;
const STRIDE: usize = 4;

fn small_h() -> Homography {
    Homography::new(Matrix3::new(16.0, 1.0, 160.0, -0.5, 15.0, 160.0, 5e-4, -5e-4, 1.0))
}

fn inside(poly: &[Point2<f64>], x: f64, y: f64) -> bool {
    let n = poly.len();
    let mut c = false;
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (poly[i], poly[j]);
        if (pi.y > y) != (pj.y > y) && x < (pj.x - pi.x) * (y - pi.y) / (pj.y - pi.y) + pi.x {
            c = !c;
        }
        j = i;
    }
    c
}

struct CameraFrame {
    pixels: Vec<u8>,
    protos: Vec<f32>,
    detections: Vec<Detection>,
}

fn camera_frame(polygons: &ClassPolygons) -> CameraFrame {
    let mut pixels = vec![40u8; W * H];
    for y in 0..H {
        for x in 0..W {
            if polygons.values().any(|p| inside(p, x as f64, y as f64)) {
                pixels[y * W + x] = 210;
            }
        }
    }
    let (pw, ph) = (W / STRIDE, H / STRIDE);
    let mut protos = vec![-8.0f32; NUM_CLASSES * pw * ph];
    let mut detections = Vec::new();
    for (&c, poly) in polygons {
        for py in 0..ph {
            for px in 0..pw {
                let fx = (px as f64 + 0.5) * STRIDE as f64 - 0.5;
                let fy = (py as f64 + 0.5) * STRIDE as f64 - 0.5;
                if inside(poly, fx, fy) {
                    protos[c * pw * ph + py * pw + px] = 8.0;
                }
            }
        }
        let (mut x0, mut y0, mut x1, mut y1) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for p in poly {
            x0 = x0.min(p.x);
            y0 = y0.min(p.y);
            x1 = x1.max(p.x);
            y1 = y1.max(p.y);
        }
        let mut coeffs = vec![0.0f32; NUM_CLASSES];
        coeffs[c] = 1.0;
        detections.push(Detection {
            class_id: c,
            bbox: BBox {
                cx: (0.5 * (x0 + x1)) as f32,
                cy: (0.5 * (y0 + y1)) as f32,
                w: (x1 - x0) as f32 + 4.0,
                h: (y1 - y0) as f32 + 4.0,
            },
            mask_coeffs: coeffs,
        });
    }
    CameraFrame {
        pixels,
        protos,
        detections,
    }
}

fn camera_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.mask_decode.input_size = W as f32;
    cfg
}

#[test]
fn camera_frame_is_refined_and_solved() {
    let polygons = scene(&small_h());
    let cam = camera_frame(&polygons);
    let frame = FrameView::new(W, H, 1, &cam.pixels).unwrap();
    let protos = ProtoMasks::new(NUM_CLASSES, H / STRIDE, W / STRIDE, &cam.protos).unwrap();

    let mut p = TangramPipeline::with_catalog(ModelCatalog::standard(), camera_config());
    let sol = p.process_frame(&frame, &cam.detections, &protos, 0.0).unwrap();

    assert!(p.last_refined_polygons().len() >= 4);
    for poly in p.last_refined_polygons().values() {
        assert!(poly.iter().all(|v| (0.0..=1.0).contains(&v.x) && (0.0..=1.0).contains(&v.y)));
    }
    assert!(sol.errors.len() >= 4, "solved classes: {:?}", sol.errors.keys());
    assert!(sol.tracking_quality > 0.0);
    assert!(sol.mean_error().unwrap() < 3.0, "errors {:?}", sol.errors);
}

#[test]
fn malformed_frame_and_protos_are_errors() {
    let polygons = scene(&small_h());
    let cam = camera_frame(&polygons);
    let protos = ProtoMasks::new(NUM_CLASSES, H / STRIDE, W / STRIDE, &cam.protos).unwrap();
    let mut p = TangramPipeline::with_catalog(ModelCatalog::standard(), camera_config());

    let short = FrameView {
        width: W,
        height: H,
        channels: 3,
        data: &cam.pixels,
    };
    let err = p.process_frame(&short, &cam.detections, &protos, 0.0).unwrap_err();
    assert!(matches!(err, PipelineError::Frame(FrameError::BufferLength { .. })));

    let frame = FrameView::new(W, H, 1, &cam.pixels).unwrap();
    let mut bad = cam.detections.clone();
    bad[0].mask_coeffs.pop();
    let err = p.process_frame(&frame, &bad, &protos, 0.0).unwrap_err();
    assert!(matches!(err, PipelineError::ProtoMask(ProtoMaskError::Coefficients { .. })));
}

#[test]
fn duplicate_and_unknown_detections_are_skipped() {
    let polygons: ClassPolygons = scene(&small_h()).into_iter().filter(|(c, _)| [1, 2, 4].contains(c)).collect();
    let cam = camera_frame(&polygons);
    let frame = FrameView::new(W, H, 1, &cam.pixels).unwrap();
    let protos = ProtoMasks::new(NUM_CLASSES, H / STRIDE, W / STRIDE, &cam.protos).unwrap();
    let mut detections = cam.detections.clone();
    let mut unknown = detections[0].clone();
    unknown.class_id = 42;
    detections.push(unknown);
    detections.push(detections[1].clone());

    let mut p = TangramPipeline::with_catalog(ModelCatalog::standard(), camera_config());
    let sol = p.process_frame(&frame, &detections, &protos, 0.0).unwrap();
    assert!(p.last_refinement_quality().keys().all(|c| [1, 2, 4].contains(c)));
    assert!(!sol.errors.contains_key(&42));
    assert!(sol.errors.keys().all(|c| [1, 2, 4].contains(c)));
}
