use nalgebra::Point2;
use tangram_pose_core::{polygon::cyclic_vertex_distance, polygon::is_clockwise, BBox, Detection, GrayImage};
use tangram_pose_refine::{MaskDecodeParams, MaskProbabilities, RefinementQuality, Refiner, RefinerParams};

const W: usize = 320;
const H: usize = 320;
const STRIDE: usize = 4;

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

fn render(poly: &[Point2<f64>], fg: u8, bg: u8) -> GrayImage {
    let mut data = vec![bg; W * H];
    for y in 0..H {
        for x in 0..W {
            if inside(poly, x as f64, y as f64) {
                data[y * W + x] = fg;
            }
        }
    }
    GrayImage {
        width: W,
        height: H,
        data,
    }
}

/// Prototype-resolution mask of the polygon, optionally dilated by `grow` proto pixels.
fn proto_mask(poly: &[Point2<f64>], grow: i64) -> MaskProbabilities {
    let (pw, ph) = (W / STRIDE, H / STRIDE);
    let mut data = vec![0.0f32; pw * ph];
    for v in 0..ph as i64 {
        for u in 0..pw as i64 {
            let mut hit = false;
            for dv in -grow..=grow {
                for du in -grow..=grow {
                    let cx = ((u + du) as f64 + 0.5) * STRIDE as f64 - 0.5;
                    let cy = ((v + dv) as f64 + 0.5) * STRIDE as f64 - 0.5;
                    hit |= inside(poly, cx, cy);
                }
            }
            if hit {
                data[v as usize * pw + u as usize] = 0.9;
            }
        }
    }
    MaskProbabilities {
        width: pw,
        height: ph,
        data,
    }
}

fn detection_for(class_id: usize, poly: &[Point2<f64>]) -> Detection {
    let (mut x0, mut y0, mut x1, mut y1) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for p in poly {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    Detection {
        class_id,
        bbox: BBox {
            cx: (0.5 * (x0 + x1)) as f32,
            cy: (0.5 * (y0 + y1)) as f32,
            w: (x1 - x0 + 8.0) as f32,
            h: (y1 - y0 + 8.0) as f32,
        },
        mask_coeffs: Vec::new(),
    }
}

fn refiner() -> Refiner {
    Refiner::new(
        RefinerParams::default(),
        MaskDecodeParams {
            threshold: 0.5,
            input_size: W as f32,
        },
    )
}

fn rotated(pts: &[(f64, f64)], angle_deg: f64, center: (f64, f64)) -> Vec<Point2<f64>> {
    let (s, c) = angle_deg.to_radians().sin_cos();
    pts.iter()
        .map(|&(x, y)| Point2::new(center.0 + c * x - s * y, center.1 + s * x + c * y))
        .collect()
}

#[test]
fn rotated_square_corners_are_recovered() {
    let _ = env_logger::builder().is_test(true).try_init();
    let truth = rotated(
        &[(-45.0, -45.0), (45.0, -45.0), (45.0, 45.0), (-45.0, 45.0)],
        17.0,
        (161.3, 158.7),
    );
    let img = render(&truth, 210, 40);
    let res = refiner().refine(&img.view(), &detection_for(1, &truth), &proto_mask(&truth, 0), 0, 2);

    assert_eq!(res.quality, RefinementQuality::LineFit);
    assert_eq!(res.polygon_px.len(), 4);
    assert_eq!(res.lines.len(), 4);
    assert!(is_clockwise(&res.polygon_px));
    let err = cyclic_vertex_distance(&res.polygon_px, &truth).unwrap();
    assert!(err < 1.0, "mean corner deviation {err:.3}px");
    for (n, p) in res.polygon_norm.iter().zip(&res.polygon_px) {
        assert!((n.x * W as f64 - p.x).abs() < 1e-9);
    }
    assert!(res.timings.contains_key("total"));
}

#[test]
fn triangle_from_bloated_mask_snaps_to_edges() {
    let truth = rotated(&[(-60.0, 20.0), (60.0, 20.0), (0.0, -40.0)], -32.0, (150.0, 170.0));
    let img = render(&truth, 60, 190);
    let res = refiner().refine(&img.view(), &detection_for(4, &truth), &proto_mask(&truth, 1), 3, 2);

    assert_eq!(res.quality, RefinementQuality::LineFit);
    let err = cyclic_vertex_distance(&res.polygon_px, &truth).unwrap();
    assert!(err < 1.0, "mean corner deviation {err:.3}px");
}

#[test]
fn flat_frame_falls_back_to_coarse_polygon() {
    let truth = rotated(
        &[(-40.0, -40.0), (40.0, -40.0), (40.0, 40.0), (-40.0, 40.0)],
        0.0,
        (160.0, 160.0),
    );
    let img = render(&truth, 90, 90);
    let res = refiner().refine(&img.view(), &detection_for(1, &truth), &proto_mask(&truth, 0), 4, 1);

    assert_eq!(res.quality, RefinementQuality::CoarseOnly);
    assert_eq!(res.polygon_px.len(), 4);
    let err = cyclic_vertex_distance(&res.polygon_px, &truth).unwrap();
    assert!(err < 4.0, "coarse deviation {err:.3}px");
    assert!(res.lines.len() == 4 && res.secondary_lines.is_empty());
}

#[test]
fn empty_mask_yields_no_polygon() {
    let truth = rotated(&[(-20.0, -20.0), (20.0, -20.0), (0.0, 20.0)], 0.0, (100.0, 100.0));
    let img = render(&truth, 200, 20);
    let empty = MaskProbabilities {
        width: W / STRIDE,
        height: H / STRIDE,
        data: vec![0.0; (W / STRIDE) * (H / STRIDE)],
    };
    let res = refiner().refine(&img.view(), &detection_for(5, &truth), &empty, 0, 1);
    assert_eq!(res.quality, RefinementQuality::Empty);
    assert!(res.polygon_px.is_empty());
    assert!(!res.quality.has_polygon());
}
