use std::fmt::Write as _;
use std::path::Path;

use assert_cmd::Command;
use nalgebra::{Matrix3, Point2};
use predicates::prelude::*;
use tangram_pose::core::{Homography, ModelCatalog, Pose, NUM_CLASSES};

const W: f64 = 1280.0;
const H: f64 = 720.0;

fn label_text() -> String {
    let h = Homography::new(Matrix3::new(40.0, 3.0, 640.0, -2.0, 38.0, 360.0, 1e-3, -1e-3, 1.0));
    let catalog = ModelCatalog::standard();
    let mut out = String::new();
    for c in 0..NUM_CLASSES {
        let pose = Pose::new(0.35 * c as f64 - 1.0, 4.5 * (c % 4) as f64 - 6.75, 4.5 * (c / 4) as f64 - 2.25);
        write!(out, "{c}").unwrap();
        for m in &catalog.get(c).unwrap().vertices {
            let p: Point2<f64> = h.apply(pose.apply(*m));
            write!(out, " {:.6} {:.6}", p.x / W, p.y / H).unwrap();
        }
        out.push('\n');
    }
    out
}

fn write_labels(dir: &Path, n: usize) -> Vec<String> {
    let text = label_text();
    (0..n)
        .map(|i| {
            let path = dir.join(format!("frame_{i:03}.txt"));
            std::fs::write(&path, &text).unwrap();
            path.display().to_string()
        })
        .collect()
}

#[test]
fn track_writes_one_solution_per_label_file() {
    let dir = tempfile::tempdir().unwrap();
    let labels = write_labels(dir.path(), 6);
    let out = dir.path().join("solutions.json");
    let plane = dir.path().join("plane.json");

    Command::cargo_bin("tangram-pose")
        .unwrap()
        .arg("track")
        .args(&labels)
        .args(["--width", "1280", "--height", "720"])
        .arg("--out")
        .arg(&out)
        .arg("--plane-out")
        .arg(&plane)
        .assert()
        .success();

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    let frames = json.as_array().unwrap();
    assert_eq!(frames.len(), 6);
    assert_eq!(frames[0]["frame"], 0);
    assert!(frames[5]["solution"]["homography_locked"].as_bool().unwrap());
    assert_eq!(frames[5]["solution"]["poses"].as_object().unwrap().len(), NUM_CLASSES);

    let plane: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&plane).unwrap()).unwrap();
    assert_eq!(plane.as_array().unwrap().len(), NUM_CLASSES);
}

#[test]
fn no_lock_flag_keeps_homography_free() {
    let dir = tempfile::tempdir().unwrap();
    let labels = write_labels(dir.path(), 6);
    let out = dir.path().join("solutions.json");
    Command::cargo_bin("tangram-pose")
        .unwrap()
        .arg("track")
        .args(&labels)
        .args(["--width", "1280", "--height", "720", "--no-lock"])
        .arg("--out")
        .arg(&out)
        .assert()
        .success();
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert!(json
        .as_array()
        .unwrap()
        .iter()
        .all(|f| !f["solution"]["homography_locked"].as_bool().unwrap()));
}

#[test]
fn track_without_frame_size_fails() {
    let dir = tempfile::tempdir().unwrap();
    let labels = write_labels(dir.path(), 1);
    Command::cargo_bin("tangram-pose")
        .unwrap()
        .arg("track")
        .args(&labels)
        .arg("--out")
        .arg(dir.path().join("out.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("--width/--height"));
}

#[test]
fn catalog_prints_standard_models() {
    Command::cargo_bin("tangram-pose")
        .unwrap()
        .arg("catalog")
        .assert()
        .success()
        .stdout(predicate::str::contains("tangram_parallelogram"))
        .stdout(predicate::str::contains("tangram_triangle_small_2"));
}

#[test]
fn catalog_rejects_incomplete_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("models.json");
    std::fs::write(&path, r#"{"tangram_square": {"type": "square", "vertices": [[0,0],[1,0],[1,1],[0,1]]}}"#).unwrap();
    Command::cargo_bin("tangram-pose")
        .unwrap()
        .args(["catalog", "--models"])
        .arg(&path)
        .assert()
        .failure();
}

#[test]
fn default_config_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    Command::cargo_bin("tangram-pose")
        .unwrap()
        .args(["default-config", "--out"])
        .arg(&path)
        .assert()
        .success();
    let cfg = tangram_pose::PipelineConfig::load_json(&path).unwrap();
    assert_eq!(cfg, tangram_pose::PipelineConfig::default());
}
