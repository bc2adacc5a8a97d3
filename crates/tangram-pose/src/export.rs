//! Plane-coordinate export for presentation layers.
//!
//! Plane coordinates are the posed, scaled model outlines on the reference
//! plane with the Y axis flipped, so that +Y points up as in a typical scene
//! graph.

use std::fs;
use std::path::Path;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tangram_pose_core::{polygon::mirror_polygon, wrap_angle, BaSolution, ModelCatalog};

use crate::ConfigError;

/// One posed piece on the reference plane (Y up).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaneCoordinates {
    pub class_id: usize,
    pub name: String,
    pub center: [f64; 2],
    /// Rotation in the Y-up frame, radians.
    pub rotation: f64,
    pub mirrored: bool,
    pub vertices: Vec<[f64; 2]>,
    pub color_bgr: [u8; 3],
}

/// Plane coordinates of every posed class in `solution`, ordered by class id.
pub fn plane_coordinates(solution: &BaSolution, catalog: &ModelCatalog) -> Vec<PlaneCoordinates> {
    solution
        .poses
        .iter()
        .filter_map(|(&class_id, pose)| {
            let model = catalog.get(class_id)?;
            let mirrored = solution
                .correspondences
                .get(&class_id)
                .is_some_and(|c| c.mirrored_model);
            let outline = if mirrored {
                mirror_polygon(&model.vertices)
            } else {
                model.vertices.clone()
            };
            let s = solution.scale;
            let vertices = outline
                .iter()
                .map(|m| {
                    let q = pose.apply(Point2::new(s * m.x, s * m.y));
                    [q.x, -q.y]
                })
                .collect();
            Some(PlaneCoordinates {
                class_id,
                name: model.name.clone(),
                center: [pose.tx, -pose.ty],
                rotation: wrap_angle(-pose.theta),
                mirrored,
                vertices,
                color_bgr: model.color_bgr,
            })
        })
        .collect()
}

pub fn write_plane_coordinates_json(
    path: impl AsRef<Path>,
    coords: &[PlaneCoordinates],
) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(coords)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tangram_pose_core::{Correspondence, Pose};

    #[test]
    fn coordinates_are_y_flipped() {
        let catalog = ModelCatalog::standard();
        let mut sol = BaSolution::identity();
        sol.scale = 2.0;
        sol.poses.insert(1, Pose::new(0.5, 3.0, 4.0));
        let coords = plane_coordinates(&sol, &catalog);
        assert_eq!(coords.len(), 1);
        let sq = &coords[0];
        assert_eq!(sq.name, "tangram_square");
        assert_eq!(sq.center, [3.0, -4.0]);
        assert_relative_eq!(sq.rotation, -0.5);

        let m = catalog.get(1).unwrap().vertices[0];
        let q = Pose::new(0.5, 3.0, 4.0).apply(Point2::new(2.0 * m.x, 2.0 * m.y));
        assert_relative_eq!(sq.vertices[0][0], q.x);
        assert_relative_eq!(sq.vertices[0][1], -q.y);
    }

    #[test]
    fn mirrored_piece_exports_mirrored_outline() {
        let catalog = ModelCatalog::standard();
        let mut sol = BaSolution::identity();
        sol.poses.insert(0, Pose::default());
        sol.correspondences.insert(
            0,
            Correspondence {
                mirrored_model: true,
                ..Correspondence::default()
            },
        );
        let coords = plane_coordinates(&sol, &catalog);
        let expected = mirror_polygon(&catalog.get(0).unwrap().vertices);
        assert!(coords[0].mirrored);
        for (v, e) in coords[0].vertices.iter().zip(&expected) {
            assert_relative_eq!(v[0], e.x);
            assert_relative_eq!(v[1], -e.y);
        }
    }

    #[test]
    fn writes_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plane.json");
        let mut sol = BaSolution::identity();
        sol.poses.insert(4, Pose::default());
        write_plane_coordinates_json(&path, &plane_coordinates(&sol, &ModelCatalog::standard())).unwrap();
        let back: Vec<PlaneCoordinates> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].class_id, 4);
    }
}
