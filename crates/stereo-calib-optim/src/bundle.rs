//! Planar bundle adjustment problems (one camera, or a rigid stereo pair).
//!
//! Parameter blocks (`nd` = distortion coefficient count):
//!
//! ```text
//! mono:   camera = [fx fy cx cy d0..dnd], pose_i = [rx ry rz tx ty tz]
//! stereo: left, right (cameras), relative (left -> right), pose_i (board -> left)
//! ```
//!
//! Rotations are axis-angle vectors.

use std::sync::Arc;

use nalgebra::{Isometry3, Point2, Point3, Translation3, UnitQuaternion, Vector3};
use stereo_calib_core::{CameraParams, DistortionModel, Intrinsics};
use tiny_solver::factors::na as ts_na;

use crate::backend::{ReprojectionGraph, SolveReport, SolverOptions, Values};
use crate::factors::ViewReprojection;
use crate::CalibrationError;

pub(crate) const POSE_PARAMS: usize = 6;

const CAMERA: &str = "camera";
const LEFT: &str = "left";
const RIGHT: &str = "right";
const RELATIVE: &str = "relative";

fn pose_key(view: usize) -> String {
    format!("pose_{view}")
}

pub(crate) fn pose_to_params(pose: &Isometry3<f64>) -> ts_na::DVector<f64> {
    let r = pose.rotation.scaled_axis();
    let t = pose.translation.vector;
    ts_na::DVector::from_vec(vec![r.x, r.y, r.z, t.x, t.y, t.z])
}

pub(crate) fn pose_from_params(p: &[f64]) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::new(p[3], p[4], p[5]),
        UnitQuaternion::from_scaled_axis(Vector3::new(p[0], p[1], p[2])),
    )
}

fn camera_to_params(camera: &CameraParams) -> ts_na::DVector<f64> {
    let k = &camera.intrinsics;
    let mut p = vec![k.fx, k.fy, k.cx, k.cy];
    p.extend_from_slice(&camera.distortion);
    ts_na::DVector::from_vec(p)
}

fn camera_from_params(p: &[f64], model: &DistortionModel) -> CameraParams {
    let nd = model.coefficient_count();
    CameraParams {
        intrinsics: Intrinsics::new(p[0], p[1], p[2], p[3]),
        distortion: p[4..4 + nd].to_vec(),
    }
}

fn block<'v>(values: &'v Values, key: &str, len: usize) -> Result<&'v [f64], CalibrationError> {
    values
        .get(key)
        .map(|v| v.as_slice())
        .filter(|v| v.len() == len)
        .ok_or_else(|| {
            CalibrationError::Degenerate(format!("solver returned no usable `{key}` block"))
        })
}

fn board_points(board: &[Point3<f64>]) -> Arc<[[f64; 3]]> {
    board.iter().map(|p| [p.x, p.y, p.z]).collect()
}

fn observed(view: &[Point2<f64>]) -> Vec<[f64; 2]> {
    view.iter().map(|p| [p.x, p.y]).collect()
}

/// One camera, many board views.
pub(crate) struct MonoBundle<'a> {
    pub model: DistortionModel,
    pub board: &'a [Point3<f64>],
    pub views: &'a [&'a [Point2<f64>]],
}

impl MonoBundle<'_> {
    fn graph(&self) -> ReprojectionGraph {
        let board = board_points(self.board);
        let mut graph = ReprojectionGraph::default();
        for (i, view) in self.views.iter().enumerate() {
            graph.add(
                &[CAMERA, &pose_key(i)],
                ViewReprojection::new(self.model, Arc::clone(&board), observed(view)),
            );
        }
        graph
    }

    pub(crate) fn solve(
        &self,
        camera: &CameraParams,
        poses: &[Isometry3<f64>],
        max_iterations: usize,
        options: &SolverOptions,
    ) -> Result<(CameraParams, Vec<Isometry3<f64>>, SolveReport), CalibrationError> {
        let mut initial = Values::new();
        initial.insert(CAMERA.to_string(), camera_to_params(camera));
        for (i, pose) in poses.iter().enumerate() {
            initial.insert(pose_key(i), pose_to_params(pose));
        }

        let (values, report) = self.graph().solve(initial, max_iterations, options);
        let nc = 4 + self.model.coefficient_count();
        let camera = camera_from_params(block(&values, CAMERA, nc)?, &self.model);
        let poses = (0..self.views.len())
            .map(|i| block(&values, &pose_key(i), POSE_PARAMS).map(pose_from_params))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((camera, poses, report))
    }
}

/// Rigid stereo pair, many board views; poses are expressed in the left camera.
pub(crate) struct StereoBundle<'a> {
    pub model: DistortionModel,
    pub board: &'a [Point3<f64>],
    pub left: &'a [&'a [Point2<f64>]],
    pub right: &'a [&'a [Point2<f64>]],
}

/// Unpacked stereo parameters.
#[derive(Clone, Debug)]
pub(crate) struct StereoState {
    pub left: CameraParams,
    pub right: CameraParams,
    /// Left camera -> right camera.
    pub relative: Isometry3<f64>,
    /// Board -> left camera, one per view.
    pub poses: Vec<Isometry3<f64>>,
}

impl StereoBundle<'_> {
    fn graph(&self) -> ReprojectionGraph {
        let board = board_points(self.board);
        let mut graph = ReprojectionGraph::default();
        for (i, (left, right)) in self.left.iter().zip(self.right).enumerate() {
            let pose = pose_key(i);
            graph.add(
                &[LEFT, &pose],
                ViewReprojection::new(self.model, Arc::clone(&board), observed(left)),
            );
            graph.add(
                &[RIGHT, RELATIVE, &pose],
                ViewReprojection::new(self.model, Arc::clone(&board), observed(right)),
            );
        }
        graph
    }

    pub(crate) fn solve(
        &self,
        state: &StereoState,
        max_iterations: usize,
        options: &SolverOptions,
    ) -> Result<(StereoState, SolveReport), CalibrationError> {
        let mut initial = Values::new();
        initial.insert(LEFT.to_string(), camera_to_params(&state.left));
        initial.insert(RIGHT.to_string(), camera_to_params(&state.right));
        initial.insert(RELATIVE.to_string(), pose_to_params(&state.relative));
        for (i, pose) in state.poses.iter().enumerate() {
            initial.insert(pose_key(i), pose_to_params(pose));
        }

        let (values, report) = self.graph().solve(initial, max_iterations, options);
        let nc = 4 + self.model.coefficient_count();
        let fitted = StereoState {
            left: camera_from_params(block(&values, LEFT, nc)?, &self.model),
            right: camera_from_params(block(&values, RIGHT, nc)?, &self.model),
            relative: pose_from_params(block(&values, RELATIVE, POSE_PARAMS)?),
            poses: (0..self.left.len())
                .map(|i| block(&values, &pose_key(i), POSE_PARAMS).map(pose_from_params))
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok((fitted, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticRig;
    use approx::assert_relative_eq;

    #[test]
    fn pose_parameters_round_trip() {
        let pose = Isometry3::from_parts(
            Translation3::new(0.1, -0.2, 0.7),
            UnitQuaternion::from_scaled_axis(Vector3::new(0.3, -0.1, 0.05)),
        );
        let back = pose_from_params(pose_to_params(&pose).as_slice());
        assert_relative_eq!(back.to_homogeneous(), pose.to_homogeneous(), epsilon = 1e-12);
    }

    fn left_views(rig: &SyntheticRig) -> (Vec<Point3<f64>>, Vec<Vec<Point2<f64>>>) {
        let corpus = rig.corpus();
        let views = corpus.observations().iter().map(|o| o.left.clone()).collect();
        (rig.geometry.board_points(), views)
    }

    #[test]
    fn mono_solve_recovers_a_perturbed_camera() {
        let rig = SyntheticRig::with_views(DistortionModel::default(), 6);
        let (board, views) = left_views(&rig);
        let views: Vec<&[Point2<f64>]> = views.iter().map(Vec::as_slice).collect();
        let bundle = MonoBundle {
            model: rig.model,
            board: &board,
            views: &views,
        };

        let mut start = rig.left.clone();
        start.intrinsics.fx *= 1.02;
        start.intrinsics.cy += 4.0;
        let (camera, poses, report) = bundle
            .solve(&start, &rig.poses, 20, &SolverOptions::default())
            .expect("solve");

        assert!(report.iterations <= 20);
        assert!(report.final_cost < report.initial_cost);
        assert!(report.rms < 1e-3, "rms {}", report.rms);
        assert_eq!(poses.len(), views.len());
        assert_relative_eq!(camera.intrinsics.fx, rig.left.intrinsics.fx, max_relative = 1e-5);
    }

    #[test]
    fn zero_iterations_return_the_start_point() {
        let rig = SyntheticRig::with_views(DistortionModel::Fisheye, 4);
        let (board, views) = left_views(&rig);
        let views: Vec<&[Point2<f64>]> = views.iter().map(Vec::as_slice).collect();
        let bundle = MonoBundle {
            model: rig.model,
            board: &board,
            views: &views,
        };
        let mut start = rig.left.clone();
        start.intrinsics.fy += 10.0;

        let (camera, poses, report) = bundle
            .solve(&start, &rig.poses, 0, &SolverOptions::default())
            .expect("solve");
        assert_eq!(report.iterations, 0);
        assert_eq!(camera, start);
        assert_eq!(report.final_cost, report.initial_cost);
        for (got, expected) in poses.iter().zip(&rig.poses) {
            assert_relative_eq!(got.to_homogeneous(), expected.to_homogeneous(), epsilon = 1e-12);
        }
    }

    #[test]
    fn stereo_solve_stays_within_the_cap() {
        let rig = SyntheticRig::new(DistortionModel::default()).with_noise(0.2);
        let corpus = rig.corpus();
        let board = rig.geometry.board_points();
        let left: Vec<&[Point2<f64>]> =
            corpus.observations().iter().map(|o| o.left.as_slice()).collect();
        let right: Vec<&[Point2<f64>]> =
            corpus.observations().iter().map(|o| o.right.as_slice()).collect();
        let bundle = StereoBundle {
            model: rig.model,
            board: &board,
            left: &left,
            right: &right,
        };
        let state = StereoState {
            left: rig.left.clone(),
            right: rig.right.clone(),
            relative: rig.relative,
            poses: rig.poses.clone(),
        };

        for cap in [1, 2] {
            let (fitted, report) = bundle
                .solve(&state, cap, &SolverOptions::default())
                .expect("solve");
            assert!(report.iterations <= cap);
            assert!(report.final_cost <= report.initial_cost);
            assert_eq!(fitted.poses.len(), left.len());
        }
    }
}
