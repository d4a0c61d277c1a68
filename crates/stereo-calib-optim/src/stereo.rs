//! Joint refinement of both cameras and their relative pose.

use nalgebra::{Isometry3, Point2, Point3};
use stereo_calib_core::{CameraParams, DistortionModel};

use crate::backend::SolverOptions;
use crate::bundle::{StereoBundle, StereoState};
use crate::CalibrationError;

/// Data of one stereo solve.
#[derive(Clone, Copy, Debug)]
pub struct StereoProblem<'a> {
    pub model: DistortionModel,
    pub board: &'a [Point3<f64>],
    pub left: &'a [&'a [Point2<f64>]],
    pub right: &'a [&'a [Point2<f64>]],
    pub max_iterations: usize,
}

/// Starting point for the solver.
#[derive(Clone, Debug)]
pub struct StereoGuess {
    pub left: CameraParams,
    pub right: CameraParams,
    /// Left camera -> right camera.
    pub relative: Isometry3<f64>,
    /// Board -> left camera, one per view.
    pub poses: Vec<Isometry3<f64>>,
}

#[derive(Clone, Debug)]
pub struct StereoFit {
    pub left: CameraParams,
    pub right: CameraParams,
    pub relative: Isometry3<f64>,
    pub poses: Vec<Isometry3<f64>>,
    /// RMS over all corners of both cameras, pixels.
    pub rms: f64,
    pub iterations: usize,
    pub converged: bool,
}

pub trait StereoOptimizer {
    fn optimize(
        &self,
        problem: &StereoProblem<'_>,
        guess: StereoGuess,
    ) -> Result<StereoFit, CalibrationError>;
}

/// [`StereoOptimizer`] backed by tiny-solver's Levenberg-Marquardt with
/// automatic differentiation.
#[derive(Clone, Copy, Debug, Default)]
pub struct LmStereoOptimizer {
    /// Stopping rule; the iteration cap is taken from the problem.
    pub options: SolverOptions,
}

impl StereoOptimizer for LmStereoOptimizer {
    fn optimize(
        &self,
        problem: &StereoProblem<'_>,
        guess: StereoGuess,
    ) -> Result<StereoFit, CalibrationError> {
        let bundle = StereoBundle {
            model: problem.model,
            board: problem.board,
            left: problem.left,
            right: problem.right,
        };
        let start = StereoState {
            left: guess.left,
            right: guess.right,
            relative: guess.relative,
            poses: guess.poses,
        };
        let (state, report) = bundle.solve(&start, problem.max_iterations, &self.options)?;
        if !report.rms.is_finite() {
            return Err(CalibrationError::Degenerate(
                "stereo optimization produced non-finite residuals".to_string(),
            ));
        }
        Ok(StereoFit {
            left: state.left,
            right: state.right,
            relative: state.relative,
            poses: state.poses,
            rms: report.rms,
            iterations: report.iterations,
            converged: report.converged,
        })
    }
}
