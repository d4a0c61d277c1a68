//! Per-camera seeding strategies run before the joint stereo solve.

use log::info;
use nalgebra::{Isometry3, Point2, Point3};
use stereo_calib_core::{CameraParams, CameraSide, DistortionModel};

use crate::backend::SolverOptions;
use crate::bundle::MonoBundle;
use crate::CalibrationError;

/// Single-camera state used as an initial guess.
#[derive(Clone, Debug)]
pub struct MonoEstimate {
    pub camera: CameraParams,
    /// Board -> camera, one per view.
    pub poses: Vec<Isometry3<f64>>,
}

/// Observations of one camera.
#[derive(Clone, Copy, Debug)]
pub struct MonoViews<'a> {
    pub side: CameraSide,
    pub board: &'a [Point3<f64>],
    pub views: &'a [&'a [Point2<f64>]],
}

/// Turns a linear estimate into the seed for the stereo solve.
pub trait Precalibration {
    fn refine(
        &self,
        data: MonoViews<'_>,
        model: &DistortionModel,
        max_iterations: usize,
        estimate: MonoEstimate,
    ) -> Result<MonoEstimate, CalibrationError>;
}

/// Uses the linear estimate as is.
#[derive(Clone, Copy, Debug, Default)]
pub struct SkipPrecalibration;

impl Precalibration for SkipPrecalibration {
    fn refine(
        &self,
        _: MonoViews<'_>,
        _: &DistortionModel,
        _: usize,
        estimate: MonoEstimate,
    ) -> Result<MonoEstimate, CalibrationError> {
        Ok(estimate)
    }
}

/// Calibrates each camera on its own observations first.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoloPrecalibration {
    pub options: SolverOptions,
}

impl Precalibration for SoloPrecalibration {
    fn refine(
        &self,
        data: MonoViews<'_>,
        model: &DistortionModel,
        max_iterations: usize,
        estimate: MonoEstimate,
    ) -> Result<MonoEstimate, CalibrationError> {
        let bundle = MonoBundle {
            model: *model,
            board: data.board,
            views: data.views,
        };
        let (camera, poses, report) =
            bundle.solve(&estimate.camera, &estimate.poses, max_iterations, &self.options)?;
        if !report.rms.is_finite() {
            return Err(CalibrationError::Degenerate(format!(
                "{} camera precalibration diverged",
                data.side
            )));
        }
        info!(
            "{} camera precalibrated: rms {:.4} px after {} iterations",
            data.side, report.rms, report.iterations
        );
        Ok(MonoEstimate { camera, poses })
    }
}
