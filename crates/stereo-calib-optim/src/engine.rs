//! Stereo calibration from an accumulated corpus.

use log::{info, warn};
use nalgebra::{Isometry3, Matrix3, Point2, Translation3, UnitQuaternion, Vector3};
use stereo_calib_core::{
    BoardGeometry, CameraParams, CameraSide, CorpusSet, DistortionModel, Intrinsics,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::linear::{
    average_relative_pose, fallback_intrinsics, pose_from_homography, view_homographies,
    zhang_intrinsics,
};
use crate::{
    CalibrationResult, LmStereoOptimizer, MonoEstimate, MonoViews, Precalibration,
    StereoGuess, StereoOptimizer, StereoProblem,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("not enough observations: {available} available, at least {required} required")]
    InsufficientData { available: usize, required: usize },
    #[error("frame {frame_index}: expected {expected} corners per camera")]
    ObservationShape { frame_index: u64, expected: usize },
    #[error("calibration is degenerate: {0}")]
    Degenerate(String),
    #[error("seed was fitted with the {seed} model, but {requested} was requested")]
    SeedMismatch {
        seed: DistortionModel,
        requested: DistortionModel,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationOptions {
    /// Smallest corpus accepted by [`CalibrationEngine::calibrate`].
    pub min_observations: usize,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            min_observations: 4,
        }
    }
}

/// Linear initialisation, optional per-camera precalibration, then a joint
/// stereo solve.
pub struct CalibrationEngine {
    options: CalibrationOptions,
    optimizer: Box<dyn StereoOptimizer>,
}

impl Default for CalibrationEngine {
    fn default() -> Self {
        Self::new(CalibrationOptions::default())
    }
}

impl CalibrationEngine {
    pub fn new(options: CalibrationOptions) -> Self {
        Self {
            options,
            optimizer: Box::new(LmStereoOptimizer::default()),
        }
    }

    pub fn with_optimizer(mut self, optimizer: Box<dyn StereoOptimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn options(&self) -> &CalibrationOptions {
        &self.options
    }

    /// Calibrate the rig from `corpus`.
    ///
    /// `seed`, when given, replaces the camera parameters and relative pose of
    /// the initial guess; it must have been fitted under `model`.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip_all,
            fields(observations = corpus.len(), model = %model, max_iterations)
        )
    )]
    pub fn calibrate(
        &self,
        corpus: &CorpusSet,
        geometry: &BoardGeometry,
        model: &DistortionModel,
        max_iterations: usize,
        precalibration: &dyn Precalibration,
        seed: Option<&CalibrationResult>,
    ) -> Result<CalibrationResult, CalibrationError> {
        let required = self.options.min_observations.max(1);
        if corpus.len() < required {
            return Err(CalibrationError::InsufficientData {
                available: corpus.len(),
                required,
            });
        }

        let expected = geometry.corner_count();
        if let Some(bad) = corpus
            .observations()
            .iter()
            .find(|o| o.left.len() != expected || o.right.len() != expected)
        {
            return Err(CalibrationError::ObservationShape {
                frame_index: bad.frame_index,
                expected,
            });
        }

        if let Some(seed) = seed {
            let count = model.coefficient_count();
            if seed.distortion_model != *model
                || seed.left.distortion.len() != count
                || seed.right.distortion.len() != count
            {
                return Err(CalibrationError::SeedMismatch {
                    seed: seed.distortion_model,
                    requested: *model,
                });
            }
        }

        let board3 = geometry.board_points();
        let board2 = geometry.planar_points();
        let left_views: Vec<&[Point2<f64>]> = corpus
            .observations()
            .iter()
            .map(|o| o.left.as_slice())
            .collect();
        let right_views: Vec<&[Point2<f64>]> = corpus
            .observations()
            .iter()
            .map(|o| o.right.as_slice())
            .collect();

        let mut estimates = Vec::with_capacity(2);
        for (side, views) in [
            (CameraSide::Left, left_views.as_slice()),
            (CameraSide::Right, right_views.as_slice()),
        ] {
            let seed_camera = seed.map(|s| match side {
                CameraSide::Left => &s.left,
                CameraSide::Right => &s.right,
            });
            let linear = initial_estimate(
                side,
                corpus,
                &board2,
                views,
                model,
                seed_camera.map(|c| c.intrinsics),
            )?;
            let data = MonoViews {
                side,
                board: &board3,
                views,
            };
            let mut estimate = precalibration.refine(data, model, max_iterations, linear)?;
            if let Some(camera) = seed_camera {
                estimate.camera = camera.clone();
            }
            estimates.push(estimate);
        }
        let right = estimates.pop();
        let left = estimates.pop();
        let (Some(left), Some(right)) = (left, right) else {
            return Err(CalibrationError::Degenerate(
                "missing per-camera estimate".to_string(),
            ));
        };

        let relative = match seed {
            Some(s) => Isometry3::from_parts(
                Translation3::from(s.translation),
                UnitQuaternion::from_matrix(&s.rotation),
            ),
            None => average_relative_pose(&left.poses, &right.poses).ok_or_else(|| {
                CalibrationError::Degenerate("cannot estimate the relative pose".to_string())
            })?,
        };

        let problem = StereoProblem {
            model: *model,
            board: &board3,
            left: &left_views,
            right: &right_views,
            max_iterations,
        };
        let guess = StereoGuess {
            left: left.camera,
            right: right.camera,
            relative,
            poses: left.poses,
        };
        let fit = self.optimizer.optimize(&problem, guess)?;
        if !fit.converged {
            warn!(
                "stereo optimization stopped after {} iterations without converging",
                fit.iterations
            );
        }

        let rotation = fit.relative.rotation.to_rotation_matrix().into_inner();
        let translation = fit.relative.translation.vector;
        let essential = essential_matrix(&rotation, &translation);
        let fundamental =
            fundamental_matrix(&fit.left.intrinsics, &fit.right.intrinsics, &essential);

        info!(
            "stereo calibration: rms {:.4} px, baseline {:.4}, {} iterations, {} observations",
            fit.rms,
            translation.norm(),
            fit.iterations,
            corpus.len()
        );
        Ok(CalibrationResult {
            distortion_model: *model,
            left: fit.left,
            right: fit.right,
            rotation,
            translation,
            essential: Some(essential),
            fundamental,
            reprojection_error: fit.rms,
            iteration_count: fit.iterations,
            image_size: corpus.image_size,
        })
    }
}

/// Homography-based intrinsics and poses for one camera.
fn initial_estimate(
    side: CameraSide,
    corpus: &CorpusSet,
    board: &[Point2<f64>],
    views: &[&[Point2<f64>]],
    model: &DistortionModel,
    seed_intrinsics: Option<Intrinsics>,
) -> Result<MonoEstimate, CalibrationError> {
    let homographies = view_homographies(board, views)
        .into_iter()
        .zip(corpus.observations())
        .map(|(h, o)| {
            h.ok_or_else(|| {
                CalibrationError::Degenerate(format!(
                    "{side} corners of frame {} do not define a homography",
                    o.frame_index
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let intrinsics = match seed_intrinsics {
        Some(k) => k,
        None => match zhang_intrinsics(&homographies, views) {
            Some(k) => k,
            None => {
                let size = corpus.image_size.ok_or_else(|| {
                    CalibrationError::Degenerate(format!(
                        "{side} camera: linear intrinsics failed and the image size is unknown"
                    ))
                })?;
                warn!("{side} camera: linear intrinsics failed, guessing from image size");
                fallback_intrinsics(size)
            }
        },
    };

    let poses = homographies
        .iter()
        .map(|h| {
            pose_from_homography(&intrinsics, h).ok_or_else(|| {
                CalibrationError::Degenerate(format!("{side} camera: cannot recover a board pose"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(MonoEstimate {
        camera: CameraParams::undistorted(intrinsics, model),
        poses,
    })
}

fn skew(t: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -t.z, t.y, //
        t.z, 0.0, -t.x, //
        -t.y, t.x, 0.0,
    )
}

/// `E = [t]x R`; satisfies `x_r^T E x_l = 0` on normalized coordinates.
pub fn essential_matrix(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Matrix3<f64> {
    skew(translation) * rotation
}

/// `F = K_r^-T E K_l^-1`, scaled so `F[2,2] = 1` when possible.
pub fn fundamental_matrix(
    left: &Intrinsics,
    right: &Intrinsics,
    essential: &Matrix3<f64>,
) -> Option<Matrix3<f64>> {
    let kl_inv = left.k_matrix().try_inverse()?;
    let kr_inv = right.k_matrix().try_inverse()?;
    let f = kr_inv.transpose() * essential * kl_inv;
    let s = f[(2, 2)];
    Some(if s.abs() > 1e-12 { f / s } else { f })
}
