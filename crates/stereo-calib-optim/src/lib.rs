//! Stereo calibration of a two-camera rig from planar board observations.
//!
//! [`CalibrationEngine::calibrate`] turns a [`CorpusSet`] into a
//! [`CalibrationResult`]:
//!
//! 1. per-camera Zhang intrinsics and homography poses,
//! 2. an optional per-camera refinement ([`Precalibration`]),
//! 3. a joint Levenberg-Marquardt solve (tiny-solver, autodiff Jacobians)
//!    over both cameras, the left -> right transform and every board pose
//!    ([`StereoOptimizer`]).
//!
//! Results persist as JSON ([`CalibrationResult::write_json`]) and can seed a
//! later run under the same [`DistortionModel`].
//!
//! ```no_run
//! use stereo_calib_core::DistortionModel;
//! use stereo_calib_optim::{synthetic::SyntheticRig, CalibrationEngine, SkipPrecalibration};
//!
//! let rig = SyntheticRig::new(DistortionModel::default());
//! let corpus = rig.corpus();
//! let result = CalibrationEngine::default()
//!     .calibrate(&corpus, &rig.geometry, &rig.model, 30, &SkipPrecalibration, None)
//!     .unwrap();
//! println!("rms {:.3} px", result.reprojection_error);
//! ```
//!
//! [`CorpusSet`]: stereo_calib_core::CorpusSet
//! [`DistortionModel`]: stereo_calib_core::DistortionModel

mod backend;
mod bundle;
mod engine;
mod factors;
mod linear;
mod precalib;
mod result;
mod stereo;
pub mod synthetic;

pub use backend::{SolveReport, SolverOptions};
pub use engine::{
    essential_matrix, fundamental_matrix, CalibrationEngine, CalibrationError, CalibrationOptions,
};
pub use linear::{
    average_relative_pose, fallback_intrinsics, pose_from_homography, view_homographies,
    zhang_intrinsics,
};
pub use precalib::{MonoEstimate, MonoViews, Precalibration, SkipPrecalibration, SoloPrecalibration};
pub use result::{CalibrationResult, ResultStoreError};
pub use stereo::{LmStereoOptimizer, StereoFit, StereoGuess, StereoOptimizer, StereoProblem};
