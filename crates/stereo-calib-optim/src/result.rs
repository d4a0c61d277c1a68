//! Calibration result and its JSON persistence.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use stereo_calib_core::{CameraParams, DistortionModel};

#[derive(thiserror::Error, Debug)]
pub enum ResultStoreError {
    #[error("calibration result not found: {0}")]
    NotFound(PathBuf),
    #[error("calibration result i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("calibration result is corrupt: {0}")]
    Corrupt(String),
    #[error("stored calibration uses the {stored} model, but {requested} was requested")]
    ModelMismatch {
        stored: DistortionModel,
        requested: DistortionModel,
    },
}

/// Fitted stereo rig.
///
/// `rotation` / `translation` map left camera coordinates into the right
/// camera frame: `X_r = R * X_l + t`. Matrices are stored column-major.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub distortion_model: DistortionModel,
    pub left: CameraParams,
    pub right: CameraParams,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    #[serde(default)]
    pub essential: Option<Matrix3<f64>>,
    #[serde(default)]
    pub fundamental: Option<Matrix3<f64>>,
    /// RMS reprojection error over all corners of both cameras, in pixels.
    pub reprojection_error: f64,
    pub iteration_count: usize,
    #[serde(default)]
    pub image_size: Option<[u32; 2]>,
}

impl CalibrationResult {
    /// Structural checks: coefficient vector lengths against the stored
    /// model, finite values, proper rotation.
    pub fn validate(&self) -> Result<(), ResultStoreError> {
        let expected = self.distortion_model.coefficient_count();
        for (side, camera) in [("left", &self.left), ("right", &self.right)] {
            if camera.distortion.len() != expected {
                return Err(ResultStoreError::Corrupt(format!(
                    "{side} camera has {} distortion coefficients, the {} model needs {expected}",
                    camera.distortion.len(),
                    self.distortion_model
                )));
            }
            if !camera.intrinsics.is_valid() || camera.distortion.iter().any(|d| !d.is_finite()) {
                return Err(ResultStoreError::Corrupt(format!(
                    "{side} camera parameters are not finite or have non-positive focal length"
                )));
            }
        }

        let r = &self.rotation;
        let orthonormal = (r.transpose() * r - Matrix3::identity()).norm() < 1e-6;
        if !orthonormal || (r.determinant() - 1.0).abs() > 1e-6 {
            return Err(ResultStoreError::Corrupt(
                "rotation is not a proper rotation matrix".to_string(),
            ));
        }
        let matrices_finite = self.translation.iter().all(|v| v.is_finite())
            && [self.essential, self.fundamental]
                .iter()
                .flatten()
                .all(|m| m.iter().all(|v| v.is_finite()));
        if !matrices_finite {
            return Err(ResultStoreError::Corrupt(
                "extrinsics contain non-finite values".to_string(),
            ));
        }
        if !self.reprojection_error.is_finite() || self.reprojection_error < 0.0 {
            return Err(ResultStoreError::Corrupt(format!(
                "invalid reprojection error {}",
                self.reprojection_error
            )));
        }
        Ok(())
    }

    /// Baseline length in the board's length unit.
    pub fn baseline(&self) -> f64 {
        self.translation.norm()
    }

    pub fn load_json(path: &Path) -> Result<Self, ResultStoreError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ResultStoreError::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let result: Self =
            serde_json::from_str(&text).map_err(|e| ResultStoreError::Corrupt(e.to_string()))?;
        result.validate()?;
        Ok(result)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ResultStoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| ResultStoreError::Corrupt(e.to_string()))?;
        fs::write(path, text)?;
        info!("wrote calibration to {}", path.display());
        Ok(())
    }

    /// Load a stored result to seed a new run under `model`.
    ///
    /// Fails before any optimization if the stored model differs; the
    /// coefficients are never truncated or padded.
    pub fn load_seed(path: &Path, model: &DistortionModel) -> Result<Self, ResultStoreError> {
        let stored = Self::load_json(path)?;
        if stored.distortion_model != *model {
            return Err(ResultStoreError::ModelMismatch {
                stored: stored.distortion_model,
                requested: *model,
            });
        }
        Ok(stored)
    }
}
