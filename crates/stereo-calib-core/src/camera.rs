//! Pinhole camera with a pluggable lens distortion model.

use nalgebra::{Isometry3, Matrix3, Point2, Point3};
use serde::{Deserialize, Serialize};

use crate::DistortionModel;

/// Zero-skew pinhole intrinsics in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Camera matrix `K`.
    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Read `fx, fy, cx, cy` from an upper-triangular camera matrix; skew is
    /// dropped.
    pub fn from_k_matrix(k: &Matrix3<f64>) -> Self {
        let s = k[(2, 2)];
        Self {
            fx: k[(0, 0)] / s,
            fy: k[(1, 1)] / s,
            cx: k[(0, 2)] / s,
            cy: k[(1, 2)] / s,
        }
    }

    #[inline]
    pub fn to_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(self.fx * p.x + self.cx, self.fy * p.y + self.cy)
    }

    #[inline]
    pub fn to_normalized(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    pub fn is_valid(&self) -> bool {
        [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite())
            && self.fx > 0.0
            && self.fy > 0.0
    }
}

/// Intrinsics plus the coefficient vector of the active distortion model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraParams {
    pub intrinsics: Intrinsics,
    pub distortion: Vec<f64>,
}

impl CameraParams {
    /// Camera with an ideal lens under `model`.
    pub fn undistorted(intrinsics: Intrinsics, model: &DistortionModel) -> Self {
        Self {
            intrinsics,
            distortion: model.zero_coefficients(),
        }
    }

    /// Project a point given in camera coordinates.
    ///
    /// Returns `None` for points at or behind the camera plane.
    pub fn project_camera_point(
        &self,
        model: &DistortionModel,
        pc: &Point3<f64>,
    ) -> Option<Point2<f64>> {
        if pc.z <= 1e-12 {
            return None;
        }
        let n = Point2::new(pc.x / pc.z, pc.y / pc.z);
        let d = model.distort(n, &self.distortion);
        Some(self.intrinsics.to_pixel(d))
    }

    /// Project a world point observed from `pose` (world -> camera).
    #[inline]
    pub fn project(
        &self,
        model: &DistortionModel,
        pose: &Isometry3<f64>,
        pw: &Point3<f64>,
    ) -> Option<Point2<f64>> {
        self.project_camera_point(model, &(pose * pw))
    }

    /// Iteratively invert the distortion for a pixel, returning the
    /// normalized undistorted coordinate.
    pub fn undistort_pixel(&self, model: &DistortionModel, px: Point2<f64>) -> Point2<f64> {
        let target = self.intrinsics.to_normalized(px);
        let mut u = target;
        for _ in 0..20 {
            let d = model.distort(u, &self.distortion);
            let step = target - d;
            u += step;
            if step.norm_squared() < 1e-24 {
                break;
            }
        }
        u
    }
}
