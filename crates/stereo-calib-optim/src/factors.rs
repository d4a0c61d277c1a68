//! Reprojection residuals evaluated by tiny-solver.
//!
//! The math is generic over the scalar so the solver can run it on dual
//! numbers and read exact Jacobians off the result. All matrix types come
//! from the `nalgebra` that tiny-solver re-exports.

use std::sync::Arc;

use stereo_calib_core::DistortionModel;
use tiny_solver::factors::na as ts_na;
use tiny_solver::factors::Factor;
use ts_na::{DVector, RealField};

/// Residual assigned to each coordinate of a point that lands behind a camera.
pub(crate) const BEHIND_CAMERA_PENALTY: f64 = 1e4;

#[inline]
fn lit<T: RealField>(v: f64) -> T {
    ts_na::convert(v)
}

fn cross<T: RealField>(a: &[T; 3], b: &[T; 3]) -> [T; 3] {
    [
        a[1].clone() * b[2].clone() - a[2].clone() * b[1].clone(),
        a[2].clone() * b[0].clone() - a[0].clone() * b[2].clone(),
        a[0].clone() * b[1].clone() - a[1].clone() * b[0].clone(),
    ]
}

fn dot<T: RealField>(a: &[T; 3], b: &[T; 3]) -> T {
    a[0].clone() * b[0].clone() + a[1].clone() * b[1].clone() + a[2].clone() * b[2].clone()
}

/// Rotate `p` by the axis-angle vector `w` (Rodrigues).
pub(crate) fn rotate<T: RealField>(w: &[T; 3], p: &[T; 3]) -> [T; 3] {
    let theta2 = dot(w, w);
    let wxp = cross(w, p);
    if theta2 <= lit(1e-16) {
        // First order; exact at zero and free of the 0/0 of the closed form.
        return [
            p[0].clone() + wxp[0].clone(),
            p[1].clone() + wxp[1].clone(),
            p[2].clone() + wxp[2].clone(),
        ];
    }
    let theta = theta2.clone().sqrt();
    let (sin, cos) = theta.clone().sin_cos();
    let a = sin / theta;
    let b = (T::one() - cos.clone()) / theta2 * dot(w, p);
    std::array::from_fn(|i| {
        p[i].clone() * cos.clone() + wxp[i].clone() * a.clone() + w[i].clone() * b.clone()
    })
}

/// Apply a `[rx ry rz tx ty tz]` pose to `p`.
pub(crate) fn transform<T: RealField>(pose: &[T], p: &[T; 3]) -> [T; 3] {
    let w = [pose[0].clone(), pose[1].clone(), pose[2].clone()];
    let r = rotate(&w, p);
    [
        r[0].clone() + pose[3].clone(),
        r[1].clone() + pose[4].clone(),
        r[2].clone() + pose[5].clone(),
    ]
}

fn tangential<T: RealField>(x: &T, y: &T, r2: &T, p1: T, p2: T) -> (T, T) {
    let two: T = lit(2.0);
    let xy = x.clone() * y.clone();
    (
        two.clone() * p1.clone() * xy.clone()
            + p2.clone() * (r2.clone() + two.clone() * x.clone() * x.clone()),
        p1 * (r2.clone() + two.clone() * y.clone() * y.clone()) + two * p2 * xy,
    )
}

/// Distort a normalized point; mirrors [`DistortionModel::distort`].
pub(crate) fn distort<T: RealField>(model: &DistortionModel, x: T, y: T, k: &[T]) -> (T, T) {
    let c = |i: usize| k.get(i).cloned().unwrap_or_else(T::zero);
    let r2 = x.clone() * x.clone() + y.clone() * y.clone();

    match *model {
        DistortionModel::Fisheye => {
            if r2 <= lit(1e-24) {
                return (x, y);
            }
            let r = r2.sqrt();
            let theta = r.clone().atan();
            let t2 = theta.clone() * theta.clone();
            let poly = T::one()
                + t2.clone()
                    * (c(0) + t2.clone() * (c(1) + t2.clone() * (c(2) + t2 * c(3))));
            let scale = theta * poly / r;
            (x * scale.clone(), y * scale)
        }
        DistortionModel::Standard { radial, tangential: with_tangential } => {
            let n = radial.count();
            let mut factor = T::one();
            let mut rp = T::one();
            for i in 0..n {
                rp *= r2.clone();
                factor += c(i) * rp.clone();
            }
            let (dx, dy) = if with_tangential {
                tangential(&x, &y, &r2, c(n), c(n + 1))
            } else {
                (T::zero(), T::zero())
            };
            (x * factor.clone() + dx, y * factor + dy)
        }
        DistortionModel::Extended { tangential: with_tangential } => {
            let r4 = r2.clone() * r2.clone();
            let r6 = r4.clone() * r2.clone();
            let r8 = r4.clone() * r4.clone();
            let num = T::one()
                + c(0) * r2.clone()
                + c(1) * r4.clone()
                + c(2) * r6.clone()
                + c(3) * r8.clone();
            let den = T::one()
                + c(4) * r2.clone()
                + c(5) * r4
                + c(6) * r6
                + c(7) * r8;
            let factor = num / den;
            let (dx, dy) = if with_tangential {
                tangential(&x, &y, &r2, c(8), c(9))
            } else {
                (T::zero(), T::zero())
            };
            (x * factor.clone() + dx, y * factor + dy)
        }
    }
}

/// Pixel of a camera-frame point; `camera` is `[fx fy cx cy d..]`.
pub(crate) fn project<T: RealField>(
    model: &DistortionModel,
    camera: &[T],
    pc: [T; 3],
) -> Option<[T; 2]> {
    let [x, y, z] = pc;
    if z <= lit(1e-12) {
        return None;
    }
    let (xd, yd) = distort(model, x / z.clone(), y / z, &camera[4..]);
    Some([
        camera[0].clone() * xd + camera[2].clone(),
        camera[1].clone() * yd + camera[3].clone(),
    ])
}

/// Reprojection of every board corner of one view into one camera.
///
/// Parameter blocks are `[camera, pose_1, .., pose_n]`; board points go
/// through `pose_n` first and `pose_1` last, so `[right, relative, board]`
/// chains the stereo extrinsics onto a board pose.
#[derive(Debug, Clone)]
pub(crate) struct ViewReprojection {
    model: DistortionModel,
    board: Arc<[[f64; 3]]>,
    observed: Vec<[f64; 2]>,
}

impl ViewReprojection {
    pub(crate) fn new(model: DistortionModel, board: Arc<[[f64; 3]]>, observed: Vec<[f64; 2]>) -> Self {
        debug_assert_eq!(board.len(), observed.len());
        Self {
            model,
            board,
            observed,
        }
    }

    pub(crate) fn residual_count(&self) -> usize {
        2 * self.observed.len()
    }

    fn residuals<T: RealField>(&self, params: &[DVector<T>]) -> DVector<T> {
        let camera = params[0].as_slice();
        let mut out = Vec::with_capacity(self.residual_count());
        for (pw, obs) in self.board.iter().zip(&self.observed) {
            let mut p: [T; 3] = std::array::from_fn(|i| lit(pw[i]));
            for pose in params[1..].iter().rev() {
                p = transform(pose.as_slice(), &p);
            }
            match project(&self.model, camera, p) {
                Some([u, v]) => {
                    out.push(u - lit(obs[0]));
                    out.push(v - lit(obs[1]));
                }
                None => {
                    out.push(lit(BEHIND_CAMERA_PENALTY));
                    out.push(lit(BEHIND_CAMERA_PENALTY));
                }
            }
        }
        DVector::from_vec(out)
    }
}

impl<T: RealField> Factor<T> for ViewReprojection {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        self.residuals(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Point2, Point3, Translation3, UnitQuaternion, Vector3};
    use stereo_calib_core::{CameraParams, Intrinsics, RadialTerms};

    use crate::synthetic::plausible_distortion;

    fn pose_params(pose: &Isometry3<f64>) -> DVector<f64> {
        let r = pose.rotation.scaled_axis();
        let t = pose.translation.vector;
        DVector::from_vec(vec![r.x, r.y, r.z, t.x, t.y, t.z])
    }

    #[test]
    fn rotation_matches_unit_quaternion() {
        for w in [
            Vector3::new(0.3, -0.2, 0.1),
            Vector3::new(0.0, 0.0, 1e-10),
            Vector3::zeros(),
        ] {
            let p = Vector3::new(0.4, -1.2, 2.0);
            let expected = UnitQuaternion::from_scaled_axis(w) * p;
            let got = rotate(&[w.x, w.y, w.z], &[p.x, p.y, p.z]);
            assert_relative_eq!(got[0], expected.x, epsilon = 1e-12);
            assert_relative_eq!(got[1], expected.y, epsilon = 1e-12);
            assert_relative_eq!(got[2], expected.z, epsilon = 1e-12);
        }
    }

    #[test]
    fn generic_distortion_agrees_with_the_core_model() {
        let models = [
            DistortionModel::Standard {
                radial: RadialTerms::Four,
                tangential: true,
            },
            DistortionModel::default(),
            DistortionModel::Extended { tangential: true },
            DistortionModel::Fisheye,
        ];
        for model in models {
            let k = plausible_distortion(&model);
            let p = Point2::new(0.21, -0.13);
            let expected = model.distort(p, &k);
            let (x, y) = distort(&model, p.x, p.y, &k);
            assert_relative_eq!(x, expected.x, epsilon = 1e-14);
            assert_relative_eq!(y, expected.y, epsilon = 1e-14);
        }
    }

    #[test]
    fn chained_poses_match_camera_projection() {
        let model = DistortionModel::default();
        let camera = CameraParams {
            intrinsics: Intrinsics::new(800.0, 790.0, 320.0, 240.0),
            distortion: plausible_distortion(&model),
        };
        let relative = Isometry3::from_parts(
            Translation3::new(-0.1, 0.002, 0.001),
            UnitQuaternion::from_scaled_axis(Vector3::new(0.0, 0.05, 0.01)),
        );
        let pose = Isometry3::from_parts(
            Translation3::new(-0.1, -0.05, 0.8),
            UnitQuaternion::from_scaled_axis(Vector3::new(0.2, -0.1, 0.05)),
        );
        let board: Arc<[[f64; 3]]> = Arc::from(vec![[0.0, 0.0, 0.0], [0.03, 0.06, 0.0]]);
        let observed = vec![[300.0, 200.0], [330.0, 260.0]];
        let factor = ViewReprojection::new(model, Arc::clone(&board), observed.clone());

        let mut cam = vec![800.0, 790.0, 320.0, 240.0];
        cam.extend_from_slice(&camera.distortion);
        let params = [
            DVector::from_vec(cam),
            pose_params(&relative),
            pose_params(&pose),
        ];
        let r = Factor::<f64>::residual_func(&factor, &params);
        assert_eq!(r.len(), factor.residual_count());

        for (i, pw) in board.iter().enumerate() {
            let px = camera
                .project(&model, &(relative * pose), &Point3::new(pw[0], pw[1], pw[2]))
                .expect("in front of the camera");
            assert_relative_eq!(r[2 * i], px.x - observed[i][0], epsilon = 1e-9);
            assert_relative_eq!(r[2 * i + 1], px.y - observed[i][1], epsilon = 1e-9);
        }
    }

    #[test]
    fn points_behind_the_camera_get_the_penalty() {
        let factor = ViewReprojection::new(
            DistortionModel::Fisheye,
            Arc::from(vec![[0.0, 0.0, 0.0]]),
            vec![[0.0, 0.0]],
        );
        let params = [
            DVector::from_vec(vec![500.0, 500.0, 320.0, 240.0, 0.0, 0.0, 0.0, 0.0]),
            DVector::from_vec(vec![0.0, 0.0, 0.0, 0.0, 0.0, -1.0]),
        ];
        let r = Factor::<f64>::residual_func(&factor, &params);
        assert_eq!(r.as_slice(), &[BEHIND_CAMERA_PENALTY, BEHIND_CAMERA_PENALTY]);
    }
}
