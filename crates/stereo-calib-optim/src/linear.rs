//! Closed-form initial guesses: Zhang intrinsics, planar poses, rig extrinsics.

use log::{debug, warn};
use nalgebra::{
    DMatrix, Isometry3, Matrix3, Point2, Rotation3, Translation3, UnitQuaternion, Vector3,
    Vector6,
};
use stereo_calib_core::{estimate_homography, Homography, Intrinsics};

/// Weight of the zero-skew row relative to the homography constraints.
const ZERO_SKEW_WEIGHT: f64 = 10.0;

fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> Vector6<f64> {
    let hi = h.column(i);
    let hj = h.column(j);
    Vector6::new(
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    )
}

/// Similarity that centres `points` and scales their RMS radius to `sqrt(2)`.
fn conditioning(points: impl Iterator<Item = Point2<f64>> + Clone) -> Matrix3<f64> {
    let (mut n, mut sx, mut sy) = (0.0, 0.0, 0.0);
    for p in points.clone() {
        n += 1.0;
        sx += p.x;
        sy += p.y;
    }
    if n == 0.0 {
        return Matrix3::identity();
    }
    let (cx, cy) = (sx / n, sy / n);
    let ms = points
        .map(|p| (p.x - cx).powi(2) + (p.y - cy).powi(2))
        .sum::<f64>()
        / n;
    let s = if ms > 1e-12 { (2.0 / ms).sqrt() } else { 1.0 };
    Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

/// Board-to-image homographies, one per view; `None` for degenerate views.
pub fn view_homographies(board: &[Point2<f64>], views: &[&[Point2<f64>]]) -> Vec<Option<Homography>> {
    views
        .iter()
        .map(|pixels| estimate_homography(board, pixels))
        .collect()
}

/// Zhang's closed-form intrinsics with a zero-skew prior.
///
/// Needs at least two non-parallel views. Returns `None` if the linear
/// system does not yield a positive-definite image of the absolute conic.
pub fn zhang_intrinsics(
    homographies: &[Homography],
    pixels: &[&[Point2<f64>]],
) -> Option<Intrinsics> {
    if homographies.len() < 2 {
        return None;
    }

    // Work in conditioned pixel coordinates; the conditioning is upper
    // triangular so K stays zero-skew after undoing it.
    let n_mat = conditioning(pixels.iter().flat_map(|v| v.iter().copied()));
    let n_inv = n_mat.try_inverse()?;

    // Padded to at least 6 rows so the thin SVD exposes the null vector.
    let skew_row = 2 * homographies.len();
    let mut v = DMatrix::<f64>::zeros((skew_row + 1).max(6), 6);
    for (k, h) in homographies.iter().enumerate() {
        let hn = n_mat * h.h;
        let hn = hn / hn.norm();
        let v12 = v_ij(&hn, 0, 1);
        let d = v_ij(&hn, 0, 0) - v_ij(&hn, 1, 1);
        for c in 0..6 {
            v[(2 * k, c)] = v12[c];
            v[(2 * k + 1, c)] = d[c];
        }
    }
    v[(skew_row, 1)] = ZERO_SKEW_WEIGHT;

    let svd = v.svd(false, true);
    let vt = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let mut b = vt.row(min_idx).transpose();
    if b[0] < 0.0 {
        b = -b;
    }
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    if b11 <= 0.0 || denom <= 0.0 {
        return None;
    }
    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if lambda <= 0.0 {
        return None;
    }
    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let u0 = -b13 * alpha * alpha / lambda;

    let k_cond = Matrix3::new(alpha, 0.0, u0, 0.0, beta, v0, 0.0, 0.0, 1.0);
    let k = Intrinsics::from_k_matrix(&(n_inv * k_cond));
    k.is_valid().then_some(k)
}

/// Guess for when Zhang fails: focal length equal to the larger image side,
/// principal point at the image centre.
pub fn fallback_intrinsics(image_size: [u32; 2]) -> Intrinsics {
    let (w, h) = (image_size[0] as f64, image_size[1] as f64);
    let f = w.max(h);
    Intrinsics::new(f, f, w / 2.0, h / 2.0)
}

/// Board -> camera pose from a plane homography and intrinsics.
///
/// The rotation is projected onto SO(3); the sign is chosen so the board
/// lies in front of the camera.
pub fn pose_from_homography(k: &Intrinsics, h: &Homography) -> Option<Isometry3<f64>> {
    let k_inv = k.k_matrix().try_inverse()?;
    let m = k_inv * h.h;
    let n1 = m.column(0).norm();
    let n2 = m.column(1).norm();
    if n1 <= 1e-12 || n2 <= 1e-12 {
        return None;
    }
    let scale = 2.0 / (n1 + n2);

    let mut r1: Vector3<f64> = m.column(0) * scale;
    let mut r2: Vector3<f64> = m.column(1) * scale;
    let mut t: Vector3<f64> = m.column(2) * scale;
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    let r3 = r1.cross(&r2);
    if r3.norm() <= 1e-12 {
        return None;
    }

    let rotation = nearest_rotation(&Matrix3::from_columns(&[r1, r2, r3]))?;
    Some(Isometry3::from_parts(
        Translation3::from(t),
        UnitQuaternion::from_rotation_matrix(&rotation),
    ))
}

/// Closest rotation in the Frobenius sense (polar decomposition).
fn nearest_rotation(m: &Matrix3<f64>) -> Option<Rotation3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fixed = u;
        let mut col = u_fixed.column_mut(2);
        col *= -1.0;
        r = u_fixed * v_t;
    }
    Some(Rotation3::from_matrix_unchecked(r))
}

/// Left -> right transform averaged over views seen by both cameras.
///
/// Rotations are averaged with the chordal L2 mean, translations
/// arithmetically.
pub fn average_relative_pose(
    left: &[Isometry3<f64>],
    right: &[Isometry3<f64>],
) -> Option<Isometry3<f64>> {
    if left.is_empty() || left.len() != right.len() {
        return None;
    }
    let mut rot_sum = Matrix3::<f64>::zeros();
    let mut t_sum = Vector3::<f64>::zeros();
    for (l, r) in left.iter().zip(right) {
        let rel = r * l.inverse();
        rot_sum += rel.rotation.to_rotation_matrix().into_inner();
        t_sum += rel.translation.vector;
    }
    let n = left.len() as f64;
    let rotation = nearest_rotation(&(rot_sum / n))?;
    let spread = left
        .iter()
        .zip(right)
        .map(|(l, r)| ((r * l.inverse()).translation.vector - t_sum / n).norm())
        .fold(0.0, f64::max);
    debug!("relative pose initial guess: max translation spread {spread:.4}");
    if spread > 0.5 * (t_sum / n).norm() {
        warn!("per-view stereo extrinsics disagree; initial guess may be poor");
    }
    Some(Isometry3::from_parts(
        Translation3::from(t_sum / n),
        UnitQuaternion::from_rotation_matrix(&rotation),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    fn board() -> Vec<Point2<f64>> {
        (0..6)
            .flat_map(|j| (0..9).map(move |i| Point2::new(i as f64 * 0.03, j as f64 * 0.03)))
            .collect()
    }

    fn project(k: &Intrinsics, pose: &Isometry3<f64>, board: &[Point2<f64>]) -> Vec<Point2<f64>> {
        board
            .iter()
            .map(|p| {
                let pc = pose * Point3::new(p.x, p.y, 0.0);
                k.to_pixel(Point2::new(pc.x / pc.z, pc.y / pc.z))
            })
            .collect()
    }

    fn poses() -> Vec<Isometry3<f64>> {
        [
            [0.2, 0.1, 0.0, -0.12, -0.07, 0.6],
            [-0.25, 0.15, 0.05, -0.1, -0.08, 0.55],
            [0.1, -0.3, -0.05, -0.14, -0.06, 0.65],
            [-0.15, -0.2, 0.1, -0.1, -0.05, 0.7],
        ]
        .iter()
        .map(|p| {
            Isometry3::from_parts(
                Translation3::new(p[3], p[4], p[5]),
                UnitQuaternion::from_scaled_axis(Vector3::new(p[0], p[1], p[2])),
            )
        })
        .collect()
    }

    #[test]
    fn zhang_recovers_noise_free_intrinsics() {
        let k = Intrinsics::new(800.0, 780.0, 320.0, 240.0);
        let board = board();
        let pixels: Vec<Vec<Point2<f64>>> = poses().iter().map(|p| project(&k, p, &board)).collect();
        let views: Vec<&[Point2<f64>]> = pixels.iter().map(Vec::as_slice).collect();
        let hs: Vec<Homography> = view_homographies(&board, &views)
            .into_iter()
            .map(|h| h.expect("homography"))
            .collect();

        let est = zhang_intrinsics(&hs, &views).expect("intrinsics");
        assert_relative_eq!(est.fx, k.fx, max_relative = 1e-6);
        assert_relative_eq!(est.fy, k.fy, max_relative = 1e-6);
        assert_relative_eq!(est.cx, k.cx, epsilon = 1e-3);
        assert_relative_eq!(est.cy, k.cy, epsilon = 1e-3);

        for (h, truth) in hs.iter().zip(poses()) {
            let pose = pose_from_homography(&est, h).expect("pose");
            assert_relative_eq!(
                pose.to_homogeneous(),
                truth.to_homogeneous(),
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn single_view_is_not_enough() {
        let k = Intrinsics::new(800.0, 780.0, 320.0, 240.0);
        let board = board();
        let pixels = project(&k, &poses()[0], &board);
        let h = estimate_homography(&board, &pixels).expect("homography");
        assert!(zhang_intrinsics(&[h], &[pixels.as_slice()]).is_none());
    }

    #[test]
    fn relative_pose_average_of_consistent_views_is_exact() {
        let rel = Isometry3::from_parts(
            Translation3::new(-0.1, 0.002, 0.001),
            UnitQuaternion::from_scaled_axis(Vector3::new(0.0, 0.05, 0.01)),
        );
        let left = poses();
        let right: Vec<_> = left.iter().map(|p| rel * p).collect();
        let avg = average_relative_pose(&left, &right).expect("average");
        assert_relative_eq!(avg.to_homogeneous(), rel.to_homogeneous(), epsilon = 1e-9);
    }
}
