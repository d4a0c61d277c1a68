//! Deterministic synthetic stereo rigs.
//!
//! Used by tests and demos to produce corner corpora with known ground
//! truth. Every generator here is a pure function of its arguments.

use nalgebra::{Isometry3, Point2, Translation3, UnitQuaternion, Vector3};
use stereo_calib_core::{
    BoardGeometry, CameraParams, CornerObservation, CorpusSet, DistortionModel, Intrinsics,
    RadialTerms,
};

/// Ground truth of a simulated rig looking at a 9x6 board.
#[derive(Clone, Debug)]
pub struct SyntheticRig {
    pub model: DistortionModel,
    pub geometry: BoardGeometry,
    pub image_size: [u32; 2],
    pub left: CameraParams,
    pub right: CameraParams,
    /// Left camera -> right camera.
    pub relative: Isometry3<f64>,
    /// Board -> left camera, one per view.
    pub poses: Vec<Isometry3<f64>>,
    /// Peak amplitude of the deterministic pixel jitter.
    pub noise: f64,
}

/// Small but clearly non-zero coefficients for `model`.
pub fn plausible_distortion(model: &DistortionModel) -> Vec<f64> {
    let mut coeffs = match *model {
        DistortionModel::Standard { radial, .. } => {
            let mut k = vec![-0.12, 0.05, -0.01, 0.0, 0.0];
            k.truncate(radial.count());
            k
        }
        DistortionModel::Extended { .. } => vec![-0.1, 0.03, 0.0, 0.0, 0.02, 0.0, 0.0, 0.0],
        DistortionModel::Fisheye => vec![0.02, -0.01, 0.0, 0.0],
    };
    if model.has_tangential() {
        coeffs.extend([0.0008, -0.0005]);
    }
    coeffs
}

impl SyntheticRig {
    pub fn new(model: DistortionModel) -> Self {
        Self::with_views(model, 8)
    }

    pub fn with_views(model: DistortionModel, views: usize) -> Self {
        let geometry = BoardGeometry {
            width: 9,
            height: 6,
            square_size: 0.03,
        };
        let distortion = plausible_distortion(&model);
        let left = CameraParams {
            intrinsics: Intrinsics::new(800.0, 780.0, 320.0, 240.0),
            distortion: distortion.clone(),
        };
        let right = CameraParams {
            intrinsics: Intrinsics::new(805.0, 790.0, 316.0, 244.0),
            distortion,
        };
        let relative = Isometry3::from_parts(
            Translation3::new(-0.1, 0.0, 0.0),
            UnitQuaternion::from_scaled_axis(Vector3::new(0.0, 0.05, 0.01)),
        );

        let (cx, cy) = (
            (geometry.width - 1) as f64 * geometry.square_size / 2.0,
            (geometry.height - 1) as f64 * geometry.square_size / 2.0,
        );
        let poses = (0..views)
            .map(|k| {
                let a = 0.4 + std::f64::consts::TAU * k as f64 / views.max(1) as f64;
                let axis = Vector3::new(0.3 * a.sin(), 0.3 * a.cos(), 0.08 * (2.0 * a).sin());
                let rotation = UnitQuaternion::from_scaled_axis(axis);
                // Keep the board centre near the optical axis between the cameras.
                let centre = Vector3::new(
                    0.05 + 0.02 * a.cos(),
                    0.01 * a.sin(),
                    0.65 + 0.05 * a.cos(),
                );
                let t = centre - rotation * Vector3::new(cx, cy, 0.0);
                Isometry3::from_parts(Translation3::from(t), rotation)
            })
            .collect();

        Self {
            model,
            geometry,
            image_size: [640, 480],
            left,
            right,
            relative,
            poses,
            noise: 0.0,
        }
    }

    /// Add a reproducible pixel jitter of at most `amplitude`.
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude;
        self
    }

    fn jitter(&self, view: usize, corner: usize, axis: usize) -> f64 {
        if self.noise == 0.0 {
            return 0.0;
        }
        let seed = (view * 7919 + corner * 104_729 + axis * 15_485_863) as f64;
        let u = ((seed * 12.9898).sin() * 43_758.545_3).fract();
        self.noise * (2.0 * u.abs() - 1.0)
    }

    fn project_view(
        &self,
        camera: &CameraParams,
        pose: &Isometry3<f64>,
        view: usize,
    ) -> Option<Vec<Point2<f64>>> {
        self.geometry
            .board_points()
            .iter()
            .enumerate()
            .map(|(c, p)| {
                let px = camera.project(&self.model, pose, p)?;
                Some(Point2::new(
                    px.x + self.jitter(view, c, 0),
                    px.y + self.jitter(view, c, 1),
                ))
            })
            .collect()
    }

    /// Corpus of every view, frame indices `0, 10, 20, ...`.
    pub fn corpus(&self) -> CorpusSet {
        let mut corpus = CorpusSet::new(self.geometry).with_image_size(Some(self.image_size));
        let n = self.geometry.corner_count();
        for (v, pose) in self.poses.iter().enumerate() {
            let right_pose = self.relative * pose;
            let observation = self
                .project_view(&self.left, pose, v)
                .zip(self.project_view(&self.right, &right_pose, v + 1000))
                .and_then(|(l, r)| CornerObservation::new(10 * v as u64, l, r, n));
            if let Some(observation) = observation {
                corpus.insert(observation);
            }
        }
        corpus
    }
}

/// Rig using the 4-term standard radial model.
pub fn four_term_rig(views: usize) -> SyntheticRig {
    SyntheticRig::with_views(
        DistortionModel::Standard {
            radial: RadialTerms::Four,
            tangential: false,
        },
        views,
    )
}
