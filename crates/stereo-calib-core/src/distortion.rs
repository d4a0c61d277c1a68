//! Lens distortion models.
//!
//! A run uses exactly one [`DistortionModel`]. The model fixes the length and
//! meaning of every camera's coefficient vector:
//!
//! | model | coefficients |
//! |---|---|
//! | `Standard { Four, .. }` | `k1..k4` (+ `p1, p2`) |
//! | `Standard { Five, .. }` | `k1..k5` (+ `p1, p2`) |
//! | `Extended { .. }` | `k1..k8` rational (+ `p1, p2`) |
//! | `Fisheye` | `k1..k4` Kannala-Brandt |

use std::fmt;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Number of polynomial radial terms of the standard model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadialTerms {
    Four,
    Five,
}

impl RadialTerms {
    #[inline]
    pub fn count(self) -> usize {
        match self {
            RadialTerms::Four => 4,
            RadialTerms::Five => 5,
        }
    }
}

/// Closed set of supported distortion parameterizations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistortionModel {
    /// Polynomial radial distortion, optional tangential terms.
    Standard { radial: RadialTerms, tangential: bool },
    /// Rational 8-coefficient radial distortion, optional tangential terms.
    Extended { tangential: bool },
    /// Equidistant fisheye (Kannala-Brandt, 4 coefficients).
    Fisheye,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DistortionConfigError {
    #[error("the fisheye model cannot be combined with the 8-coefficient model")]
    FisheyeWithExtended,
    #[error("the fisheye model has no tangential coefficients")]
    FisheyeWithTangential,
    #[error("standard radial coefficient count must be 4 or 5 (got {0})")]
    InvalidRadialCount(u32),
}

impl Default for DistortionModel {
    fn default() -> Self {
        DistortionModel::Standard {
            radial: RadialTerms::Five,
            tangential: false,
        }
    }
}

impl DistortionModel {
    /// Resolve the command line flag combination into a single model.
    ///
    /// `standard_radial` is only consulted when neither `use_8` nor
    /// `fisheye` is set.
    pub fn from_flags(
        use_8: bool,
        tangential: bool,
        fisheye: bool,
        standard_radial: u32,
    ) -> Result<Self, DistortionConfigError> {
        if fisheye {
            if use_8 {
                return Err(DistortionConfigError::FisheyeWithExtended);
            }
            if tangential {
                return Err(DistortionConfigError::FisheyeWithTangential);
            }
            return Ok(DistortionModel::Fisheye);
        }
        if use_8 {
            return Ok(DistortionModel::Extended { tangential });
        }
        let radial = match standard_radial {
            4 => RadialTerms::Four,
            5 => RadialTerms::Five,
            n => return Err(DistortionConfigError::InvalidRadialCount(n)),
        };
        Ok(DistortionModel::Standard { radial, tangential })
    }

    /// Exact length of a coefficient vector under this model.
    pub fn coefficient_count(&self) -> usize {
        match *self {
            DistortionModel::Standard { radial, tangential } => {
                radial.count() + if tangential { 2 } else { 0 }
            }
            DistortionModel::Extended { tangential } => 8 + if tangential { 2 } else { 0 },
            DistortionModel::Fisheye => 4,
        }
    }

    #[inline]
    pub fn has_tangential(&self) -> bool {
        matches!(
            *self,
            DistortionModel::Standard {
                tangential: true,
                ..
            } | DistortionModel::Extended { tangential: true }
        )
    }

    /// Coefficient vector describing an ideal (undistorted) lens.
    pub fn zero_coefficients(&self) -> Vec<f64> {
        vec![0.0; self.coefficient_count()]
    }

    /// Apply distortion to a normalized image point `(X/Z, Y/Z)`.
    ///
    /// `coeffs` must have exactly [`Self::coefficient_count`] entries; callers
    /// validate that once up front, shorter slices are read as zero-padded.
    pub fn distort(&self, p: Point2<f64>, coeffs: &[f64]) -> Point2<f64> {
        let c = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;

        match *self {
            DistortionModel::Fisheye => {
                let r = r2.sqrt();
                if r < 1e-12 {
                    return p;
                }
                let theta = r.atan();
                let t2 = theta * theta;
                let theta_d = theta * (1.0 + t2 * (c(0) + t2 * (c(1) + t2 * (c(2) + t2 * c(3)))));
                let scale = theta_d / r;
                Point2::new(x * scale, y * scale)
            }
            DistortionModel::Standard { radial, tangential } => {
                let n = radial.count();
                let mut radial_factor = 1.0;
                let mut rp = 1.0;
                for i in 0..n {
                    rp *= r2;
                    radial_factor += c(i) * rp;
                }
                let (dx, dy) = if tangential {
                    tangential_offset(x, y, r2, c(n), c(n + 1))
                } else {
                    (0.0, 0.0)
                };
                Point2::new(x * radial_factor + dx, y * radial_factor + dy)
            }
            DistortionModel::Extended { tangential } => {
                let r4 = r2 * r2;
                let r6 = r4 * r2;
                let r8 = r4 * r4;
                let num = 1.0 + c(0) * r2 + c(1) * r4 + c(2) * r6 + c(3) * r8;
                let den = 1.0 + c(4) * r2 + c(5) * r4 + c(6) * r6 + c(7) * r8;
                let radial_factor = num / den;
                let (dx, dy) = if tangential {
                    tangential_offset(x, y, r2, c(8), c(9))
                } else {
                    (0.0, 0.0)
                };
                Point2::new(x * radial_factor + dx, y * radial_factor + dy)
            }
        }
    }
}

#[inline]
fn tangential_offset(x: f64, y: f64, r2: f64, p1: f64, p2: f64) -> (f64, f64) {
    (
        2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
        p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
    )
}

impl fmt::Display for DistortionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DistortionModel::Standard { radial, tangential } => {
                write!(f, "standard ({} radial", radial.count())?;
                if tangential {
                    write!(f, " + tangential")?;
                }
                write!(f, ")")
            }
            DistortionModel::Extended { tangential } => {
                write!(f, "extended (8 rational")?;
                if tangential {
                    write!(f, " + tangential")?;
                }
                write!(f, ")")
            }
            DistortionModel::Fisheye => write!(f, "fisheye (4)"),
        }
    }
}
