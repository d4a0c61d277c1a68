//! Sharpness / novelty filtering of frame pairs.

use serde::{Deserialize, Serialize};
use stereo_calib_core::{mean_abs_difference, variance_of_laplacian, FramePair, GrayImage};

/// Thresholds applied by [`QualityFilter`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityParams {
    /// Minimum variance of Laplacian of the left image.
    pub sharpness_threshold: f64,
    /// Minimum mean normalized difference (`[0, 1]`) from the last accepted
    /// left image.
    pub difference_threshold: f64,
}

impl Default for QualityParams {
    fn default() -> Self {
        Self {
            sharpness_threshold: 55.0,
            difference_threshold: 0.4,
        }
    }
}

impl QualityParams {
    /// Zero thresholds: every pair passes. Used when the frame list itself
    /// is the selection.
    pub fn accept_all() -> Self {
        Self {
            sharpness_threshold: 0.0,
            difference_threshold: 0.0,
        }
    }
}

/// Metrics computed for one pair.
///
/// `difference_from_last_accepted` is `None` for the first candidate and for
/// pairs rejected as blurry, which are never compared.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityScore {
    pub sharpness: f64,
    pub difference_from_last_accepted: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum QualityVerdict {
    Accept(QualityScore),
    RejectBlurry(QualityScore),
    RejectSimilar(QualityScore),
}

impl QualityVerdict {
    pub fn score(&self) -> &QualityScore {
        match self {
            QualityVerdict::Accept(s)
            | QualityVerdict::RejectBlurry(s)
            | QualityVerdict::RejectSimilar(s) => s,
        }
    }

    #[inline]
    pub fn is_accept(&self) -> bool {
        matches!(self, QualityVerdict::Accept(_))
    }
}

/// Stateful filter: remembers the left image of the last accepted pair.
///
/// Create one per selection run; rejected pairs never touch the state.
#[derive(Clone, Debug, Default)]
pub struct QualityFilter {
    params: QualityParams,
    last_accepted: Option<GrayImage>,
}

impl QualityFilter {
    pub fn new(params: QualityParams) -> Self {
        Self {
            params,
            last_accepted: None,
        }
    }

    pub fn params(&self) -> &QualityParams {
        &self.params
    }

    pub fn last_accepted(&self) -> Option<&GrayImage> {
        self.last_accepted.as_ref()
    }

    /// Score `pair` and decide.
    ///
    /// Blur is checked first; only sharp pairs are compared against the last
    /// accepted image. On `Accept` the pair's left image becomes the new
    /// reference.
    pub fn evaluate(&mut self, pair: &FramePair) -> QualityVerdict {
        let sharpness = variance_of_laplacian(&pair.left.view());
        if sharpness < self.params.sharpness_threshold {
            return QualityVerdict::RejectBlurry(QualityScore {
                sharpness,
                difference_from_last_accepted: None,
            });
        }

        let difference = self
            .last_accepted
            .as_ref()
            .map(|prev| mean_abs_difference(&pair.left.view(), &prev.view()));
        let score = QualityScore {
            sharpness,
            difference_from_last_accepted: difference,
        };
        if difference.is_some_and(|d| d < self.params.difference_threshold) {
            return QualityVerdict::RejectSimilar(score);
        }

        self.last_accepted = Some(pair.left.clone());
        QualityVerdict::Accept(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripes(phase: usize) -> GrayImage {
        let (w, h) = (32, 16);
        let data = (0..w * h)
            .map(|i| if (i % w + phase) / 4 % 2 == 0 { 0 } else { 255 })
            .collect();
        GrayImage::from_raw(w, h, data).expect("stripes")
    }

    fn pair(index: u64, left: GrayImage) -> FramePair {
        FramePair {
            index,
            right: left.clone(),
            left,
        }
    }

    fn filter() -> QualityFilter {
        QualityFilter::new(QualityParams {
            sharpness_threshold: 100.0,
            difference_threshold: 0.3,
        })
    }

    #[test]
    fn accept_all_passes_flat_and_repeated_frames() {
        let mut f = QualityFilter::new(QualityParams::accept_all());
        let flat = GrayImage::filled(32, 16, 90);
        assert!(f.evaluate(&pair(0, flat.clone())).is_accept());
        assert!(f.evaluate(&pair(1, flat)).is_accept());
    }

    #[test]
    fn first_sharp_frame_is_accepted_without_comparison() {
        let mut f = filter();
        let verdict = f.evaluate(&pair(0, stripes(0)));
        assert!(verdict.is_accept());
        assert_eq!(verdict.score().difference_from_last_accepted, None);
        assert!(f.last_accepted().is_some());
    }

    #[test]
    fn blurry_frame_is_rejected_before_similarity() {
        let mut f = filter();
        let verdict = f.evaluate(&pair(0, GrayImage::filled(32, 16, 90)));
        assert!(matches!(
            verdict,
            QualityVerdict::RejectBlurry(QualityScore {
                difference_from_last_accepted: None,
                ..
            })
        ));
        assert!(f.last_accepted().is_none());
    }

    #[test]
    fn near_duplicates_are_rejected_and_do_not_move_the_reference() {
        let mut f = filter();
        assert!(f.evaluate(&pair(0, stripes(0))).is_accept());
        assert!(matches!(
            f.evaluate(&pair(1, stripes(0))),
            QualityVerdict::RejectSimilar(_)
        ));
        assert_eq!(f.last_accepted(), Some(&stripes(0)));

        // Shifting the stripes by half a period inverts every pixel.
        let verdict = f.evaluate(&pair(2, stripes(4)));
        assert!(verdict.is_accept());
        assert_eq!(verdict.score().difference_from_last_accepted, Some(1.0));
        assert_eq!(f.last_accepted(), Some(&stripes(4)));
    }
}
