//! Frame pairs and the corner observations accumulated from them.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

use crate::{BoardGeometry, GrayImage};

/// Which camera of the rig an image or detection belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraSide {
    Left,
    Right,
}

impl std::fmt::Display for CameraSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraSide::Left => f.write_str("left"),
            CameraSide::Right => f.write_str("right"),
        }
    }
}

/// Synchronized left/right frames sharing one frame index.
#[derive(Clone, Debug)]
pub struct FramePair {
    pub index: u64,
    pub left: GrayImage,
    pub right: GrayImage,
}

impl FramePair {
    pub fn image(&self, side: CameraSide) -> &GrayImage {
        match side {
            CameraSide::Left => &self.left,
            CameraSide::Right => &self.right,
        }
    }
}

/// Board corners found in both images of one frame pair.
///
/// Corners are stored in [`BoardGeometry::board_points`] order, so index `k`
/// of `left`, `right` and the board points refer to the same physical corner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CornerObservation {
    pub frame_index: u64,
    pub left: Vec<Point2<f64>>,
    pub right: Vec<Point2<f64>>,
}

impl CornerObservation {
    /// Returns `None` unless both sides carry exactly `corner_count` corners.
    pub fn new(
        frame_index: u64,
        left: Vec<Point2<f64>>,
        right: Vec<Point2<f64>>,
        corner_count: usize,
    ) -> Option<Self> {
        if left.len() != corner_count || right.len() != corner_count {
            return None;
        }
        Some(Self {
            frame_index,
            left,
            right,
        })
    }

    pub fn corners(&self, side: CameraSide) -> &[Point2<f64>] {
        match side {
            CameraSide::Left => &self.left,
            CameraSide::Right => &self.right,
        }
    }

    pub fn matches_geometry(&self, geometry: &BoardGeometry) -> bool {
        let n = geometry.corner_count();
        self.left.len() == n && self.right.len() == n
    }
}

/// Ordered set of observations, unique by frame index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorpusSet {
    pub geometry: BoardGeometry,
    /// Frame size `[width, height]` in pixels, when known.
    pub image_size: Option<[u32; 2]>,
    observations: Vec<CornerObservation>,
}

impl CorpusSet {
    pub fn new(geometry: BoardGeometry) -> Self {
        Self {
            geometry,
            image_size: None,
            observations: Vec::new(),
        }
    }

    pub fn with_image_size(mut self, image_size: Option<[u32; 2]>) -> Self {
        self.image_size = image_size;
        self
    }

    /// Append an observation.
    ///
    /// Returns `false` (and leaves the set untouched) for a duplicate frame
    /// index or an observation whose corner count does not fit the board.
    pub fn insert(&mut self, observation: CornerObservation) -> bool {
        if !observation.matches_geometry(&self.geometry) || self.contains(observation.frame_index)
        {
            return false;
        }
        self.observations.push(observation);
        true
    }

    pub fn contains(&self, frame_index: u64) -> bool {
        self.observations
            .iter()
            .any(|o| o.frame_index == frame_index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[CornerObservation] {
        &self.observations
    }

    pub fn frame_indices(&self) -> Vec<u64> {
        self.observations.iter().map(|o| o.frame_index).collect()
    }

    /// Board points shared by every observation.
    pub fn board_points(&self) -> Vec<Point3<f64>> {
        self.geometry.board_points()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(index: u64, n: usize) -> CornerObservation {
        let pts: Vec<_> = (0..n).map(|k| Point2::new(k as f64, index as f64)).collect();
        CornerObservation::new(index, pts.clone(), pts, n).expect("shape")
    }

    #[test]
    fn observation_requires_full_boards_on_both_sides() {
        let pts = vec![Point2::new(0.0, 0.0); 4];
        assert!(CornerObservation::new(0, pts.clone(), pts[..3].to_vec(), 4).is_none());
        assert!(CornerObservation::new(0, pts.clone(), pts, 4).is_some());
    }

    #[test]
    fn corpus_is_unique_by_frame_index_and_ordered() {
        let geometry = BoardGeometry::new(2, 2, 1.0).expect("board");
        let mut corpus = CorpusSet::new(geometry);
        assert!(corpus.insert(obs(7, 4)));
        assert!(corpus.insert(obs(3, 4)));
        assert!(!corpus.insert(obs(7, 4)));
        assert!(!corpus.insert(obs(9, 6)));
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.frame_indices(), vec![7, 3]);
        assert_eq!(corpus.board_points().len(), 4);
    }
}
