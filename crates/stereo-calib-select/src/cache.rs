//! Corner detection on accepted pairs, with optional incremental persistence.

use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info};
use nalgebra::Point2;
use stereo_calib_core::{BoardGeometry, CornerObservation, FramePair, GrayImage};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{CorpusIoError, CorpusJournal};

/// Checkerboard corner detector.
///
/// Implementations must return exactly `geometry.corner_count()` points in
/// [`BoardGeometry::board_points`] order, or `None`. The left and right
/// images of a pair are processed concurrently, hence `Sync`.
pub trait CornerDetector: Sync {
    fn find_board_corners(
        &self,
        image: &GrayImage,
        geometry: &BoardGeometry,
    ) -> Option<Vec<Point2<f64>>>;
}

impl<D: CornerDetector + Send + ?Sized> CornerDetector for Arc<D> {
    fn find_board_corners(
        &self,
        image: &GrayImage,
        geometry: &BoardGeometry,
    ) -> Option<Vec<Point2<f64>>> {
        (**self).find_board_corners(image, geometry)
    }
}

/// Runs the detector on both images of a pair and journals the observations
/// that make it into the corpus.
pub struct CornerCache {
    detector: Box<dyn CornerDetector>,
    geometry: BoardGeometry,
    journal_path: Option<PathBuf>,
    journal: Option<CorpusJournal>,
}

impl CornerCache {
    pub fn new(detector: Box<dyn CornerDetector>, geometry: BoardGeometry) -> Self {
        Self {
            detector,
            geometry,
            journal_path: None,
            journal: None,
        }
    }

    /// Append every recorded observation to `path`.
    ///
    /// The file is opened when the first observation arrives, so a new
    /// header can carry the frame size. An existing file for the same board
    /// is extended, never truncated.
    pub fn with_journal(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal_path = Some(path.into());
        self
    }

    pub fn geometry(&self) -> &BoardGeometry {
        &self.geometry
    }

    /// Observations persisted so far.
    pub fn journaled(&self) -> usize {
        self.journal.as_ref().map_or(0, CorpusJournal::records)
    }

    /// Detect the board in both images.
    ///
    /// `None` when either side misses the board; partial detections are
    /// dropped.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, pair), fields(frame = pair.index))
    )]
    pub fn observe(&self, pair: &FramePair) -> Option<CornerObservation> {
        let detector = self.detector.as_ref();
        let geometry = &self.geometry;
        let (left, right) = rayon::join(
            || detector.find_board_corners(&pair.left, geometry),
            || detector.find_board_corners(&pair.right, geometry),
        );

        match (left, right) {
            (Some(left), Some(right)) => {
                CornerObservation::new(pair.index, left, right, geometry.corner_count())
            }
            (left, right) => {
                debug!(
                    "frame {}: board found left={} right={}",
                    pair.index,
                    left.is_some(),
                    right.is_some()
                );
                None
            }
        }
    }

    /// Persist an accepted observation; a no-op without a journal.
    pub fn record(
        &mut self,
        observation: &CornerObservation,
        image_size: [u32; 2],
    ) -> Result<(), CorpusIoError> {
        let Some(path) = &self.journal_path else {
            return Ok(());
        };
        if self.journal.is_none() {
            info!("writing corners to {}", path.display());
            self.journal = Some(CorpusJournal::open_or_create(
                path.clone(),
                self.geometry,
                Some(image_size),
            )?);
        }
        match self.journal.as_mut() {
            Some(journal) => journal.append(observation),
            None => Ok(()),
        }
    }
}
