//! Core types and utilities for stereo calibration from video.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete video decoder, corner detector or image crate:
//! frames travel as [`GrayImage`] buffers, detections as ordered
//! [`nalgebra::Point2`] lists.

mod board;
mod camera;
mod distortion;
mod homography;
mod image;
mod logger;
mod observation;

pub use board::{BoardGeometry, BoardGeometryError};
pub use camera::{CameraParams, Intrinsics};
pub use distortion::{DistortionConfigError, DistortionModel, RadialTerms};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use image::{mean_abs_difference, variance_of_laplacian, GrayImage, GrayImageView};
pub use observation::{CameraSide, CornerObservation, CorpusSet, FramePair};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_logger, init_with_level, LogLevels};
