//! High-level facade for the `stereo-calib-*` workspace.
//!
//! This crate provides:
//! - re-exports of the core, selection and optimization crates
//! - (feature `image`) a chessboard [`CornerDetector`] built on `calib-targets`
//!   and ChESS corners, PNG image-sequence streams and the PNG frame backup
//! - (feature `ffmpeg`) video file streams decoded with FFmpeg
//! - the settings file ([`CalibrateVideoConfig`]) and the end-to-end run
//!   ([`CalibrateVideoApp`]) behind the `stereo-calib` binary
//!
//! ## Quickstart
//!
//! ```no_run
//! use stereo_calib::{CalibrateVideoApp, CalibrateVideoConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CalibrateVideoConfig {
//!     videos: vec!["left_frames".into(), "right_frames".into()],
//!     frame_count_target: 40,
//!     ..Default::default()
//! };
//! let result = CalibrateVideoApp::new(config)?.run()?;
//! println!("rms {:.3} px", result.reprojection_error);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `stereo_calib::core`: board geometry, frames, distortion models, observations.
//! - `stereo_calib::select`: frame sources, quality filter, manual gate, corner cache.
//! - `stereo_calib::optim`: calibration engine and stored results.
//!
//! [`CornerDetector`]: stereo_calib_select::CornerDetector

pub use stereo_calib_core as core;
pub use stereo_calib_optim as optim;
pub use stereo_calib_select as select;

pub use stereo_calib_core::{
    BoardGeometry, CameraSide, CorpusSet, CornerObservation, DistortionModel, GrayImage,
};
pub use stereo_calib_optim::{CalibrationEngine, CalibrationError, CalibrationResult};
pub use stereo_calib_select::{CornerDetector, FrameSelector, FrameSource, QualityParams};

pub mod config;
pub use config::{CalibrateVideoConfig, ConfigError};

#[cfg(feature = "image")]
pub mod app;
#[cfg(feature = "image")]
pub mod detect;
#[cfg(feature = "image")]
pub mod images;
#[cfg(feature = "ffmpeg")]
pub mod video;

#[cfg(feature = "image")]
pub use app::{AppError, CalibrateVideoApp};
#[cfg(feature = "image")]
pub use detect::{ChessboardCornerDetector, DetectError};
#[cfg(feature = "image")]
pub use images::{ImageSequenceReader, PairedFrameFiles, PngFrameSink};
#[cfg(feature = "ffmpeg")]
pub use video::{FfmpegVideoReader, VideoError};
