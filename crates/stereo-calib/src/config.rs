//! Run configuration and settings files.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stereo_calib_core::{
    BoardGeometry, BoardGeometryError, DistortionConfigError, DistortionModel,
};
use stereo_calib_select::QualityParams;

/// Result file name used when `output` is not set.
pub const DEFAULT_OUTPUT: &str = "stereo_calibration.json";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Board(#[from] BoardGeometryError),
    #[error(transparent)]
    Distortion(#[from] DistortionConfigError),
    #[error("{name} must be {expected} (got {value})")]
    InvalidThreshold {
        name: &'static str,
        expected: &'static str,
        value: f64,
    },
    #[error("expected a left and a right video, got {0} entries")]
    VideoCount(usize),
    #[error("{setting} is set but {path} does not exist")]
    MissingFile {
        setting: &'static str,
        path: PathBuf,
    },
}

/// Every setting of a calibration run.
///
/// Settings files are JSON objects holding any subset of these keys; absent
/// keys keep their defaults. Relative paths are resolved against `folder`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrateVideoConfig {
    pub folder: PathBuf,
    /// JSON file `{"frame_numbers": [..]}`; when set, exactly these frames
    /// are used and the quality thresholds are bypassed.
    pub frame_numbers: Option<PathBuf>,
    pub videos: Vec<PathBuf>,
    pub board_width: u32,
    pub board_height: u32,
    pub board_square_size: f64,
    pub sharpness_threshold: f64,
    pub difference_threshold: f64,
    pub manual_filter: bool,
    /// Stop after this many observations; `-1` (or any value `<= 0`) means
    /// no cap.
    pub frame_count_target: i64,
    pub corners_file: PathBuf,
    pub save_corners: bool,
    pub load_corners: bool,
    pub max_iterations: usize,
    pub precalibrate_solo: bool,
    pub use_8_distortion_coefficients: bool,
    pub use_tangential_distortion_coefficients: bool,
    pub use_fisheye_distortion_model: bool,
    /// 4 or 5; only used by the standard model.
    pub standard_radial_coefficients: u32,
    pub skip_printing_output: bool,
    pub skip_saving_output: bool,
    pub output: Option<PathBuf>,
    pub use_existing: bool,
    pub filtered_image_folder: PathBuf,
    pub save_images: bool,
    pub load_images: bool,
}

impl Default for CalibrateVideoConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("./"),
            frame_numbers: None,
            videos: vec![PathBuf::from("left.mp4"), PathBuf::from("right.mp4")],
            board_width: 9,
            board_height: 6,
            board_square_size: 1.98888,
            sharpness_threshold: 55.0,
            difference_threshold: 0.4,
            manual_filter: false,
            frame_count_target: -1,
            corners_file: PathBuf::from("corners.jsonl"),
            save_corners: false,
            load_corners: false,
            max_iterations: 30,
            precalibrate_solo: false,
            use_8_distortion_coefficients: false,
            use_tangential_distortion_coefficients: false,
            use_fisheye_distortion_model: false,
            standard_radial_coefficients: 5,
            skip_printing_output: false,
            skip_saving_output: false,
            output: None,
            use_existing: false,
            filtered_image_folder: PathBuf::from("frames"),
            save_images: false,
            load_images: false,
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let text = serde_json::to_string_pretty(value).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(io_err)
}

impl CalibrateVideoConfig {
    pub fn load_json(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(path, self)
    }

    /// `path` relative to `folder`; absolute paths are returned unchanged.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.folder.join(path)
    }

    pub fn board(&self) -> Result<BoardGeometry, ConfigError> {
        Ok(BoardGeometry::new(
            self.board_width,
            self.board_height,
            self.board_square_size,
        )?)
    }

    pub fn distortion_model(&self) -> Result<DistortionModel, ConfigError> {
        Ok(DistortionModel::from_flags(
            self.use_8_distortion_coefficients,
            self.use_tangential_distortion_coefficients,
            self.use_fisheye_distortion_model,
            self.standard_radial_coefficients,
        )?)
    }

    pub fn quality_params(&self) -> QualityParams {
        QualityParams {
            sharpness_threshold: self.sharpness_threshold,
            difference_threshold: self.difference_threshold,
        }
    }

    pub fn corners_path(&self) -> PathBuf {
        self.resolve(&self.corners_file)
    }

    pub fn output_path(&self) -> PathBuf {
        self.resolve(
            self.output
                .as_deref()
                .unwrap_or_else(|| Path::new(DEFAULT_OUTPUT)),
        )
    }

    pub fn filtered_image_path(&self) -> PathBuf {
        self.resolve(&self.filtered_image_folder)
    }

    pub fn frame_numbers_path(&self) -> Option<PathBuf> {
        self.frame_numbers.as_deref().map(|p| self.resolve(p))
    }

    pub fn video_paths(&self) -> Vec<PathBuf> {
        self.videos.iter().map(|p| self.resolve(p)).collect()
    }

    /// Check everything that can be checked before any frame is read.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.board()?;
        self.distortion_model()?;

        if !self.sharpness_threshold.is_finite() || self.sharpness_threshold < 0.0 {
            return Err(ConfigError::InvalidThreshold {
                name: "sharpness_threshold",
                expected: "finite and non-negative",
                value: self.sharpness_threshold,
            });
        }
        if !(0.0..=1.0).contains(&self.difference_threshold) {
            return Err(ConfigError::InvalidThreshold {
                name: "difference_threshold",
                expected: "in [0, 1]",
                value: self.difference_threshold,
            });
        }

        if self.load_corners {
            let path = self.corners_path();
            if !path.is_file() {
                return Err(ConfigError::MissingFile {
                    setting: "load_corners",
                    path,
                });
            }
        } else if self.load_images {
            let path = self.filtered_image_path();
            if !path.is_dir() {
                return Err(ConfigError::MissingFile {
                    setting: "load_images",
                    path,
                });
            }
        } else {
            if self.videos.len() != 2 {
                return Err(ConfigError::VideoCount(self.videos.len()));
            }
            if let Some(path) = self.frame_numbers_path() {
                if !path.is_file() {
                    return Err(ConfigError::MissingFile {
                        setting: "frame_numbers",
                        path,
                    });
                }
            }
        }

        if self.use_existing {
            let path = self.output_path();
            if !path.is_file() {
                return Err(ConfigError::MissingFile {
                    setting: "use_existing",
                    path,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FrameNumbersFile {
    frame_numbers: Vec<u64>,
}

/// Read a `{"frame_numbers": [..]}` file.
pub fn read_frame_numbers(path: &Path) -> Result<Vec<u64>, ConfigError> {
    read_json::<FrameNumbersFile>(path).map(|f| f.frame_numbers)
}

pub fn write_frame_numbers(path: &Path, frame_numbers: &[u64]) -> Result<(), ConfigError> {
    write_json(
        path,
        &FrameNumbersFile {
            frame_numbers: frame_numbers.to_vec(),
        },
    )
}
