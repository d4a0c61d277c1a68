//! End-to-end calibration run: gather corner observations, then calibrate.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use stereo_calib_core::{BoardGeometry, CorpusSet, DistortionModel};
use stereo_calib_optim::{
    CalibrationEngine, CalibrationError, CalibrationResult, Precalibration, ResultStoreError,
    SkipPrecalibration, SoloPrecalibration,
};
use stereo_calib_select::{
    CornerCache, CornerDetector, CorpusIoError, CorpusJournal, FrameReader, FrameSelector,
    FrameSource, PipelineError, PromptGate, QualityParams,
};

use crate::config::{read_frame_numbers, write_frame_numbers, CalibrateVideoConfig, ConfigError};
use crate::detect::ChessboardCornerDetector;
use crate::images::{ImageSequenceReader, PairedFrameFiles, PngFrameSink};
#[cfg(feature = "ffmpeg")]
use crate::video::{FfmpegVideoReader, VideoError};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Corpus(#[from] CorpusIoError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Result(#[from] ResultStoreError),
    #[cfg(feature = "ffmpeg")]
    #[error(transparent)]
    Video(#[from] VideoError),
    #[error("{0} is not a directory; reading video files needs the `ffmpeg` feature")]
    VideoUnsupported(PathBuf),
    #[error("no l_NNNN.png / r_NNNN.png pairs in {0}")]
    NoImagePairs(PathBuf),
}

/// Open one camera stream: a directory is a PNG sequence, anything else a
/// video file.
fn open_stream(path: &Path) -> Result<Box<dyn FrameReader>, AppError> {
    if path.is_dir() {
        let reader = ImageSequenceReader::from_dir(path).map_err(|source| AppError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        return Ok(Box::new(reader));
    }
    #[cfg(feature = "ffmpeg")]
    {
        Ok(Box::new(FfmpegVideoReader::open(path)?))
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        Err(AppError::VideoUnsupported(path.to_path_buf()))
    }
}

/// Human readable rendering of a calibration result.
pub fn format_summary(result: &CalibrationResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "distortion model: {}", result.distortion_model);
    for (name, camera) in [("left", &result.left), ("right", &result.right)] {
        let k = &camera.intrinsics;
        let _ = writeln!(
            out,
            "{name}: fx={:.3} fy={:.3} cx={:.3} cy={:.3}",
            k.fx, k.fy, k.cx, k.cy
        );
        let _ = writeln!(out, "{name} distortion: {:?}", camera.distortion);
    }
    let _ = write!(out, "rotation:{}", result.rotation);
    let _ = write!(out, "translation:{}", result.translation);
    if let Some(f) = &result.fundamental {
        let _ = write!(out, "fundamental:{f}");
    }
    let _ = writeln!(out, "baseline: {:.6}", result.baseline());
    let _ = writeln!(
        out,
        "reprojection error: {:.4} px after {} iterations",
        result.reprojection_error, result.iteration_count
    );
    out
}

/// A configured calibration run.
pub struct CalibrateVideoApp {
    config: CalibrateVideoConfig,
    board: BoardGeometry,
    model: DistortionModel,
    detector: Arc<dyn CornerDetector + Send>,
    engine: CalibrationEngine,
}

impl CalibrateVideoApp {
    /// Validate `config` and set up the default chessboard detector.
    pub fn new(config: CalibrateVideoConfig) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            board: config.board()?,
            model: config.distortion_model()?,
            config,
            detector: Arc::new(ChessboardCornerDetector::default()),
            engine: CalibrationEngine::default(),
        })
    }

    pub fn with_detector(mut self, detector: Arc<dyn CornerDetector + Send>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_engine(mut self, engine: CalibrationEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn config(&self) -> &CalibrateVideoConfig {
        &self.config
    }

    pub fn run(&self) -> Result<CalibrationResult, AppError> {
        let corpus = self.gather_frame_data()?;
        self.run_calibration(&corpus)
    }

    /// Build the corner corpus, either from the corners file or by walking
    /// the input streams.
    pub fn gather_frame_data(&self) -> Result<CorpusSet, AppError> {
        let c = &self.config;
        if c.load_corners {
            return Ok(CorpusJournal::load_for(&c.corners_path(), &self.board)?);
        }

        let (mut source, indexed) = self.frame_source()?;
        let (left_len, right_len) = source.stream_lengths();
        info!("streams: {left_len} left frames, {right_len} right frames");

        // An explicit frame list is the selection; quality thresholds would
        // only second-guess it.
        let params = if indexed {
            QualityParams::accept_all()
        } else {
            c.quality_params()
        };

        let mut cache = CornerCache::new(Box::new(Arc::clone(&self.detector)), self.board);
        if c.save_corners {
            cache = cache.with_journal(c.corners_path());
        }
        let mut selector =
            FrameSelector::with_cache(params, cache).with_frame_count_target(c.frame_count_target);
        if c.manual_filter {
            selector = selector.with_gate(Box::new(PromptGate::stdio()));
        }
        if c.save_images && !c.load_images {
            selector = selector.with_sink(Box::new(PngFrameSink::new(c.filtered_image_path())));
        }

        let selection = selector.run(&mut source)?;
        Ok(selection.corpus)
    }

    /// The pair source for the configured inputs and whether it is
    /// index-driven.
    fn frame_source(&self) -> Result<(FrameSource, bool), AppError> {
        let c = &self.config;
        let requested = match c.frame_numbers_path() {
            Some(path) => Some(read_frame_numbers(&path)?),
            None => None,
        };

        if c.load_images {
            let dir = c.filtered_image_path();
            let files = PairedFrameFiles::discover(&dir).map_err(|source| AppError::Io {
                path: dir.clone(),
                source,
            })?;
            if files.is_empty() {
                return Err(AppError::NoImagePairs(dir));
            }
            let mut indices = files.frame_numbers();
            if let Some(requested) = requested {
                let before = indices.len();
                indices.retain(|k| requested.contains(k));
                if indices.len() < before {
                    info!("frame list keeps {} of {before} stored pairs", indices.len());
                }
            }
            let (left, right) = files.into_readers();
            return Ok((
                FrameSource::indexed(Box::new(left), Box::new(right), indices),
                true,
            ));
        }

        let videos = c.video_paths();
        let [left, right] = videos.as_slice() else {
            return Err(ConfigError::VideoCount(videos.len()).into());
        };
        let (left, right) = (open_stream(left)?, open_stream(right)?);
        Ok(match requested {
            Some(indices) => {
                info!("reading {} listed frames", indices.len());
                (FrameSource::indexed(left, right, indices), true)
            }
            None => (FrameSource::sequential(left, right), false),
        })
    }

    /// Write the frame numbers shared by the stored left/right images.
    /// A relative `path` is taken from the base folder.
    pub fn write_paired_frame_numbers(&self, path: &Path) -> Result<Vec<u64>, AppError> {
        let path = &self.config.resolve(path);
        let dir = self.config.filtered_image_path();
        let files = PairedFrameFiles::discover(&dir).map_err(|source| AppError::Io {
            path: dir.clone(),
            source,
        })?;
        let numbers = files.frame_numbers();
        write_frame_numbers(path, &numbers)?;
        info!("wrote {} frame numbers to {}", numbers.len(), path.display());
        Ok(numbers)
    }

    /// Calibrate from `corpus`, then save and print according to the
    /// output settings.
    pub fn run_calibration(&self, corpus: &CorpusSet) -> Result<CalibrationResult, AppError> {
        let c = &self.config;
        let output = c.output_path();
        let seed = if c.use_existing {
            let seed = CalibrationResult::load_seed(&output, &self.model)?;
            info!("seeding from {}", output.display());
            Some(seed)
        } else {
            None
        };

        let precalibration: Box<dyn Precalibration> = if c.precalibrate_solo {
            Box::new(SoloPrecalibration::default())
        } else {
            Box::new(SkipPrecalibration)
        };

        let result = self.engine.calibrate(
            corpus,
            &corpus.geometry,
            &self.model,
            c.max_iterations,
            precalibration.as_ref(),
            seed.as_ref(),
        )?;
        info!(
            "calibrated on {} pairs: rms {:.4} px, baseline {:.4}",
            corpus.len(),
            result.reprojection_error,
            result.baseline()
        );
        if result.reprojection_error > 1.0 {
            warn!(
                "reprojection error {:.3} px is high; check the corner corpus",
                result.reprojection_error
            );
        }

        if !c.skip_saving_output {
            result.write_json(&output)?;
        }
        if !c.skip_printing_output {
            print!("{}", format_summary(&result));
        }
        Ok(result)
    }
}
