//! stereo-calib CLI: select calibration frames from a stereo recording and
//! calibrate the rig.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use log::{error, LevelFilter};
use stereo_calib::{CalibrateVideoApp, CalibrateVideoConfig};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

/// Every option overrides the matching key of `--settings_file`.
#[derive(Debug, Parser)]
#[command(name = "stereo-calib")]
#[command(about = "Pick sharp, distinct chessboard frame pairs from stereo footage and calibrate the rig")]
#[command(version)]
struct Cli {
    /// JSON settings file; explicit options take precedence over its values.
    #[arg(long = "settings_file", visible_alias = "sf")]
    settings_file: Option<PathBuf>,

    /// Write the effective settings to this JSON file.
    #[arg(long = "write_settings")]
    write_settings: Option<PathBuf>,

    /// Write the frame numbers of the paired images in the filtered image
    /// folder to this JSON file and exit.
    #[arg(long = "write_frame_numbers")]
    write_frame_numbers: Option<PathBuf>,

    /// Base folder; every relative path is resolved against it.
    #[arg(short = 'f', long)]
    folder: Option<PathBuf>,

    /// JSON file `{"frame_numbers": [..]}` listing the frames to use.
    #[arg(long = "frame_numbers", visible_alias = "fn")]
    frame_numbers: Option<PathBuf>,

    /// Left and right inputs: video files or directories of PNG frames.
    #[arg(long, num_args = 2, value_names = ["LEFT", "RIGHT"])]
    videos: Option<Vec<PathBuf>>,

    /// Inner corners along the board width.
    #[arg(long = "board_width", visible_alias = "bw")]
    board_width: Option<u32>,

    /// Inner corners along the board height.
    #[arg(long = "board_height", visible_alias = "bh")]
    board_height: Option<u32>,

    /// Side length of one board square.
    #[arg(long = "board_square_size", visible_alias = "bs")]
    board_square_size: Option<f64>,

    /// Minimum variance of the Laplacian for a frame to count as sharp.
    #[arg(long = "sharpness_threshold", visible_alias = "ft")]
    sharpness_threshold: Option<f64>,

    /// Minimum mean absolute difference from the last accepted frame, in [0, 1].
    #[arg(long = "difference_threshold", visible_alias = "fd")]
    difference_threshold: Option<f64>,

    /// Ask on the terminal before using each frame pair.
    #[arg(short = 'm', long = "manual_filter")]
    manual_filter: bool,

    /// Stop after this many observations (-1 for no limit).
    #[arg(long = "frame_count_target", visible_alias = "fc", allow_negative_numbers = true)]
    frame_count_target: Option<i64>,

    /// Corners file (JSON Lines).
    #[arg(short = 'c', long = "corners_file")]
    corners_file: Option<PathBuf>,

    /// Append every detected observation to the corners file.
    #[arg(short = 's', long = "save_corners")]
    save_corners: bool,

    /// Calibrate from the corners file instead of reading frames.
    #[arg(short = 'l', long = "load_corners")]
    load_corners: bool,

    /// Iteration cap of the stereo solve.
    #[arg(short = 'i', long = "max_iterations")]
    max_iterations: Option<usize>,

    /// Calibrate each camera on its own before the stereo solve.
    #[arg(long = "precalibrate_solo", visible_alias = "ps")]
    precalibrate_solo: bool,

    /// Use the 8-coefficient rational distortion model.
    #[arg(long = "use_8_distortion_coefficients", visible_alias = "d8")]
    use_8_distortion_coefficients: bool,

    /// Add the tangential pair to the distortion model.
    #[arg(long = "use_tangential_distortion_coefficients", visible_alias = "dt")]
    use_tangential_distortion_coefficients: bool,

    /// Use the fisheye (equidistant) distortion model.
    #[arg(long = "use_fisheye_distortion_model", visible_alias = "df")]
    use_fisheye_distortion_model: bool,

    /// Radial terms of the standard model (4 or 5).
    #[arg(long = "standard_radial_coefficients", visible_alias = "ds")]
    standard_radial_coefficients: Option<u32>,

    /// Do not print the calibration summary.
    #[arg(long = "skip_printing_output", visible_alias = "skp")]
    skip_printing_output: bool,

    /// Do not write the calibration result.
    #[arg(long = "skip_saving_output", visible_alias = "sks")]
    skip_saving_output: bool,

    /// Calibration result file (default stereo_calibration.json).
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Seed the solve with the result already stored at the output path.
    #[arg(short = 'u', long = "use_existing")]
    use_existing: bool,

    /// Folder of the backed-up frame pairs.
    #[arg(long = "filtered_image_folder", visible_alias = "if")]
    filtered_image_folder: Option<PathBuf>,

    /// Back up every pair that yields an observation as PNG files.
    #[arg(long = "save_images", visible_alias = "is")]
    save_images: bool,

    /// Read frames from the filtered image folder instead of the videos.
    #[arg(long = "load_images", visible_alias = "il")]
    load_images: bool,

    /// More log output (repeatable).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Less log output (repeatable).
    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    quiet: u8,

    /// Log through `tracing` as JSON lines.
    #[cfg(feature = "tracing")]
    #[arg(long = "log_json")]
    log_json: bool,
}

impl Cli {
    fn level(&self) -> LevelFilter {
        match i16::from(self.verbose) - i16::from(self.quiet) {
            i16::MIN..=-3 => LevelFilter::Off,
            -2 => LevelFilter::Error,
            -1 => LevelFilter::Warn,
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Settings file (or defaults) with the explicit options applied.
    fn config(&self) -> CliResult<CalibrateVideoConfig> {
        let mut c = match &self.settings_file {
            Some(path) => CalibrateVideoConfig::load_json(path)?,
            None => CalibrateVideoConfig::default(),
        };

        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
        set(&mut c.folder, &self.folder);
        set(&mut c.videos, &self.videos);
        set(&mut c.board_width, &self.board_width);
        set(&mut c.board_height, &self.board_height);
        set(&mut c.board_square_size, &self.board_square_size);
        set(&mut c.sharpness_threshold, &self.sharpness_threshold);
        set(&mut c.difference_threshold, &self.difference_threshold);
        set(&mut c.frame_count_target, &self.frame_count_target);
        set(&mut c.corners_file, &self.corners_file);
        set(&mut c.max_iterations, &self.max_iterations);
        set(
            &mut c.standard_radial_coefficients,
            &self.standard_radial_coefficients,
        );
        set(&mut c.filtered_image_folder, &self.filtered_image_folder);
        if self.frame_numbers.is_some() {
            c.frame_numbers = self.frame_numbers.clone();
        }
        if self.output.is_some() {
            c.output = self.output.clone();
        }

        c.manual_filter |= self.manual_filter;
        c.save_corners |= self.save_corners;
        c.load_corners |= self.load_corners;
        c.precalibrate_solo |= self.precalibrate_solo;
        c.use_8_distortion_coefficients |= self.use_8_distortion_coefficients;
        c.use_tangential_distortion_coefficients |= self.use_tangential_distortion_coefficients;
        c.use_fisheye_distortion_model |= self.use_fisheye_distortion_model;
        c.skip_printing_output |= self.skip_printing_output;
        c.skip_saving_output |= self.skip_saving_output;
        c.use_existing |= self.use_existing;
        c.save_images |= self.save_images;
        c.load_images |= self.load_images;
        Ok(c)
    }
}

fn init_logging(cli: &Cli) {
    #[cfg(feature = "tracing")]
    {
        if cli.log_json {
            stereo_calib::core::init_tracing(
                stereo_calib::core::LogLevels::from_pipeline(cli.level()),
                true,
            );
            return;
        }
    }
    // A logger installed earlier in the process is fine to keep.
    let _ = stereo_calib::core::init_with_level(cli.level());
}

fn run(cli: &Cli) -> CliResult<()> {
    let config = cli.config()?;
    if let Some(path) = &cli.write_settings {
        config.write_json(path)?;
        log::info!("wrote settings to {}", path.display());
    }

    let app = CalibrateVideoApp::new(config)?;
    if let Some(path) = &cli.write_frame_numbers {
        app.write_paired_frame_numbers(path)?;
        return Ok(());
    }
    app.run()?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            let mut source = e.source();
            while let Some(cause) = source {
                error!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
