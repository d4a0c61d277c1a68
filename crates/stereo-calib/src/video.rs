//! Video file streams decoded with FFmpeg (`ffmpeg` feature).

use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;
use log::{debug, info};
use stereo_calib_core::GrayImage;
use stereo_calib_select::{FrameReader, ReadError};

#[derive(thiserror::Error, Debug)]
pub enum VideoError {
    #[error("failed to open video {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: ffmpeg::Error,
    },
    #[error("{0} contains no video stream")]
    NoVideoStream(PathBuf),
    #[error(transparent)]
    Ffmpeg(#[from] ffmpeg::Error),
}

/// Decoder state for one pass over the file.
struct Pass {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    /// Index of the next frame [`Pass::decode_next`] returns.
    next: u64,
    flushed: bool,
}

impl Pass {
    fn open(path: &Path) -> Result<Self, VideoError> {
        let input = ffmpeg::format::input(&path).map_err(|source| VideoError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| VideoError::NoVideoStream(path.to_path_buf()))?;
        let stream_index = stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().video()?;
        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::GRAY8,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )?;
        Ok(Self {
            input,
            decoder,
            scaler,
            stream_index,
            next: 0,
            flushed: false,
        })
    }

    fn decode_next(&mut self) -> Result<Option<GrayImage>, VideoError> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    self.next += 1;
                    return self.to_gray(&decoded).map(Some);
                }
                Err(ffmpeg::Error::Other {
                    errno: ffmpeg::error::EAGAIN,
                }) => {}
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
            if self.flushed {
                return Ok(None);
            }
            loop {
                match self.input.packets().next() {
                    Some((stream, packet)) => {
                        if stream.index() == self.stream_index {
                            self.decoder.send_packet(&packet)?;
                            break;
                        }
                    }
                    None => {
                        self.decoder.send_eof()?;
                        self.flushed = true;
                        break;
                    }
                }
            }
        }
    }

    fn to_gray(&mut self, frame: &ffmpeg::frame::Video) -> Result<GrayImage, VideoError> {
        if frame.format() != self.scaler.input().format {
            self.scaler = ffmpeg::software::scaling::Context::get(
                frame.format(),
                frame.width(),
                frame.height(),
                ffmpeg::format::Pixel::GRAY8,
                frame.width(),
                frame.height(),
                ffmpeg::software::scaling::Flags::BILINEAR,
            )?;
        }
        let mut gray = ffmpeg::frame::Video::empty();
        self.scaler.run(frame, &mut gray)?;

        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let stride = gray.stride(0);
        let data = gray.data(0);
        let mut pixels = Vec::with_capacity(w * h);
        for row in 0..h {
            pixels.extend_from_slice(&data[row * stride..row * stride + w]);
        }
        Ok(GrayImage {
            width: w,
            height: h,
            data: pixels,
        })
    }
}

/// Grayscale frames of a video file, addressed by decode order.
///
/// Decoding is forward-only; asking for an earlier frame restarts the file.
pub struct FfmpegVideoReader {
    path: PathBuf,
    frame_count: u64,
    pass: Pass,
}

impl FfmpegVideoReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, VideoError> {
        ffmpeg::init()?;
        let path = path.into();
        let pass = Pass::open(&path)?;
        let frame_count = {
            let stream = pass
                .input
                .stream(pass.stream_index)
                .ok_or_else(|| VideoError::NoVideoStream(path.clone()))?;
            let frames = stream.frames();
            if frames > 0 {
                frames as u64
            } else {
                let rate = stream.avg_frame_rate();
                let tb = stream.time_base();
                let fps = if rate.denominator() > 0 {
                    rate.numerator() as f64 / rate.denominator() as f64
                } else {
                    0.0
                };
                let seconds = stream.duration() as f64 * tb.numerator() as f64
                    / tb.denominator().max(1) as f64;
                (seconds * fps).round().max(0.0) as u64
            }
        };
        info!(
            "opened {}: {}x{}, {frame_count} frames",
            path.display(),
            pass.decoder.width(),
            pass.decoder.height()
        );
        Ok(Self {
            path,
            frame_count,
            pass,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameReader for FfmpegVideoReader {
    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn read_frame(&mut self, index: u64) -> Result<Option<GrayImage>, ReadError> {
        if index >= self.frame_count {
            return Ok(None);
        }
        if index < self.pass.next {
            debug!("{}: rewinding to frame {index}", self.path.display());
            self.pass = Pass::open(&self.path)?;
        }
        while self.pass.next < index {
            if self.pass.decode_next()?.is_none() {
                return Ok(None);
            }
        }
        Ok(self.pass.decode_next()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_fails_to_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.mp4");
        match FfmpegVideoReader::open(&path) {
            Err(VideoError::Open { path: p, .. }) => assert_eq!(p, path),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("opened a missing file"),
        }
    }

    #[test]
    fn text_file_is_not_a_video() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.mp4");
        std::fs::write(&path, "not a video").expect("write");
        assert!(FfmpegVideoReader::open(&path).is_err());
    }

    /// Point `STEREO_CALIB_TEST_VIDEO` at any short video file.
    #[test]
    #[ignore = "needs STEREO_CALIB_TEST_VIDEO"]
    fn frames_decode_forward_and_after_a_rewind() {
        let path = std::env::var_os("STEREO_CALIB_TEST_VIDEO").expect("STEREO_CALIB_TEST_VIDEO");
        let mut reader = FfmpegVideoReader::open(PathBuf::from(path)).expect("open");
        assert!(reader.frame_count() >= 2);

        let first = reader.read_frame(0).expect("decode").expect("frame 0");
        let second = reader.read_frame(1).expect("decode").expect("frame 1");
        assert_eq!((first.width, first.height), (second.width, second.height));
        assert_eq!(first.data.len(), first.width * first.height);

        let again = reader.read_frame(0).expect("rewind").expect("frame 0");
        assert_eq!(again, first);
        assert!(reader
            .read_frame(reader.frame_count())
            .expect("past the end")
            .is_none());
    }
}
