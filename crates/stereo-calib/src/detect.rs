//! Checkerboard corner detection backed by `calib-targets` and ChESS corners.

use calib_targets::detect::{default_chess_config, detect_chessboard};
use calib_targets::{ChessboardParams, LabeledCorner};
use chess_corners::ChessConfig;
use nalgebra::Point2;
use stereo_calib_core::{BoardGeometry, GrayImage};
use stereo_calib_select::CornerDetector;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DetectError {
    #[error("invalid grayscale image buffer length (expected {expected} bytes, got {got})")]
    InvalidGrayBuffer { expected: usize, got: usize },
    #[error("detected {found} labelled corners, board has {expected}")]
    CornerCount { found: usize, expected: usize },
    #[error("detected grid spans {cols}x{rows}, board is {width}x{height}")]
    GridShape {
        cols: u32,
        rows: u32,
        width: u32,
        height: u32,
    },
    #[error("grid cell ({i}, {j}) is labelled twice")]
    DuplicateCell { i: i32, j: i32 },
}

/// Convert a core frame into the `image` crate buffer the detector expects.
pub fn to_luma(image: &GrayImage) -> Result<::image::GrayImage, DetectError> {
    ::image::GrayImage::from_raw(image.width as u32, image.height as u32, image.data.clone())
        .ok_or(DetectError::InvalidGrayBuffer {
            expected: image.width * image.height,
            got: image.data.len(),
        })
}

/// Full-board chessboard detector.
///
/// Only complete detections are reported: every inner corner must carry grid
/// coordinates. Corners come back row-major with index 0 in the corner
/// nearest the image origin, and the row direction chosen so the board is
/// not mirrored. Both cameras of a rig see the board from the same side, so
/// this convention is consistent between the two images of a pair.
pub struct ChessboardCornerDetector {
    pub chess: ChessConfig,
    pub params: ChessboardParams,
}

impl Default for ChessboardCornerDetector {
    fn default() -> Self {
        Self {
            chess: default_chess_config(),
            params: ChessboardParams::default(),
        }
    }
}

impl ChessboardCornerDetector {
    fn params_for(&self, geometry: &BoardGeometry) -> ChessboardParams {
        let mut params = self.params.clone();
        params.expected_rows = Some(geometry.height);
        params.expected_cols = Some(geometry.width);
        params.min_corners = params.min_corners.min(geometry.corner_count());
        params
    }

    /// Run detection and order the corners; errors explain why a detection
    /// was not usable.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(width = image.width, height = image.height))
    )]
    pub fn detect(
        &self,
        image: &GrayImage,
        geometry: &BoardGeometry,
    ) -> Result<Option<Vec<Point2<f64>>>, DetectError> {
        let luma = to_luma(image)?;
        let Some(result) = detect_chessboard(&luma, &self.chess, self.params_for(geometry)) else {
            return Ok(None);
        };
        order_board_corners(&result.detection.corners, geometry).map(Some)
    }
}

impl CornerDetector for ChessboardCornerDetector {
    fn find_board_corners(
        &self,
        image: &GrayImage,
        geometry: &BoardGeometry,
    ) -> Option<Vec<Point2<f64>>> {
        match self.detect(image, geometry) {
            Ok(corners) => corners,
            Err(e) => {
                log::debug!("chessboard detection discarded: {e}");
                None
            }
        }
    }
}

/// Lay labelled grid corners out in board-point order.
pub fn order_board_corners(
    corners: &[LabeledCorner],
    geometry: &BoardGeometry,
) -> Result<Vec<Point2<f64>>, DetectError> {
    let cells: Vec<(i32, i32, Point2<f64>)> = corners
        .iter()
        .filter_map(|c| {
            let g = c.grid.as_ref()?;
            Some((
                g.i,
                g.j,
                Point2::new(c.position.x as f64, c.position.y as f64),
            ))
        })
        .collect();
    order_grid_cells(&cells, geometry)
}

/// Core of [`order_board_corners`] on plain `(i, j, position)` triples.
pub fn order_grid_cells(
    cells: &[(i32, i32, Point2<f64>)],
    geometry: &BoardGeometry,
) -> Result<Vec<Point2<f64>>, DetectError> {
    let (width, height) = (geometry.width, geometry.height);
    let expected = geometry.corner_count();
    if expected == 0 || cells.len() != expected {
        return Err(DetectError::CornerCount {
            found: cells.len(),
            expected,
        });
    }

    let (mut i_min, mut i_max, mut j_min, mut j_max) = (i32::MAX, i32::MIN, i32::MAX, i32::MIN);
    for &(i, j, _) in cells {
        i_min = i_min.min(i);
        i_max = i_max.max(i);
        j_min = j_min.min(j);
        j_max = j_max.max(j);
    }
    let cols = (i_max - i_min + 1) as u32;
    let rows = (j_max - j_min + 1) as u32;
    let transposed = if (cols, rows) == (width, height) {
        false
    } else if (cols, rows) == (height, width) {
        true
    } else {
        return Err(DetectError::GridShape {
            cols,
            rows,
            width,
            height,
        });
    };

    let w = width as usize;
    let mut grid: Vec<Option<Point2<f64>>> = vec![None; expected];
    for &(i, j, p) in cells {
        let (a, b) = ((i - i_min) as usize, (j - j_min) as usize);
        let (col, row) = if transposed { (b, a) } else { (a, b) };
        let slot = &mut grid[row * w + col];
        if slot.is_some() {
            return Err(DetectError::DuplicateCell { i, j });
        }
        *slot = Some(p);
    }
    // Every slot is filled: the count matched and no cell repeated.
    let mut points: Vec<Point2<f64>> = grid.into_iter().flatten().collect();

    // Undo mirroring: row direction x column direction must be clockwise in
    // image coordinates (y down), like the board's own i x j.
    let h = height as usize;
    let row_dir = points[w - 1] - points[0];
    let col_dir = points[(h - 1) * w] - points[0];
    if row_dir.x * col_dir.y - row_dir.y * col_dir.x < 0.0 {
        if width == height {
            // Square boards: mirror across the diagonal keeps the shape.
            points = (0..h)
                .flat_map(|r| (0..w).map(move |c| (r, c)))
                .map(|(r, c)| points[c * w + r])
                .collect();
        } else {
            for row in points.chunks_mut(w) {
                row.reverse();
            }
        }
    }

    // Of the two orientations left, start from the corner closest to the
    // image origin.
    let (first, last) = (points[0], points[points.len() - 1]);
    if first.x + first.y > last.x + last.y {
        points.reverse();
    }
    Ok(points)
}

/// `cols x rows` squares of `square` px with the top-left square at `origin`
/// on a white `size` canvas, slightly blurred like a real exposure.
#[cfg(test)]
pub(crate) fn render_chessboard(
    cols: u32,
    rows: u32,
    square: u32,
    origin: [u32; 2],
    size: [u32; 2],
) -> GrayImage {
    let [ox, oy] = origin;
    let sharp = ::image::GrayImage::from_fn(size[0], size[1], |x, y| {
        let inside = x >= ox && y >= oy && x < ox + cols * square && y < oy + rows * square;
        let dark = inside && ((x - ox) / square + (y - oy) / square) % 2 == 0;
        ::image::Luma([if dark { 30 } else { 225 }])
    });
    let blurred = ::image::imageops::blur(&sharp, 1.0);
    GrayImage::from_raw(size[0] as usize, size[1] as usize, blurred.into_raw())
        .unwrap_or_else(|| GrayImage::filled(size[0] as usize, size[1] as usize, 225))
}
