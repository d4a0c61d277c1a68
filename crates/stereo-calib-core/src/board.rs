//! Checkerboard target geometry.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// Inner-corner grid dimensions and physical square size of a checkerboard.
///
/// `width`/`height` count **inner corners**, not squares: a board with
/// 10x7 squares has `width = 9`, `height = 6`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardGeometry {
    pub width: u32,
    pub height: u32,
    pub square_size: f64,
}

/// Board geometry validation errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BoardGeometryError {
    #[error("board must have at least 2x2 inner corners (got {width}x{height})")]
    InvalidSize { width: u32, height: u32 },
    #[error("board square size must be finite and > 0 (got {0})")]
    InvalidSquareSize(f64),
}

impl BoardGeometry {
    /// Validate and create a board geometry.
    pub fn new(width: u32, height: u32, square_size: f64) -> Result<Self, BoardGeometryError> {
        let geometry = Self {
            width,
            height,
            square_size,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    pub fn validate(&self) -> Result<(), BoardGeometryError> {
        if self.width < 2 || self.height < 2 {
            return Err(BoardGeometryError::InvalidSize {
                width: self.width,
                height: self.height,
            });
        }
        if !self.square_size.is_finite() || self.square_size <= 0.0 {
            return Err(BoardGeometryError::InvalidSquareSize(self.square_size));
        }
        Ok(())
    }

    /// Number of inner corners on the board.
    #[inline]
    pub fn corner_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// 3D board points on the `Z = 0` plane.
    ///
    /// Row-major order (Y major): `(i = 0..width, j = 0..height)`, matching
    /// the order in which detected corners are stored.
    pub fn board_points(&self) -> Vec<Point3<f64>> {
        self.planar_points()
            .into_iter()
            .map(|p| Point3::new(p.x, p.y, 0.0))
            .collect()
    }

    /// Same as [`BoardGeometry::board_points`] without the zero Z coordinate.
    pub fn planar_points(&self) -> Vec<Point2<f64>> {
        let mut points = Vec::with_capacity(self.corner_count());
        for j in 0..self.height {
            for i in 0..self.width {
                points.push(Point2::new(
                    i as f64 * self.square_size,
                    j as f64 * self.square_size,
                ));
            }
        }
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_boards() {
        assert!(matches!(
            BoardGeometry::new(1, 6, 1.0),
            Err(BoardGeometryError::InvalidSize { .. })
        ));
        assert!(matches!(
            BoardGeometry::new(9, 6, 0.0),
            Err(BoardGeometryError::InvalidSquareSize(_))
        ));
        assert!(BoardGeometry::new(9, 6, f64::NAN).is_err());
    }

    #[test]
    fn board_points_are_row_major() {
        let board = BoardGeometry::new(3, 2, 0.5).expect("board");
        let pts = board.board_points();
        assert_eq!(pts.len(), 6);
        assert_eq!(pts[0], Point3::new(0.0, 0.0, 0.0));
        assert_eq!(pts[2], Point3::new(1.0, 0.0, 0.0));
        assert_eq!(pts[3], Point3::new(0.0, 0.5, 0.0));
        assert!(pts.iter().all(|p| p.z == 0.0));
    }
}
