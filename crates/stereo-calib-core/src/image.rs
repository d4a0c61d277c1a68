//! Lightweight 8-bit grayscale buffers and the per-frame quality metrics
//! computed on them.

#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    /// Wrap a row-major buffer. Returns `None` when `data.len() != width * height`.
    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Option<Self> {
        if width.checked_mul(height)? != data.len() {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    /// Constant-valued image, mostly useful in tests.
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    #[inline]
    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

#[inline]
fn get_gray(src: &GrayImageView<'_>, x: usize, y: usize) -> f64 {
    src.data[y * src.width + x] as f64
}

/// Focus metric: variance of the 4-neighbour Laplacian response.
///
/// Evaluated on interior pixels only; images smaller than 3x3 score `0.0`.
/// Sharp, high-contrast frames score high, motion-blurred frames low.
pub fn variance_of_laplacian(src: &GrayImageView<'_>) -> f64 {
    if src.width < 3 || src.height < 3 {
        return 0.0;
    }

    let mut sum = 0.0_f64;
    let mut sum_sq = 0.0_f64;
    let mut n = 0usize;
    for y in 1..src.height - 1 {
        for x in 1..src.width - 1 {
            let lap = get_gray(src, x - 1, y)
                + get_gray(src, x + 1, y)
                + get_gray(src, x, y - 1)
                + get_gray(src, x, y + 1)
                - 4.0 * get_gray(src, x, y);
            sum += lap;
            sum_sq += lap * lap;
            n += 1;
        }
    }

    let n = n as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

/// Mean per-pixel absolute difference normalized to `[0, 1]`.
///
/// Frames of different dimensions are treated as maximally different.
pub fn mean_abs_difference(a: &GrayImageView<'_>, b: &GrayImageView<'_>) -> f64 {
    if a.width != b.width || a.height != b.height {
        return 1.0;
    }
    if a.data.is_empty() {
        return 0.0;
    }

    let total: u64 = a
        .data
        .iter()
        .zip(b.data.iter())
        .map(|(&pa, &pb)| pa.abs_diff(pb) as u64)
        .sum();
    total as f64 / (a.data.len() as f64 * 255.0)
}
