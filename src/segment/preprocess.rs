use ndarray::{Array1, Array2, ArrayView2};

use crate::error::{Error, Result};

/// Kernel size of the blur applied before segmentation.
pub const BLUR_KERNEL_SIZE: usize = 5;

pub const LOWER_PERCENTILE: f32 = 1.0;
pub const UPPER_PERCENTILE: f32 = 99.8;

const NORMALIZE_EPS: f32 = 1e-20;

// Sigma picked from the kernel size when none is given, the usual rule for
// fixed-size Gaussian blurs.
fn default_sigma(ksize: usize) -> f32 {
    return 0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8;
}

pub fn gaussian_kernel(ksize: usize, sigma: Option<f32>) -> Result<Array1<f32>> {
    if ksize % 2 != 1 {
        return Err(Error::Shape(format!("blur kernel size must be odd, got {}", ksize)));
    }

    let sigma = sigma.filter(|s| *s > 0.0).unwrap_or_else(|| default_sigma(ksize));
    let c = (ksize / 2) as f32;
    let mut kernel = Array1::from_shape_fn(ksize, |i| {
        let d = i as f32 - c;
        (-d * d / (2.0 * sigma * sigma)).exp()
    });
    let total = kernel.sum();
    kernel /= total;

    return Ok(kernel);
}

// Mirror an out-of-range index back into [0, n) without repeating the edge
// pixel (gfedcb|abcdefgh|gfedcba).
fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
    while i < 0 || i >= n {
        if i < 0 {
            i = -i;
        }
        if i >= n {
            i = 2 * n - 2 - i;
        }
    }
    return i as usize;
}

/// Separable Gaussian blur with a `ksize` x `ksize` kernel and mirrored borders.
pub fn gaussian_blur(image: &ArrayView2<f32>, ksize: usize) -> Result<Array2<f32>> {
    let kernel = gaussian_kernel(ksize, None)?;
    let r = (ksize / 2) as isize;
    let (m, n) = image.dim();

    let mut rows = Array2::<f32>::zeros((m, n));
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0;
            for (k, w) in kernel.iter().enumerate() {
                let jj = reflect101(j as isize + k as isize - r, n);
                acc += w * image[[i, jj]];
            }
            rows[[i, j]] = acc;
        }
    }

    let mut out = Array2::<f32>::zeros((m, n));
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0;
            for (k, w) in kernel.iter().enumerate() {
                let ii = reflect101(i as isize + k as isize - r, m);
                acc += w * rows[[ii, j]];
            }
            out[[i, j]] = acc;
        }
    }

    return Ok(out);
}

// Linear interpolation between closest ranks on sorted values.
fn percentile_sorted(sorted: &[f32], q: f32) -> f32 {
    if sorted.is_empty() {
        return f32::NAN;
    }
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f32;
    return sorted[lo] + (sorted[hi] - sorted[lo]) * frac;
}

pub fn percentile(values: &[f32], q: f32) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));
    return percentile_sorted(&sorted, q);
}

/// Rescale so the `lower` percentile maps to 0 and the `upper` percentile to
/// 1. Values outside that range are left unclipped.
pub fn normalize_percentile(image: &ArrayView2<f32>, lower: f32, upper: f32) -> Array2<f32> {
    let mut sorted: Vec<f32> = image.iter().cloned().collect();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));

    let mi = percentile_sorted(&sorted, lower);
    let ma = percentile_sorted(&sorted, upper);

    return image.mapv(|v| (v - mi) / (ma - mi + NORMALIZE_EPS));
}
