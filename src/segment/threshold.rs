use clap::ValueEnum;
use ndarray::{Array2, ArrayView2};
use petgraph::unionfind::UnionFind;

use super::{instance_stats, InstanceDetails, InstanceSegmenter, SlicePrediction};
use crate::error::Result;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Connectivity {
    Four,
    Eight,
}

/// Otsu's threshold over a 256 bin histogram of `image` clamped to [0, 1].
/// Pixels strictly above the returned value are foreground.
pub fn otsu_threshold(image: &ArrayView2<f32>) -> f32 {
    let mut histogram = [0_u64; 256];
    for &v in image.iter() {
        let bin = (v.clamp(0.0, 1.0) * 255.0) as usize;
        histogram[bin] += 1;
    }

    let total = image.len() as f64;
    let sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_b = 0.0;
    let mut weight_b = 0.0;
    let mut max_variance = 0.0;
    let mut threshold = 0;

    for (i, &count) in histogram.iter().enumerate() {
        weight_b += count as f64;
        if weight_b == 0.0 {
            continue;
        }

        let weight_f = total - weight_b;
        if weight_f == 0.0 {
            break;
        }

        sum_b += i as f64 * count as f64;
        let mean_b = sum_b / weight_b;
        let mean_f = (sum - sum_b) / weight_f;
        let variance = weight_b * weight_f * (mean_b - mean_f).powi(2);

        if variance > max_variance {
            max_variance = variance;
            threshold = i;
        }
    }

    // upper edge of the last background bin
    return (threshold + 1) as f32 / 255.0;
}

/// Label connected foreground regions of `mask`. Labels are numbered from 1
/// in raster order of each region's first pixel. Returns the label map and
/// the number of regions.
pub fn label_components(mask: &ArrayView2<bool>, connectivity: Connectivity) -> (Array2<u32>, u32) {
    let (m, n) = mask.dim();
    let mut sets = UnionFind::<usize>::new(m * n);

    // Only look back at neighbors already visited in raster order.
    let offsets: &[(isize, isize)] = match connectivity {
        Connectivity::Four => &[(-1, 0), (0, -1)],
        Connectivity::Eight => &[(-1, -1), (-1, 0), (-1, 1), (0, -1)],
    };

    for i in 0..m {
        for j in 0..n {
            if !mask[[i, j]] {
                continue;
            }
            for (di, dj) in offsets {
                let ii = i as isize + di;
                let jj = j as isize + dj;
                if ii < 0 || jj < 0 || jj >= n as isize {
                    continue;
                }
                let (ii, jj) = (ii as usize, jj as usize);
                if mask[[ii, jj]] {
                    sets.union(i * n + j, ii * n + jj);
                }
            }
        }
    }

    let mut root_labels = vec![0_u32; m * n];
    let mut labels = Array2::<u32>::zeros((m, n));
    let mut count = 0;
    for i in 0..m {
        for j in 0..n {
            if !mask[[i, j]] {
                continue;
            }
            let root = sets.find_mut(i * n + j);
            if root_labels[root] == 0 {
                count += 1;
                root_labels[root] = count;
            }
            labels[[i, j]] = root_labels[root];
        }
    }

    return (labels, count);
}

/// Classical stand-in for a learned instance model: global threshold followed
/// by connected component labeling.
#[derive(Clone, Debug)]
pub struct ThresholdSegmenter {
    // Fixed threshold on the normalized slice, Otsu's when `None`.
    pub threshold: Option<f32>,
    pub connectivity: Connectivity,
}

impl Default for ThresholdSegmenter {
    fn default() -> Self {
        return ThresholdSegmenter {
            threshold: None,
            connectivity: Connectivity::Four,
        };
    }
}

impl InstanceSegmenter for ThresholdSegmenter {
    fn predict_instances(&mut self, image: &ArrayView2<f32>) -> Result<SlicePrediction> {
        let cutoff = self.threshold.unwrap_or_else(|| otsu_threshold(image));
        let mask = image.mapv(|v| v > cutoff);
        let (labels, _) = label_components(&mask.view(), self.connectivity);

        let details = instance_stats(&labels.view())
            .into_iter()
            .map(|(label, stats)| InstanceDetails {
                label,
                centroid: stats.centroid(),
                area: stats.area,
            })
            .collect();

        return Ok(SlicePrediction { labels, details });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_otsu_bimodal() {
        let image = Array2::from_shape_fn((10, 10), |(i, _)| if i < 5 { 0.1 } else { 0.9 });
        let t = otsu_threshold(&image.view());
        assert!(t >= 0.1 && t < 0.9, "threshold {}", t);
    }

    #[test]
    fn test_components_four_vs_eight() {
        // two pixels touching only at a corner
        let mut mask = Array2::from_elem((3, 3), false);
        mask[[0, 0]] = true;
        mask[[1, 1]] = true;

        let (labels, count) = label_components(&mask.view(), Connectivity::Four);
        assert_eq!(count, 2);
        assert_eq!(labels[[0, 0]], 1);
        assert_eq!(labels[[1, 1]], 2);

        let (labels, count) = label_components(&mask.view(), Connectivity::Eight);
        assert_eq!(count, 1);
        assert_eq!(labels[[1, 1]], 1);
    }

    #[test]
    fn test_components_u_shape() {
        // arms of the U get merged once the bottom row is reached
        let rows = ["#.#", "#.#", "###"];
        let mask = Array2::from_shape_fn((3, 3), |(i, j)| rows[i].as_bytes()[j] == b'#');
        let (labels, count) = label_components(&mask.view(), Connectivity::Four);
        assert_eq!(count, 1);
        assert_eq!(labels[[0, 2]], 1);
        assert_eq!(labels[[0, 1]], 0);
    }

    #[test]
    fn test_segmenter_finds_blobs() {
        let mut image = Array2::<f32>::zeros((20, 20));
        for i in 2..6 {
            for j in 2..6 {
                image[[i, j]] = 1.0;
            }
        }
        for i in 12..18 {
            for j in 10..14 {
                image[[i, j]] = 1.0;
            }
        }

        let mut segmenter = ThresholdSegmenter::default();
        let prediction = segmenter.predict_instances(&image.view()).unwrap();
        assert_eq!(prediction.details.len(), 2);
        assert_eq!(prediction.details[0].area, 16);
        assert_eq!(prediction.details[1].area, 24);
        assert_eq!(prediction.details[0].centroid, [3.5, 3.5]);
    }
}
