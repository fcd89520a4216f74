pub mod preprocess;
pub mod threshold;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::BACKGROUND;
use preprocess::{gaussian_blur, normalize_percentile, BLUR_KERNEL_SIZE, LOWER_PERCENTILE, UPPER_PERCENTILE};

pub use threshold::{Connectivity, ThresholdSegmenter};

/// Per-instance geometric descriptors reported by a segmentation model.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceDetails {
    pub label: u32,
    pub centroid: [f32; 2],
    pub area: u64,
}

pub struct SlicePrediction {
    pub labels: Array2<u32>,
    pub details: Vec<InstanceDetails>,
}

/// A 2D instance segmentation model. Takes one normalized intensity slice and
/// returns a label map (0 is background) plus per-instance descriptors.
pub trait InstanceSegmenter {
    fn predict_instances(&mut self, image: &ArrayView2<f32>) -> Result<SlicePrediction>;
}

/// One instance found in slice `layer`, before cross-slice reconciliation.
/// Centroids are (y, x) in pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceRecord {
    pub layer: usize,
    pub label: u32,
    pub centroid: [f32; 2],
    pub area: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InstanceStats {
    pub area: u64,
    sum_y: f64,
    sum_x: f64,
}

impl InstanceStats {
    fn push(&mut self, y: usize, x: usize) {
        self.area += 1;
        self.sum_y += y as f64;
        self.sum_x += x as f64;
    }

    pub fn centroid(&self) -> [f32; 2] {
        let n = self.area.max(1) as f64;
        return [(self.sum_y / n) as f32, (self.sum_x / n) as f32];
    }
}

/// Pixel count and coordinate sums of every non-background label in a slice.
pub fn instance_stats(labels: &ArrayView2<u32>) -> BTreeMap<u32, InstanceStats> {
    let mut stats: BTreeMap<u32, InstanceStats> = BTreeMap::new();
    for ((y, x), &label) in labels.indexed_iter() {
        if label != BACKGROUND {
            stats.entry(label).or_default().push(y, x);
        }
    }
    return stats;
}

/// Erase every instance whose pixel count falls outside the inclusive band
/// [min_area, max_area]. Returns the erased labels.
pub fn filter_area_band(labels: &mut Array2<u32>, min_area: u64, max_area: u64) -> Vec<u32> {
    let removed: Vec<u32> = instance_stats(&labels.view())
        .into_iter()
        .filter(|(_, stats)| stats.area < min_area || stats.area > max_area)
        .map(|(label, _)| label)
        .collect();

    if !removed.is_empty() {
        labels.mapv_inplace(|label| {
            if removed.binary_search(&label).is_ok() {
                BACKGROUND
            } else {
                label
            }
        });
    }

    return removed;
}

#[derive(Clone, Debug)]
pub struct SegmentParams {
    pub min_area: u64,
    pub max_area: u64,
    pub blur_size: usize,
    pub lower_percentile: f32,
    pub upper_percentile: f32,
}

impl Default for SegmentParams {
    fn default() -> Self {
        return SegmentParams {
            min_area: 250,
            max_area: 10000,
            blur_size: BLUR_KERNEL_SIZE,
            lower_percentile: LOWER_PERCENTILE,
            upper_percentile: UPPER_PERCENTILE,
        };
    }
}

pub struct SegmentedStack {
    pub labels: Array3<u32>,
    pub instances: Vec<InstanceRecord>,
}

fn slice_records(layer: usize, labels: &ArrayView2<u32>) -> Vec<InstanceRecord> {
    return instance_stats(labels)
        .into_iter()
        .map(|(label, stats)| InstanceRecord {
            layer,
            label,
            centroid: stats.centroid(),
            area: stats.area,
        })
        .collect();
}

/// Run `segmenter` on every z-slice of `volume` after blurring and percentile
/// normalization, dropping instances outside the area band.
pub fn segment_stack(
    volume: &Array3<u16>,
    segmenter: &mut dyn InstanceSegmenter,
    params: &SegmentParams,
) -> Result<SegmentedStack> {
    let (nz, ny, nx) = volume.dim();
    let mut labels = Array3::<u32>::zeros((nz, ny, nx));
    let mut instances = Vec::new();

    let progress = ProgressBar::new(nz as u64);
    progress.set_style(
        ProgressStyle::with_template("segmenting {bar:40} {pos}/{len} slices")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    for (z, slice) in volume.axis_iter(Axis(0)).enumerate() {
        let slice = slice.mapv(|v| v as f32);
        let blurred = gaussian_blur(&slice.view(), params.blur_size)?;
        let normalized =
            normalize_percentile(&blurred.view(), params.lower_percentile, params.upper_percentile);

        let prediction = segmenter.predict_instances(&normalized.view())?;
        let mut slice_labels = prediction.labels;
        if slice_labels.dim() != (ny, nx) {
            return Err(Error::Segmenter {
                layer: z,
                reason: format!(
                    "label map has shape {:?}, expected {:?}",
                    slice_labels.dim(),
                    (ny, nx)
                ),
            });
        }

        let removed = filter_area_band(&mut slice_labels, params.min_area, params.max_area);
        let records = slice_records(z, &slice_labels.view());
        debug!(
            "Slice {}: {} instances from model, {} outside area band, {} kept",
            z,
            prediction.details.len(),
            removed.len(),
            records.len()
        );
        if records.is_empty() {
            warn!("No instances kept on slice {}", z);
        }

        labels.index_axis_mut(Axis(0), z).assign(&slice_labels);
        instances.extend(records);
        progress.inc(1);
    }
    progress.finish_and_clear();

    info!("Segmented {} slices, {} instances kept", nz, instances.len());

    return Ok(SegmentedStack { labels, instances });
}

/// Rebuild the per-slice instance table from a stacked label volume.
pub fn instance_table(labels: &Array3<u32>) -> Vec<InstanceRecord> {
    let per_slice: Vec<Vec<InstanceRecord>> = (0..labels.len_of(Axis(0)))
        .into_par_iter()
        .map(|z| slice_records(z, &labels.index_axis(Axis(0), z)))
        .collect();

    return per_slice.into_iter().flatten().collect();
}
