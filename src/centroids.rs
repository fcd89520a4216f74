use log::info;
use ndarray::{Array3, Axis};
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::BACKGROUND;

/// Object id -> (z, y, x).
pub type CentroidMap = BTreeMap<u32, [f32; 3]>;

#[derive(Clone, Copy, Default)]
struct Moments {
    count: u64,
    sum: [f64; 3],
}

/// Center of mass of every object's voxels, in voxel units.
pub fn centroids(labels: &Array3<u32>) -> CentroidMap {
    let per_slice: Vec<BTreeMap<u32, Moments>> = (0..labels.len_of(Axis(0)))
        .into_par_iter()
        .map(|z| {
            let mut moments: BTreeMap<u32, Moments> = BTreeMap::new();
            for ((y, x), &label) in labels.index_axis(Axis(0), z).indexed_iter() {
                if label == BACKGROUND {
                    continue;
                }
                let m = moments.entry(label).or_default();
                m.count += 1;
                m.sum[0] += z as f64;
                m.sum[1] += y as f64;
                m.sum[2] += x as f64;
            }
            moments
        })
        .collect();

    let mut totals: BTreeMap<u32, Moments> = BTreeMap::new();
    for moments in per_slice {
        for (label, m) in moments {
            let total = totals.entry(label).or_default();
            total.count += m.count;
            for k in 0..3 {
                total.sum[k] += m.sum[k];
            }
        }
    }

    return totals
        .into_iter()
        .map(|(label, m)| {
            let n = m.count as f64;
            (label, [(m.sum[0] / n) as f32, (m.sum[1] / n) as f32, (m.sum[2] / n) as f32])
        })
        .collect();
}

/// Divide each coordinate by the extent of its axis, so centroids from
/// volumes of different size and resolution are comparable.
pub fn normalize_centroids(centroids: &CentroidMap, shape: (usize, usize, usize)) -> CentroidMap {
    let extents = [shape.0 as f32, shape.1 as f32, shape.2 as f32];
    return centroids
        .iter()
        .map(|(&label, c)| (label, [c[0] / extents[0], c[1] / extents[1], c[2] / extents[2]]))
        .collect();
}

pub struct CentroidSet {
    pub centroids: CentroidMap,
    pub normalized: CentroidMap,
}

impl CentroidSet {
    pub fn from_labels(labels: &Array3<u32>) -> CentroidSet {
        let centroids = centroids(labels);
        let normalized = normalize_centroids(&centroids, labels.dim());
        info!("Computed centroids of {} objects", centroids.len());
        return CentroidSet {
            centroids,
            normalized,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    #[test]
    fn test_centroid_of_box() {
        let mut labels = Array3::<u32>::zeros((4, 10, 20));
        labels.slice_mut(s![1..3, 2..4, 10..16]).fill(5);
        let c = centroids(&labels);
        assert_eq!(c.len(), 1);
        assert_eq!(c[&5], [1.5, 2.5, 12.5]);
    }

    #[test]
    fn test_centroid_spans_slices_unevenly() {
        let mut labels = Array3::<u32>::zeros((3, 4, 4));
        labels[[0, 0, 0]] = 1;
        labels[[2, 0, 0]] = 1;
        labels[[2, 0, 2]] = 1;
        labels[[2, 2, 2]] = 1;
        let c = centroids(&labels);
        assert_eq!(c[&1], [1.5, 0.5, 1.0]);
    }

    #[test]
    fn test_normalized_in_unit_range() {
        let mut labels = Array3::<u32>::zeros((5, 7, 9));
        labels[[0, 0, 0]] = 1;
        labels[[4, 6, 8]] = 2;
        labels.indexed_iter_mut().for_each(|((z, y, x), l)| {
            if *l == 0 && (z + y + x) % 11 == 0 {
                *l = 3;
            }
        });

        let set = CentroidSet::from_labels(&labels);
        assert_eq!(set.normalized.len(), 3);
        for c in set.normalized.values() {
            assert!(c.iter().all(|&v| (0.0..=1.0).contains(&v)), "{:?}", c);
        }
        assert_eq!(set.normalized[&1], [0.0, 0.0, 0.0]);
        assert_eq!(set.normalized[&2], [4.0 / 5.0, 6.0 / 7.0, 8.0 / 9.0]);
    }
}
