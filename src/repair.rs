use log::{debug, info};
use ndarray::{Array3, Axis, Zip};
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::BACKGROUND;

/// Voxel count of every object on every slice it occupies: object -> z -> area.
pub type AreaProfile = BTreeMap<u32, BTreeMap<usize, u64>>;

pub const AREA_TOLERANCE: f64 = 0.25;

pub fn area_profiles(labels: &Array3<u32>) -> AreaProfile {
    let per_slice: Vec<BTreeMap<u32, u64>> = (0..labels.len_of(Axis(0)))
        .into_par_iter()
        .map(|z| {
            let mut areas = BTreeMap::new();
            for &label in labels.index_axis(Axis(0), z).iter() {
                if label != BACKGROUND {
                    *areas.entry(label).or_insert(0) += 1;
                }
            }
            areas
        })
        .collect();

    let mut profiles = AreaProfile::new();
    for (z, areas) in per_slice.into_iter().enumerate() {
        for (label, area) in areas {
            profiles.entry(label).or_default().insert(z, area);
        }
    }

    return profiles;
}

/// Total voxel count of every object, the sum of its per-slice areas.
pub fn volume_table(labels: &Array3<u32>) -> BTreeMap<u32, u64> {
    return area_profiles(labels)
        .into_iter()
        .map(|(label, areas)| (label, areas.values().sum()))
        .collect();
}

#[derive(Clone, Debug, PartialEq)]
pub struct Repair {
    pub label: u32,
    pub layer: usize,
    pub area: u64,
    pub expected: f64,
}

/// Find slices where an object's area strays from the mean of its
/// neighboring occurrences by more than `tolerance` times that mean, and
/// replace the object's mask there with its mask from the previous slice
/// (the next slice when on the first one). Replacement masks only claim
/// background voxels.
pub fn repair_volume_consistency(labels: &Array3<u32>, tolerance: f64) -> (Array3<u32>, Vec<Repair>) {
    let nz = labels.len_of(Axis(0));
    let mut adjusted = labels.clone();
    let mut repairs = Vec::new();

    for (label, areas) in area_profiles(labels) {
        let layers: Vec<(usize, u64)> = areas.into_iter().collect();
        if layers.len() < 3 {
            continue;
        }

        for w in layers.windows(3) {
            let (prev_area, (z, area), next_area) = (w[0].1, w[1], w[2].1);
            let expected = (prev_area + next_area) as f64 / 2.0;
            if (area as f64 - expected).abs() <= tolerance * expected {
                continue;
            }

            debug!(
                "Object {} on slice {}: area {} vs expected {:.1}, repairing",
                label, z, area, expected
            );

            adjusted
                .index_axis_mut(Axis(0), z)
                .mapv_inplace(|l| if l == label { BACKGROUND } else { l });

            let source = if z > 0 {
                Some(z - 1)
            } else if z + 1 < nz {
                Some(z + 1)
            } else {
                None
            };

            if let Some(source) = source {
                Zip::from(adjusted.index_axis_mut(Axis(0), z))
                    .and(labels.index_axis(Axis(0), source))
                    .for_each(|a, &s| {
                        if s == label && *a == BACKGROUND {
                            *a = label;
                        }
                    });
            }

            repairs.push(Repair {
                label,
                layer: z,
                area,
                expected,
            });
        }
    }

    info!("Repaired {} object slices with inconsistent area", repairs.len());

    return (adjusted, repairs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    // Square of side `side` for `label` on slice z, top-left at (y, x).
    fn square(labels: &mut Array3<u32>, z: usize, y: usize, x: usize, side: usize, label: u32) {
        labels.slice_mut(s![z, y..y + side, x..x + side]).fill(label);
    }

    #[test]
    fn test_volume_is_sum_of_areas() {
        let mut labels = Array3::<u32>::zeros((4, 30, 30));
        square(&mut labels, 0, 0, 0, 5, 1);
        square(&mut labels, 1, 0, 0, 6, 1);
        square(&mut labels, 3, 10, 10, 4, 1);
        square(&mut labels, 2, 20, 20, 3, 2);

        let volumes = volume_table(&labels);
        let profiles = area_profiles(&labels);
        assert_eq!(volumes[&1], 25 + 36 + 16);
        assert_eq!(volumes[&2], 9);
        for (label, areas) in profiles.iter() {
            assert_eq!(volumes[label], areas.values().sum::<u64>());
        }
        assert_eq!(profiles[&1].keys().cloned().collect::<Vec<_>>(), vec![0, 1, 3]);
    }

    #[test]
    fn test_collapsed_slice_is_repaired() {
        let mut labels = Array3::<u32>::zeros((3, 20, 20));
        square(&mut labels, 0, 2, 2, 10, 1);
        square(&mut labels, 1, 2, 2, 4, 1);
        square(&mut labels, 2, 2, 2, 10, 1);

        let (adjusted, repairs) = repair_volume_consistency(&labels, AREA_TOLERANCE);
        assert_eq!(
            repairs,
            vec![Repair {
                label: 1,
                layer: 1,
                area: 16,
                expected: 100.0
            }]
        );
        assert_eq!(adjusted.index_axis(Axis(0), 1), labels.index_axis(Axis(0), 0));
        assert_eq!(volume_table(&adjusted)[&1], 300);
    }

    #[test]
    fn test_small_deviation_left_alone() {
        let mut labels = Array3::<u32>::zeros((3, 20, 20));
        square(&mut labels, 0, 2, 2, 10, 1);
        square(&mut labels, 1, 2, 2, 11, 1);
        square(&mut labels, 2, 2, 2, 10, 1);

        let (adjusted, repairs) = repair_volume_consistency(&labels, AREA_TOLERANCE);
        assert!(repairs.is_empty());
        assert_eq!(adjusted, labels);
    }

    #[test]
    fn test_first_and_last_occurrence_never_repaired() {
        let mut labels = Array3::<u32>::zeros((3, 20, 20));
        square(&mut labels, 0, 2, 2, 2, 1);
        square(&mut labels, 1, 2, 2, 10, 1);
        square(&mut labels, 2, 2, 2, 2, 1);

        // middle slice is the outlier relative to its neighbors
        let (_, repairs) = repair_volume_consistency(&labels, AREA_TOLERANCE);
        assert_eq!(repairs.len(), 1);
        assert_eq!(repairs[0].layer, 1);
    }

    #[test]
    fn test_repair_does_not_overwrite_other_objects() {
        let mut labels = Array3::<u32>::zeros((3, 20, 20));
        square(&mut labels, 0, 0, 0, 10, 1);
        square(&mut labels, 1, 0, 0, 3, 1);
        square(&mut labels, 2, 0, 0, 10, 1);
        // object 2 sits where object 1's previous mask would go
        square(&mut labels, 1, 5, 5, 3, 2);

        let (adjusted, _) = repair_volume_consistency(&labels, AREA_TOLERANCE);
        assert_eq!(adjusted[[1, 6, 6]], 2);
        assert_eq!(adjusted[[1, 0, 0]], 1);
        assert_eq!(adjusted[[1, 9, 9]], 1);
    }
}
