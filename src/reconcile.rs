use clap::ValueEnum;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use log::info;
use ndarray::{Array3, Axis, Zip};
use rayon::prelude::*;
use std::collections::HashMap;

use crate::segment::InstanceRecord;
use crate::BACKGROUND;

// Built once per slice. Many instances may share a coordinate.
type SliceTree = ImmutableKdTree<f32, u32, 2, 32>;

/// What happens to an instance with no neighbor within reach in any
/// neighboring slice.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum UnmatchedPolicy {
    /// Start a new 3D object.
    Mint,
    /// Treat it as noise and erase it.
    Drop,
}

#[derive(Clone, Debug)]
pub struct ReconcileParams {
    // how many slices before and after to search
    pub reach: usize,
    pub distance_threshold: f32,
    pub unmatched: UnmatchedPolicy,
}

impl ReconcileParams {
    /// Chain through the immediately neighboring slices only.
    pub fn adjacent() -> Self {
        return ReconcileParams {
            reach: 1,
            distance_threshold: 10.0,
            unmatched: UnmatchedPolicy::Mint,
        };
    }

    /// Search two slices in each direction, bridging one missed slice, and
    /// discard instances that have no counterpart anywhere within reach.
    pub fn two_layer() -> Self {
        return ReconcileParams {
            reach: 2,
            distance_threshold: 25.0,
            unmatched: UnmatchedPolicy::Drop,
        };
    }
}

pub struct Reconciled {
    pub labels: Array3<u32>,
    pub nobjects: u32,
    pub dropped: usize,
}

// Centroids of one slice's instances, indexed for nearest neighbor lookup.
struct SliceIndex {
    tree: SliceTree,
}

impl SliceIndex {
    fn new(records: &[&InstanceRecord]) -> Option<SliceIndex> {
        if records.is_empty() {
            return None;
        }

        let centroids: Vec<[f32; 2]> = records.iter().map(|record| record.centroid).collect();
        let tree = SliceTree::new_from_slice(&centroids);

        return Some(SliceIndex { tree });
    }

    // Position of the nearest instance, if strictly closer than `threshold`.
    fn nearest_within(&self, centroid: &[f32; 2], threshold: f32) -> Option<usize> {
        let nearest = self.tree.nearest_one::<SquaredEuclidean>(centroid);
        if nearest.distance < threshold * threshold {
            return Some(nearest.item as usize);
        } else {
            return None;
        }
    }
}

/// Merge slice-local labels into persistent 3D object identities.
///
/// Slices are visited in order. Each instance adopts the identity of the
/// nearest instance within the distance threshold in an earlier slice
/// (closest slice first). Failing that, it starts a new object if it has a
/// counterpart within reach in a later slice, otherwise the unmatched policy
/// decides. Labels with no entry in `instances` come out as background.
pub fn reconcile_labels(
    labels: &Array3<u32>,
    instances: &[InstanceRecord],
    params: &ReconcileParams,
) -> Reconciled {
    let nz = labels.len_of(Axis(0));

    let mut by_layer: Vec<Vec<&InstanceRecord>> = vec![Vec::new(); nz];
    for record in instances {
        if record.layer < nz {
            by_layer[record.layer].push(record);
        }
    }

    let indexes: Vec<Option<SliceIndex>> = by_layer
        .par_iter()
        .map(|records| SliceIndex::new(records))
        .collect();

    let threshold = params.distance_threshold;
    let mut identities: Vec<Vec<u32>> = by_layer.iter().map(|r| vec![BACKGROUND; r.len()]).collect();
    let mut next_id: u32 = 1;
    let mut dropped = 0;

    for z in 0..nz {
        for (i, record) in by_layer[z].iter().enumerate() {
            let mut id = BACKGROUND;

            for d in 1..=params.reach.min(z) {
                if let Some(index) = &indexes[z - d] {
                    if let Some(j) = index.nearest_within(&record.centroid, threshold) {
                        if identities[z - d][j] != BACKGROUND {
                            id = identities[z - d][j];
                            break;
                        }
                    }
                }
            }

            if id == BACKGROUND {
                let continues = (1..=params.reach)
                    .filter(|d| z + d < nz)
                    .filter_map(|d| indexes[z + d].as_ref())
                    .any(|index| index.nearest_within(&record.centroid, threshold).is_some());

                if continues || params.unmatched == UnmatchedPolicy::Mint {
                    id = next_id;
                    next_id += 1;
                } else {
                    dropped += 1;
                }
            }

            identities[z][i] = id;
        }
    }

    let mut out = Array3::<u32>::zeros(labels.raw_dim());
    for z in 0..nz {
        let lookup: HashMap<u32, u32> = by_layer[z]
            .iter()
            .zip(identities[z].iter())
            .map(|(record, &id)| (record.label, id))
            .collect();

        Zip::from(out.index_axis_mut(Axis(0), z))
            .and(labels.index_axis(Axis(0), z))
            .for_each(|o, &label| {
                if label != BACKGROUND {
                    *o = lookup.get(&label).cloned().unwrap_or(BACKGROUND);
                }
            });
    }

    let nobjects = next_id - 1;
    info!(
        "Reconciled {} instances into {} 3D objects ({} dropped)",
        instances.len(),
        nobjects,
        dropped
    );

    return Reconciled {
        labels: out,
        nobjects,
        dropped,
    };
}
