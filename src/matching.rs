use itertools::izip;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use log::{info, warn};
use ndarray::Array3;
use rayon::prelude::*;
use std::collections::HashMap;

use crate::centroids::CentroidMap;
use crate::BACKGROUND;

// Many centroids may share a coordinate, e.g. every object of one slice has
// the same normalized z.
type CentroidTree = ImmutableKdTree<f32, u32, 3, 32>;

pub const NCHANNELS: usize = 3;

#[derive(Clone, Debug)]
pub struct MatchParams {
    pub distance_threshold: f32,
    /// Per-axis weights applied to (z, y, x) before measuring distance.
    pub weights: [f32; 3],
}

impl Default for MatchParams {
    fn default() -> Self {
        return MatchParams {
            distance_threshold: 0.1,
            weights: [1.0, 1.0, 1.0],
        };
    }
}

/// An object of channel `source` with a counterpart in both other channels.
/// `labels[c]` is the object's label in channel c (its own label at
/// `source`).
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelMatch {
    pub source: usize,
    pub labels: [u32; NCHANNELS],
    /// True when every counterpart, matched from its own channel, picks the
    /// same objects back.
    pub mutual: bool,
}

pub struct MatchResult {
    pub retained: [CentroidMap; NCHANNELS],
    pub matches: Vec<ChannelMatch>,
}

fn weighted(c: &[f32; 3], weights: &[f32; 3]) -> [f32; 3] {
    return [c[0] * weights[0], c[1] * weights[1], c[2] * weights[2]];
}

// Weighted centroids of one channel in a k-d tree, plus the label of each
// point in insertion order.
struct ChannelIndex {
    tree: Option<CentroidTree>,
    labels: Vec<u32>,
}

impl ChannelIndex {
    fn new(centroids: &CentroidMap, weights: &[f32; 3]) -> ChannelIndex {
        let points: Vec<[f32; 3]> = centroids.values().map(|c| weighted(c, weights)).collect();
        let labels: Vec<u32> = centroids.keys().cloned().collect();
        let tree = if points.is_empty() {
            None
        } else {
            Some(CentroidTree::new_from_slice(&points))
        };
        return ChannelIndex { tree, labels };
    }

    // Label of the nearest point if it lies within `threshold` (inclusive).
    fn nearest_within(&self, point: &[f32; 3], threshold: f32) -> Option<u32> {
        let nearest = self.tree.as_ref()?.nearest_one::<SquaredEuclidean>(point);
        if nearest.distance <= threshold * threshold {
            return Some(self.labels[nearest.item as usize]);
        } else {
            return None;
        }
    }
}

/// Keep only objects that have a counterpart in every other channel.
///
/// Each channel is matched in turn against the other two: an object is
/// retained when the nearest weighted centroid in both other channels lies
/// within the distance threshold, and those two counterparts are retained in
/// their own channels as well. Several objects may claim the same
/// counterpart; such matches come out with `mutual` unset.
pub fn match_channels(maps: &[CentroidMap; NCHANNELS], params: &MatchParams) -> MatchResult {
    let indexes: Vec<ChannelIndex> = maps
        .iter()
        .map(|centroids| ChannelIndex::new(centroids, &params.weights))
        .collect();

    for (c, centroids) in maps.iter().enumerate() {
        if centroids.is_empty() {
            warn!("Channel {} has no objects, nothing can be matched", c);
        }
    }

    let mut retained: [CentroidMap; NCHANNELS] = Default::default();
    let mut matches = Vec::new();

    for source in 0..NCHANNELS {
        let others: Vec<usize> = (0..NCHANNELS).filter(|&c| c != source).collect();

        let candidates: Vec<(u32, [f32; 3])> = maps[source].iter().map(|(&l, &c)| (l, c)).collect();
        let found: Vec<Option<[u32; NCHANNELS]>> = candidates
            .par_iter()
            .map(|(label, c)| {
                let point = weighted(c, &params.weights);
                let mut labels = [BACKGROUND; NCHANNELS];
                labels[source] = *label;
                for &other in others.iter() {
                    labels[other] = indexes[other].nearest_within(&point, params.distance_threshold)?;
                }
                Some(labels)
            })
            .collect();

        for ((label, c), labels) in candidates.iter().zip(found) {
            let labels = match labels {
                Some(labels) => labels,
                None => continue,
            };

            retained[source].insert(*label, *c);
            for &other in others.iter() {
                retained[other].insert(labels[other], maps[other][&labels[other]]);
            }

            matches.push(ChannelMatch {
                source,
                labels,
                mutual: false,
            });
        }
    }

    let claimed: HashMap<(usize, u32), [u32; NCHANNELS]> = matches
        .iter()
        .map(|m| ((m.source, m.labels[m.source]), m.labels))
        .collect();

    for m in matches.iter_mut() {
        m.mutual = (0..NCHANNELS)
            .all(|c| claimed.get(&(c, m.labels[c])).map_or(false, |labels| *labels == m.labels));
    }

    info!(
        "Matched channels: {} / {} / {} objects retained, {} of {} matches mutual",
        retained[0].len(),
        retained[1].len(),
        retained[2].len(),
        matches.iter().filter(|m| m.mutual).count(),
        matches.len()
    );

    return MatchResult { retained, matches };
}

/// Mean displacement (z, y, x) from channel `from` to channel `to` over the
/// matches made from `from`.
pub fn mean_shift(
    maps: &[CentroidMap; NCHANNELS],
    result: &MatchResult,
    from: usize,
    to: usize,
) -> Option<[f32; 3]> {
    let mut total = [0.0_f64; 3];
    let mut n = 0;
    for m in result.matches.iter().filter(|m| m.source == from) {
        let a = maps[from][&m.labels[from]];
        let b = maps[to][&m.labels[to]];
        for (t, &ak, &bk) in izip!(total.iter_mut(), a.iter(), b.iter()) {
            *t += (bk - ak) as f64;
        }
        n += 1;
    }

    if n == 0 {
        return None;
    }

    return Some([
        (total[0] / n as f64) as f32,
        (total[1] / n as f64) as f32,
        (total[2] / n as f64) as f32,
    ]);
}

/// Zero every label not present in `keep`.
pub fn filter_labels(labels: &Array3<u32>, keep: &CentroidMap) -> Array3<u32> {
    return labels.mapv(|l| if keep.contains_key(&l) { l } else { BACKGROUND });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(points: &[(u32, [f32; 3])]) -> CentroidMap {
        return points.iter().cloned().collect();
    }

    #[test]
    fn test_coincident_centroids_all_retained() {
        let maps = [
            map(&[(1, [0.5, 0.5, 0.5])]),
            map(&[(4, [0.5, 0.5, 0.5])]),
            map(&[(9, [0.5, 0.5, 0.5])]),
        ];

        let result = match_channels(&maps, &MatchParams::default());
        for c in 0..NCHANNELS {
            assert_eq!(result.retained[c], maps[c]);
        }
        assert_eq!(result.matches.len(), 3);
        for m in result.matches.iter() {
            assert_eq!(m.labels, [1, 4, 9]);
            assert!(m.mutual);
        }
    }

    #[test]
    fn test_missing_counterpart_drops_object() {
        let maps = [
            map(&[(1, [0.2, 0.2, 0.2]), (2, [0.8, 0.8, 0.8])]),
            map(&[(1, [0.21, 0.2, 0.2]), (2, [0.8, 0.79, 0.8])]),
            map(&[(1, [0.2, 0.2, 0.19])]),
        ];

        let result = match_channels(&maps, &MatchParams::default());
        for c in 0..NCHANNELS {
            assert_eq!(result.retained[c].keys().cloned().collect::<Vec<_>>(), vec![1]);
        }
        assert!(result.matches.iter().all(|m| m.labels == [1, 1, 1] && m.mutual));
    }

    #[test]
    fn test_weights_scale_axes() {
        // far apart in z only
        let maps = [
            map(&[(1, [0.1, 0.5, 0.5])]),
            map(&[(1, [0.5, 0.5, 0.5])]),
            map(&[(1, [0.3, 0.5, 0.5])]),
        ];

        let unweighted = match_channels(&maps, &MatchParams::default());
        assert!(unweighted.matches.is_empty());

        let params = MatchParams {
            distance_threshold: 0.1,
            weights: [0.2, 1.0, 1.0],
        };
        let weighted = match_channels(&maps, &params);
        assert_eq!(weighted.matches.len(), 3);
        // retained centroids keep their unweighted coordinates
        assert_eq!(weighted.retained[1][&1], [0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_competing_claims_not_mutual() {
        // two objects in channel 0 both nearest to the single object of
        // channels 1 and 2
        let maps = [
            map(&[(1, [0.50, 0.5, 0.5]), (2, [0.55, 0.5, 0.5])]),
            map(&[(7, [0.51, 0.5, 0.5])]),
            map(&[(8, [0.50, 0.5, 0.5])]),
        ];

        let result = match_channels(&maps, &MatchParams::default());
        assert_eq!(result.retained[0].len(), 2);

        let from0: Vec<&ChannelMatch> = result.matches.iter().filter(|m| m.source == 0).collect();
        assert_eq!(from0.len(), 2);
        let winner = from0.iter().find(|m| m.labels[0] == 1).unwrap();
        let loser = from0.iter().find(|m| m.labels[0] == 2).unwrap();
        assert!(winner.mutual);
        assert!(!loser.mutual);
    }

    #[test]
    fn test_many_objects_on_one_slice() {
        // all objects share normalized z, as single-slice objects do
        let grid: Vec<[f32; 3]> = (0..48)
            .map(|i| [0.3, 0.1 + 0.1 * (i / 8) as f32, 0.1 + 0.1 * (i % 8) as f32])
            .collect();
        let channel = |offset: f32| -> CentroidMap {
            grid.iter()
                .enumerate()
                .map(|(i, c)| (i as u32 + 1, [c[0], c[1] + offset, c[2]]))
                .collect()
        };
        let maps = [channel(0.0), channel(0.01), channel(-0.01)];

        let result = match_channels(&maps, &MatchParams::default());
        for c in 0..NCHANNELS {
            assert_eq!(result.retained[c].len(), 48);
        }
        assert_eq!(result.matches.len(), 3 * 48);
        assert!(result.matches.iter().all(|m| m.mutual && m.labels[1] == m.labels[0]));

        // zero z weight collapses every point onto one plane
        let params = MatchParams {
            distance_threshold: 0.1,
            weights: [0.0, 1.0, 1.0],
        };
        let flat = match_channels(&maps, &params);
        assert_eq!(flat.matches.len(), 3 * 48);
    }

    #[test]
    fn test_empty_channel_matches_nothing() {
        let maps = [map(&[(1, [0.5, 0.5, 0.5])]), map(&[(1, [0.5, 0.5, 0.5])]), CentroidMap::new()];
        let result = match_channels(&maps, &MatchParams::default());
        assert!(result.matches.is_empty());
        assert!(result.retained.iter().all(|r| r.is_empty()));
    }

    #[test]
    fn test_mean_shift() {
        let maps = [
            map(&[(1, [0.1, 0.1, 0.1]), (2, [0.5, 0.5, 0.5])]),
            map(&[(1, [0.12, 0.1, 0.14]), (2, [0.52, 0.5, 0.54])]),
            map(&[(1, [0.1, 0.1, 0.1]), (2, [0.5, 0.5, 0.5])]),
        ];
        let result = match_channels(&maps, &MatchParams::default());
        let shift = mean_shift(&maps, &result, 0, 1).unwrap();
        assert!((shift[0] - 0.02).abs() < 1e-5);
        assert!(shift[1].abs() < 1e-6);
        assert!((shift[2] - 0.04).abs() < 1e-5);
    }

    #[test]
    fn test_filter_labels() {
        let labels = Array3::from_shape_vec((1, 2, 2), vec![0, 1, 2, 3]).unwrap();
        let keep = map(&[(1, [0.0; 3]), (3, [0.0; 3])]);
        let filtered = filter_labels(&labels, &keep);
        assert_eq!(filtered.iter().cloned().collect::<Vec<_>>(), vec![0, 1, 0, 3]);
    }
}
