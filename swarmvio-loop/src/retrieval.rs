//! Top-K keyframe retrieval by global-descriptor similarity within a
//! time/spatial gate (spec §4.5 step 1).

use swarmvio_types::VisualImageDescArray;

use crate::database::KeyframeDatabase;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    pub top_k: usize,
    /// Candidates within this many seconds of the query are the same
    /// continuous track, not a loop, and are excluded.
    pub min_time_gap: f64,
    /// Candidates further than this from the query's own pose estimate are
    /// outside the spatial gate.
    pub max_spatial_dist: f64,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        RetrievalParams {
            top_k: 5,
            min_time_gap: 2.0,
            max_spatial_dist: 10.0,
        }
    }
}

fn combined_descriptor(desc: &VisualImageDescArray) -> Vec<f32> {
    desc.cameras.iter().flat_map(|c| c.global_descriptor.iter().copied()).collect()
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return f32::INFINITY;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

/// Up to `params.top_k` past keyframes, nearest-descriptor-first, that
/// pass the time and spatial gates.
pub fn retrieve_candidates<'a>(
    db: &'a KeyframeDatabase,
    query: &VisualImageDescArray,
    params: &RetrievalParams,
) -> Vec<&'a VisualImageDescArray> {
    let query_desc = combined_descriptor(query);
    let query_pos = query.pose_drone.translation();

    let mut scored: Vec<(f32, &VisualImageDescArray)> = db
        .iter()
        .filter(|cand| !(cand.drone_id == query.drone_id && cand.frame_id == query.frame_id))
        .filter(|cand| (query.stamp - cand.stamp).abs() >= params.min_time_gap)
        .filter(|cand| (cand.pose_drone.translation() - query_pos).norm() <= params.max_spatial_dist)
        .map(|cand| (l2_distance(&query_desc, &combined_descriptor(cand)), cand))
        .filter(|(d, _)| d.is_finite())
        .collect();

    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(params.top_k);
    scored.into_iter().map(|(_, cand)| cand).collect()
}
