//! Per-camera descriptor KNN matching with a Lowe-ratio test, plus the
//! intra-frame local-distance gate (spec §4.5 step 2). The gate's
//! intra-frame-only scope follows `original_source/d2frontend/loop_utils.cpp`:
//! it is applied only to left-right matches within one stereo frame, never
//! to matches across frames.
//!
//! The broadcastable keyframe descriptor carries one bearing per tracked
//! point rather than a learned local descriptor (`CameraImageDesc` is a
//! compact wire format); bearing-angle distance plays the role the local
//! descriptor plays in the original, and the pixel-distance gate is
//! approximated from angular separation through the shared focal length.

use swarmvio_types::LandmarkObservation;

#[derive(Debug, Clone, Copy)]
pub struct MatchedLandmark {
    pub query_index: usize,
    pub candidate_index: usize,
}

fn bearing_distance(a: &LandmarkObservation, b: &LandmarkObservation) -> f64 {
    1.0 - a.bearing.dot(&b.bearing).clamp(-1.0, 1.0)
}

/// Matches each `query` observation to its nearest `candidate` observation
/// by bearing-angle distance, keeping only matches that pass Lowe's ratio
/// test against the second-nearest candidate.
pub fn knn_match_camera(query: &[LandmarkObservation], candidate: &[LandmarkObservation], ratio: f64) -> Vec<MatchedLandmark> {
    let mut matches = Vec::new();
    if candidate.is_empty() {
        return matches;
    }
    for (qi, q) in query.iter().enumerate() {
        let mut best = (usize::MAX, f64::INFINITY);
        let mut second = f64::INFINITY;
        for (ci, c) in candidate.iter().enumerate() {
            let d = bearing_distance(q, c);
            if d < best.1 {
                second = best.1;
                best = (ci, d);
            } else if d < second {
                second = d;
            }
        }
        if best.0 == usize::MAX {
            continue;
        }
        if !second.is_finite() || best.1 < ratio * second {
            matches.push(MatchedLandmark {
                query_index: qi,
                candidate_index: best.0,
            });
        }
    }
    matches
}

/// Approximate pixel distance between two bearings through a shared focal
/// length, for the intra-frame gate.
pub fn local_distance_gate(a: &LandmarkObservation, b: &LandmarkObservation, focal_length: f64, max_pixel_dist: f64) -> bool {
    let angle = a.bearing.dot(&b.bearing).clamp(-1.0, 1.0).acos();
    angle * focal_length <= max_pixel_dist
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Vector2, Vector3};
    use swarmvio_types::FrameId;

    fn obs(bearing: Vector3<f64>) -> LandmarkObservation {
        LandmarkObservation {
            frame_id: FrameId(0),
            camera_id: 0,
            bearing: bearing.normalize(),
            pixel_velocity: Vector2::zeros(),
            td_at_observation: 0.0,
            depth: None,
        }
    }

    #[test]
    fn matches_nearest_bearing_and_rejects_ambiguous_ones() {
        let query = vec![obs(Vector3::new(0.0, 0.0, 1.0))];
        let candidate = vec![
            obs(Vector3::new(0.001, 0.0, 1.0)),
            obs(Vector3::new(0.5, 0.0, 1.0)),
        ];
        let matches = knn_match_camera(&query, &candidate, 0.8);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].candidate_index, 0);
    }

    #[test]
    fn rejects_when_two_candidates_are_equally_close() {
        let query = vec![obs(Vector3::new(0.0, 0.0, 1.0))];
        let candidate = vec![
            obs(Vector3::new(0.2, 0.0, 1.0)),
            obs(Vector3::new(-0.2, 0.0, 1.0)),
        ];
        let matches = knn_match_camera(&query, &candidate, 0.8);
        assert!(matches.is_empty());
    }

    #[test]
    fn local_distance_gate_rejects_far_apart_bearings() {
        let a = obs(Vector3::new(0.0, 0.0, 1.0));
        let b = obs(Vector3::new(0.5, 0.0, 1.0));
        assert!(!local_distance_gate(&a, &b, 250.0, 30.0));
        let c = obs(Vector3::new(0.01, 0.0, 1.0));
        assert!(local_distance_gate(&a, &c, 250.0, 30.0));
    }
}
