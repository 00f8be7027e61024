//! Two-view triangulation and reprojection-based outlier rejection (spec
//! §3 "Landmarks are created on first successful track observation,
//! initialized on triangulation (second view)", §4.3 step 3).

use nalgebra::Vector3;
use swarmvio_geom::Pose;
use swarmvio_types::{Landmark, LandmarkFlag};

/// Midpoint triangulation of two bearing rays. `pose_a`/`pose_b` are the
/// two observing cameras' poses in world frame; `bearing_a`/`bearing_b`
/// are unit bearings in each camera's own frame. Returns the world point
/// closest (in a least-squares sense) to both rays, or `None` if the rays
/// are nearly parallel (degenerate baseline).
pub fn triangulate_midpoint(pose_a: &Pose, bearing_a: Vector3<f64>, pose_b: &Pose, bearing_b: Vector3<f64>) -> Option<Vector3<f64>> {
    let o_a = pose_a.translation();
    let o_b = pose_b.translation();
    let d_a = pose_a.transform_vector(&bearing_a).normalize();
    let d_b = pose_b.transform_vector(&bearing_b).normalize();

    let w0 = o_a - o_b;
    let a = d_a.dot(&d_a);
    let b = d_a.dot(&d_b);
    let c = d_b.dot(&d_b);
    let d = d_a.dot(&w0);
    let e = d_b.dot(&w0);
    let denom = a * c - b * b;
    if denom.abs() < 1e-9 {
        return None;
    }
    let s = (b * e - c * d) / denom;
    let t = (a * e - b * d) / denom;
    if s <= 0.0 || t <= 0.0 {
        return None;
    }

    let point_on_a = o_a + d_a * s;
    let point_on_b = o_b + d_b * t;
    Some((point_on_a + point_on_b) * 0.5)
}

/// Attempts to triangulate a landmark that has at least two observations
/// but is still `Uninitialized`/`Triangulated`, using its anchor and most
/// recent observation. `pose_of` resolves a frame id plus camera id to
/// that camera's world pose (body pose composed with extrinsic); returns
/// `false` without mutating `landmark` if poses are unavailable or the
/// rays are degenerate.
pub fn try_initialize_landmark(landmark: &mut Landmark, pose_of: impl Fn(swarmvio_types::FrameId, u8) -> Option<Pose>) -> bool {
    if landmark.track.len() < 2 {
        return false;
    }
    let anchor = *landmark.anchor();
    let latest = *landmark.track.last().expect("checked len >= 2 above");

    let (Some(pose_a), Some(pose_b)) = (pose_of(anchor.frame_id, anchor.camera_id), pose_of(latest.frame_id, latest.camera_id)) else {
        return false;
    };

    let Some(world_point) = triangulate_midpoint(&pose_a, anchor.bearing, &pose_b, latest.bearing) else {
        return false;
    };

    let depth_in_anchor = pose_a.inverse().transform_point(&world_point).z;
    if depth_in_anchor <= 0.0 {
        return false;
    }

    landmark.position = world_point;
    landmark.inverse_depth = 1.0 / depth_in_anchor;
    landmark.flag = LandmarkFlag::Triangulated;
    true
}

/// Marks a landmark an outlier if its current reprojection residual
/// (already-computed pixel or tangent-plane error norm) exceeds
/// `threshold` (spec §3 "marked OUTLIER on high reprojection residual").
pub fn mark_if_outlier(landmark: &mut Landmark, reprojection_residual_norm: f64, threshold: f64) -> bool {
    if reprojection_residual_norm > threshold {
        landmark.flag = LandmarkFlag::Outlier;
        true
    } else {
        false
    }
}

/// Promotes a `Triangulated` landmark to `Initialized` once it has
/// accumulated a minimum track length (spec §8 invariant 2).
pub fn promote_if_ready(landmark: &mut Landmark, min_track_len: usize) {
    if landmark.flag == LandmarkFlag::Triangulated && landmark.track.len() >= min_track_len {
        landmark.flag = LandmarkFlag::Initialized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;
    use swarmvio_types::{AgentId, FrameId, LandmarkId, LandmarkObservation};

    fn obs(frame: u64, bearing: Vector3<f64>) -> LandmarkObservation {
        LandmarkObservation {
            frame_id: FrameId(frame),
            camera_id: 0,
            bearing,
            pixel_velocity: Vector2::zeros(),
            td_at_observation: 0.0,
            depth: None,
        }
    }

    #[test]
    fn triangulates_a_point_in_front_of_a_stereo_pair() {
        let pose_a = Pose::identity();
        let pose_b = Pose::from_rotation_translation(nalgebra::UnitQuaternion::identity(), Vector3::new(0.2, 0.0, 0.0));
        let true_point = Vector3::new(0.05, 0.02, 5.0);
        let bearing_a = true_point.normalize();
        let bearing_b = (true_point - pose_b.translation()).normalize();

        let point = triangulate_midpoint(&pose_a, bearing_a, &pose_b, bearing_b).expect("should triangulate");
        assert!((point - true_point).norm() < 1e-3);
    }

    #[test]
    fn landmark_initializes_from_two_anchor_observations() {
        let mut lm = Landmark::new(LandmarkId::new(AgentId(0), 0), obs(1, Vector3::new(0.0, 0.0, 1.0)));
        lm.add_observation(obs(2, Vector3::new(0.02, 0.0, 1.0).normalize()));

        let ok = try_initialize_landmark(&mut lm, |frame_id, _cam| {
            if frame_id == FrameId(1) {
                Some(Pose::identity())
            } else {
                Some(Pose::from_rotation_translation(nalgebra::UnitQuaternion::identity(), Vector3::new(0.1, 0.0, 0.0)))
            }
        });
        assert!(ok);
        assert_eq!(lm.flag, LandmarkFlag::Triangulated);
        assert!(lm.inverse_depth > 0.0);
    }
}
