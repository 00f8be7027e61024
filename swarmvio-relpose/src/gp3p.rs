//! Non-central generalized PnP (GP3P): bearings observed by several
//! rigidly-linked cameras with known body-frame extrinsics, recovering a
//! single body pose (spec §4.4).
//!
//! True GP3P minimal solvers work directly with Plücker lines through each
//! camera's (possibly offset) optical center. Here the minimal-sample
//! hypothesis is instead seeded from whichever single camera contributed
//! the most correspondences in the sample (solved as ordinary central PnP,
//! then composed with that camera's extrinsic inverse into a body pose);
//! RANSAC scoring and the final refinement both use the *exact* per-camera
//! projection geometry, so the offset between camera centers is never
//! approximated away for anything but hypothesis generation.

use std::collections::HashMap;

use nalgebra::Vector3;
use swarmvio_geom::Pose;

use crate::dlt::solve_dlt_pose;
use crate::ransac::{run_ransac, PnpResult, RansacObservation, RansacParams};
use crate::refine::{refine_pose, RefineObservation};

#[derive(Clone)]
pub struct Gp3pObservation {
    pub camera_id: u8,
    pub camera_extrinsic: Pose,
    pub world_point: Vector3<f64>,
    pub bearing: Vector3<f64>,
}

impl RansacObservation for Gp3pObservation {
    fn world_point(&self) -> Vector3<f64> {
        self.world_point
    }

    fn observed_bearing(&self) -> Vector3<f64> {
        self.bearing
    }

    fn predict_bearing(&self, hypothesis: &Pose) -> Vector3<f64> {
        let camera_pose = hypothesis.compose(&self.camera_extrinsic);
        camera_pose.inverse().transform_point(&self.world_point).normalize()
    }
}

fn richest_camera(sample: &[usize], observations: &[Gp3pObservation]) -> u8 {
    let mut counts: HashMap<u8, usize> = HashMap::new();
    for &i in sample {
        *counts.entry(observations[i].camera_id).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(camera_id, _)| camera_id)
        .unwrap_or(0)
}

fn hypothesize_body_pose(sample: &[usize], observations: &[Gp3pObservation]) -> Option<Pose> {
    let camera_id = richest_camera(sample, observations);
    let members: Vec<usize> = sample
        .iter()
        .copied()
        .filter(|&i| observations[i].camera_id == camera_id)
        .collect();
    if members.len() < 6 {
        return None;
    }
    let pts: Vec<Vector3<f64>> = members.iter().map(|&i| observations[i].world_point).collect();
    let bearings: Vec<Vector3<f64>> = members.iter().map(|&i| observations[i].bearing).collect();
    let camera_pose = solve_dlt_pose(&pts, &bearings)?;
    let extrinsic = observations[members[0]].camera_extrinsic;
    Some(camera_pose.compose(&extrinsic.inverse()))
}

/// Solves non-central GP3P with RANSAC, then refines on the inlier set
/// using each observation's real camera extrinsic. `focal_length` drives
/// the inlier threshold (`1 / focal_length` radians, spec §4.4, tighter
/// than central PnP's `5 / focal_length`); 50 iterations.
pub fn solve_gp3p(observations: &[Gp3pObservation], focal_length: f64, min_inliers: usize, seed: u64) -> PnpResult {
    let params = RansacParams {
        iterations: 50,
        inlier_angular_threshold: 1.0 / focal_length,
        min_inliers,
        confidence: Some(0.99),
        seed,
    };

    // Minimal sample must be large enough that, after grouping by camera,
    // at least one camera is likely to carry the 6 points the DLT seed
    // needs; 12 balances that against RANSAC's combinatorial cost.
    let result = run_ransac(observations, 12, &params, |sample| hypothesize_body_pose(sample, observations));

    match result {
        PnpResult::Solved { pose, inlier_indices } => {
            let refine_obs: Vec<RefineObservation> = inlier_indices
                .iter()
                .map(|&i| RefineObservation {
                    world_point: observations[i].world_point,
                    camera_extrinsic: observations[i].camera_extrinsic,
                    observed_bearing: observations[i].bearing,
                })
                .collect();
            let refined = refine_pose(&pose, &refine_obs);
            PnpResult::Solved {
                pose: refined,
                inlier_indices,
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Translation3, UnitQuaternion};

    fn synthetic(true_body_pose: &Pose, extrinsics: &[Pose]) -> Vec<Gp3pObservation> {
        let mut obs = Vec::new();
        for (cam_id, extrinsic) in extrinsics.iter().enumerate() {
            let camera_pose = true_body_pose.compose(extrinsic);
            for i in 0..20 {
                let angle = i as f64 * 0.41 + cam_id as f64;
                let p_cam = Vector3::new(angle.sin() * 0.5, angle.cos() * 0.3, 3.5 + (i % 4) as f64 * 0.4);
                let world_point = camera_pose.transform_point(&p_cam);
                obs.push(Gp3pObservation {
                    camera_id: cam_id as u8,
                    camera_extrinsic: *extrinsic,
                    world_point,
                    bearing: p_cam.normalize(),
                });
            }
        }
        obs
    }

    #[test]
    fn solves_body_pose_from_two_rigidly_linked_cameras() {
        let true_body_pose = Pose::from_isometry(nalgebra::Isometry3::from_parts(
            Translation3::new(0.1, 0.2, 0.0),
            UnitQuaternion::from_euler_angles(0.0, 0.0, 0.15),
        ));
        let left_extrinsic = Pose::identity();
        let right_extrinsic = Pose::from_rotation_translation(UnitQuaternion::identity(), Vector3::new(0.1, 0.0, 0.0));
        let obs = synthetic(&true_body_pose, &[left_extrinsic, right_extrinsic]);

        let result = solve_gp3p(&obs, 250.0, 15, 11);
        match result {
            PnpResult::Solved { pose, inlier_indices } => {
                assert!(inlier_indices.len() >= 15);
                assert_relative_eq!(pose.translation(), true_body_pose.translation(), epsilon = 0.05);
            }
            other => panic!("expected Solved, got {other:?}"),
        }
    }
}
