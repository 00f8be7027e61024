//! Central PnP: 3D anchor points and 2D bearings observed by a single
//! camera, recovering that camera's pose in world frame and then the body
//! pose via the extrinsic inverse (spec §4.4).

use nalgebra::Vector3;
use swarmvio_geom::Pose;

use crate::dlt::solve_dlt_pose;
use crate::ransac::{run_ransac, PnpResult, RansacObservation, RansacParams};
use crate::refine::{refine_pose, RefineObservation};

#[derive(Clone, Copy)]
pub struct CentralObservation {
    pub world_point: Vector3<f64>,
    pub bearing: Vector3<f64>,
}

impl RansacObservation for CentralObservation {
    fn world_point(&self) -> Vector3<f64> {
        self.world_point
    }

    fn observed_bearing(&self) -> Vector3<f64> {
        self.bearing
    }

    fn predict_bearing(&self, hypothesis: &Pose) -> Vector3<f64> {
        hypothesis.inverse().transform_point(&self.world_point).normalize()
    }
}

/// Solves central PnP with RANSAC, then refines the inlier-set pose
/// non-linearly. `focal_length` drives the inlier threshold (`5 /
/// focal_length` radians, spec §4.4); `min_inliers` is `loop_inlier_feature_num`.
pub fn solve_central_pnp(
    observations: &[CentralObservation],
    camera_extrinsic: &Pose,
    focal_length: f64,
    min_inliers: usize,
    seed: u64,
) -> PnpResult {
    let params = RansacParams {
        iterations: 100,
        inlier_angular_threshold: 5.0 / focal_length,
        min_inliers,
        confidence: Some(0.99),
        seed,
    };

    let result = run_ransac(observations, 6, &params, |sample| {
        let pts: Vec<Vector3<f64>> = sample.iter().map(|&i| observations[i].world_point).collect();
        let bearings: Vec<Vector3<f64>> = sample.iter().map(|&i| observations[i].bearing).collect();
        solve_dlt_pose(&pts, &bearings)
    });

    match result {
        PnpResult::Solved { pose, inlier_indices } => {
            let refine_obs: Vec<RefineObservation> = inlier_indices
                .iter()
                .map(|&i| RefineObservation {
                    world_point: observations[i].world_point,
                    camera_extrinsic: Pose::identity(),
                    observed_bearing: observations[i].bearing,
                })
                .collect();
            let refined_camera_pose = refine_pose(&pose, &refine_obs);
            let body_pose = refined_camera_pose.compose(&camera_extrinsic.inverse());
            PnpResult::Solved {
                pose: body_pose,
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

    fn synthetic(n: usize, true_camera_pose: &Pose) -> Vec<CentralObservation> {
        (0..n)
            .map(|i| {
                let angle = i as f64 * 0.37;
                let p_cam = Vector3::new(angle.sin() * 0.6, angle.cos() * 0.4, 4.0 + (i % 5) as f64 * 0.3);
                let world_point = true_camera_pose.transform_point(&p_cam);
                let bearing = p_cam.normalize();
                CentralObservation { world_point, bearing }
            })
            .collect()
    }

    #[test]
    fn solves_camera_pose_from_synthetic_correspondences() {
        let true_camera_pose = Pose::from_isometry(nalgebra::Isometry3::from_parts(
            Translation3::new(0.2, -0.1, 0.0),
            UnitQuaternion::from_euler_angles(0.02, -0.01, 0.3),
        ));
        let obs = synthetic(30, &true_camera_pose);

        let result = solve_central_pnp(&obs, &Pose::identity(), 250.0, 10, 7);
        match result {
            PnpResult::Solved { pose, inlier_indices } => {
                assert!(inlier_indices.len() >= 10);
                assert_relative_eq!(pose.translation(), true_camera_pose.translation(), epsilon = 0.05);
            }
            other => panic!("expected Solved, got {other:?}"),
        }
    }

    #[test]
    fn too_few_points_is_not_attempted() {
        let obs = vec![
            CentralObservation {
                world_point: Vector3::new(0.0, 0.0, 5.0),
                bearing: Vector3::new(0.0, 0.0, 1.0),
            };
            3
        ];
        let result = solve_central_pnp(&obs, &Pose::identity(), 250.0, 8, 1);
        assert!(matches!(result, PnpResult::NotAttempted));
    }
}
