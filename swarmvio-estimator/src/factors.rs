//! Residual blocks the sliding-window problem is built from (spec §4.3
//! "Factors"). Every factor is Huber-robustified with δ=1: rather than
//! special-case the nonlinear solver's loss function, each residual is
//! pre-scaled by `sqrt(huber_weight(‖r‖, 1.0))`, the standard IRLS
//! (iteratively-reweighted-least-squares) reduction of a robust loss to a
//! plain sum-of-squares problem — the same trick this crate's own
//! `swarmvio-relpose::refine` and `geometry/bundle-adj` leave to the
//! underlying solver's own robust-loss hooks, except `levenberg_marquardt`
//! here takes a plain L2 problem, so the reduction is applied explicitly.

use nalgebra::{Vector2, Vector3};
use swarmvio_geom::Pose;
use swarmvio_types::PreintegrationBlock;

/// Huber loss weight for a scalar residual norm: `1.0` inside the
/// quadratic region (`‖r‖ <= delta`), shrinking as `sqrt(delta / ‖r‖)`
/// beyond it so the *squared, weighted* residual matches the Huber cost.
pub fn huber_weight(residual_norm: f64, delta: f64) -> f64 {
    if residual_norm <= delta || residual_norm == 0.0 {
        1.0
    } else {
        (delta / residual_norm).sqrt()
    }
}

/// IMU pre-integration factor (spec §4.3 table: connects `pose_a, vb_a,
/// pose_b, vb_b`, residual dim 15): compares the measured pre-integrated
/// `(delta_p, delta_q, delta_v)` against what the two frames' own states
/// imply, plus a bias-random-walk term.
#[allow(clippy::too_many_arguments)]
pub fn imu_residual(
    pose_a: &Pose,
    v_a: Vector3<f64>,
    ba_a: Vector3<f64>,
    bg_a: Vector3<f64>,
    pose_b: &Pose,
    v_b: Vector3<f64>,
    ba_b: Vector3<f64>,
    bg_b: Vector3<f64>,
    preint: &PreintegrationBlock,
    gravity: Vector3<f64>,
) -> [f64; 15] {
    let r_a = pose_a.rotation();
    let dt = preint.dt;

    let predicted_p = r_a.inverse()
        * (pose_b.translation() - pose_a.translation() - v_a * dt + 0.5 * gravity * dt * dt);
    let predicted_v = r_a.inverse() * (v_b - v_a + gravity * dt);
    let predicted_q = r_a.inverse() * pose_b.rotation();

    let dp = predicted_p - preint.delta_p;
    let dv = predicted_v - preint.delta_v;
    let dq = (preint.delta_q.inverse() * predicted_q).scaled_axis();
    let dba = ba_b - ba_a;
    let dbg = bg_b - bg_a;

    let mut out = [0.0; 15];
    out[0..3].copy_from_slice(dp.as_slice());
    out[3..6].copy_from_slice(dq.as_slice());
    out[6..9].copy_from_slice(dv.as_slice());
    out[9..12].copy_from_slice(dba.as_slice());
    out[12..15].copy_from_slice(dbg.as_slice());
    out
}

/// Projection factor (spec §4.3 table, residual dim 2): reprojects the
/// anchor-frame inverse-depth landmark into the observing frame's camera
/// and compares against the observed bearing's tangent-plane coordinates.
/// `with_td` applies the rolling-shutter/time-offset correction via the
/// observation's pixel velocity (spec §3 `td_at_observation`); the
/// "no td" variant used when `estimate_td` is off is just `with_td` called
/// with `td_a == td_b == 0`.
#[allow(clippy::too_many_arguments)]
pub fn projection_residual(
    anchor_pose: &Pose,
    anchor_extrinsic: &Pose,
    obs_pose: &Pose,
    obs_extrinsic: &Pose,
    inverse_depth: f64,
    anchor_bearing: Vector3<f64>,
    anchor_velocity: Vector2<f64>,
    td_anchor_measured: f64,
    observed_bearing: Vector3<f64>,
    observed_velocity: Vector2<f64>,
    td_observed_measured: f64,
    td: f64,
) -> Vector2<f64> {
    let depth = 1.0 / inverse_depth;
    // Correct each bearing for the estimator's current `td` relative to the
    // timestamp it was actually captured at, via the observation's own
    // pixel velocity as a first-order rate (spec §3 `pixel_velocity`).
    let dt_anchor = td - td_anchor_measured;
    let dt_obs = td - td_observed_measured;
    let anchor_bearing = (anchor_bearing + anchor_velocity.push(0.0) * dt_anchor).normalize();
    let observed_bearing = (observed_bearing + observed_velocity.push(0.0) * dt_obs).normalize();

    let point_anchor_cam = anchor_bearing * depth;
    let point_body = anchor_pose.compose(anchor_extrinsic).transform_point(&point_anchor_cam);

    let obs_camera_pose = obs_pose.compose(obs_extrinsic);
    let point_obs_cam = obs_camera_pose.inverse().transform_point(&point_body);
    let predicted_bearing = point_obs_cam.normalize();

    // Tangent-plane (small-angle) residual on S^2 rather than a raw
    // bearing difference, so the residual dimension matches the spec's "2".
    tangent_plane_error(predicted_bearing, observed_bearing)
}

/// Projects the angular difference between two near-parallel unit vectors
/// onto a 2D tangent basis of `reference`.
fn tangent_plane_error(predicted: Vector3<f64>, reference: Vector3<f64>) -> Vector2<f64> {
    let diff = predicted - reference;
    let up = if reference.z.abs() < 0.9 { Vector3::z() } else { Vector3::x() };
    let e1 = reference.cross(&up).normalize();
    let e2 = reference.cross(&e1).normalize();
    Vector2::new(diff.dot(&e1), diff.dot(&e2))
}

/// Depth factor (spec §4.3 table, residual dim 1): pulls the inverse depth
/// toward a direct depth-sensor measurement when `fuse_dep` is enabled.
pub fn depth_residual(inverse_depth: f64, measured_depth: f64) -> f64 {
    inverse_depth - 1.0 / measured_depth
}
