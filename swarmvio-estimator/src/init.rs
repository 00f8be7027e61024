//! Gravity-alignment and bias initialization (spec §4.3 "Initialization"):
//! the first `init_imu_num` samples set initial roll/pitch from gravity,
//! the initial gyro bias from their mean gyro reading, and the initial
//! accel bias from how far the mean accel reading departs from a fixed
//! world-frame gravity vector.

use nalgebra::{UnitQuaternion, Vector3};
use swarmvio_types::ImuSample;

pub struct InitializationResult {
    pub initial_rotation: UnitQuaternion<f64>,
    pub initial_gyro_bias: Vector3<f64>,
    pub initial_accel_bias: Vector3<f64>,
}

const GRAVITY_MAGNITUDE: f64 = 9.81;

/// Consumes `samples` (expected to be at least `init_imu_num` long, the
/// caller's responsibility to gate on per spec §4.3) and derives the
/// initial attitude/bias estimate. Yaw is left at zero: a single
/// stationary IMU cannot observe yaw, only roll/pitch from gravity.
pub fn initialize_from_imu(samples: &[ImuSample]) -> Option<InitializationResult> {
    if samples.is_empty() {
        return None;
    }
    let mean_acc = samples.iter().map(|s| s.acc).sum::<Vector3<f64>>() / samples.len() as f64;
    let mean_gyro = samples.iter().map(|s| s.gyro).sum::<Vector3<f64>>() / samples.len() as f64;

    let g0 = mean_acc.normalize();
    let world_down = Vector3::z();
    let initial_rotation = UnitQuaternion::rotation_between(&g0, &world_down).unwrap_or_else(UnitQuaternion::identity);

    // The accel bias is measured against the fixed nominal gravity vector
    // directly, not against `mean_acc`'s own direction: `g0 * GRAVITY_MAGNITUDE`
    // is by construction a scalar multiple of `mean_acc` and so could never
    // carry a directional (tilt) component of the bias. A fixed reference
    // vector does.
    let gravity_vec = world_down * GRAVITY_MAGNITUDE;
    let initial_accel_bias = mean_acc - gravity_vec;

    Some(InitializationResult {
        initial_rotation,
        initial_gyro_bias: mean_gyro,
        initial_accel_bias,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stationary_imu_yields_small_gyro_bias_equal_to_mean_gyro() {
        let samples: Vec<ImuSample> = (0..50)
            .map(|i| ImuSample::new(i as f64 * 0.01, Vector3::new(0.0, 0.0, GRAVITY_MAGNITUDE), Vector3::new(0.001, -0.002, 0.0005)))
            .collect();
        let result = initialize_from_imu(&samples).unwrap();
        assert!((result.initial_gyro_bias - Vector3::new(0.001, -0.002, 0.0005)).norm() < 1e-9);
        assert!(result.initial_accel_bias.norm() < 1e-6);
    }

    #[test]
    fn tilted_imu_yields_directional_accel_bias() {
        // A constant x-axis accel offset on top of an otherwise level
        // reading: a bias built from `mean_acc`'s own direction could only
        // ever come out as a scalar multiple of `(0.3, 0.0, 9.81)`, never
        // isolating the x-axis component on its own.
        let samples: Vec<ImuSample> = (0..50)
            .map(|i| ImuSample::new(i as f64 * 0.01, Vector3::new(0.3, 0.0, GRAVITY_MAGNITUDE), Vector3::zeros()))
            .collect();
        let result = initialize_from_imu(&samples).unwrap();
        assert!((result.initial_accel_bias - Vector3::new(0.3, 0.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn empty_samples_returns_none() {
        assert!(initialize_from_imu(&[]).is_none());
    }
}
