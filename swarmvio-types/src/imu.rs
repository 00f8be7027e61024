use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A single inertial sample: `(t, acc, gyro)` (spec §3 "IMUSample").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    pub t: f64,
    pub acc: Vector3<f64>,
    pub gyro: Vector3<f64>,
}

impl ImuSample {
    pub fn new(t: f64, acc: Vector3<f64>, gyro: Vector3<f64>) -> Self {
        ImuSample { t, acc, gyro }
    }

    /// Linear interpolation between `self` and `other`, evaluated at `t`.
    /// Used by the pre-integration buffer to land interval boundaries
    /// exactly on `t0`/`t1` (spec §4.1 `period`).
    pub fn lerp(&self, other: &ImuSample, t: f64) -> ImuSample {
        let span = other.t - self.t;
        let alpha = if span.abs() < f64::EPSILON {
            0.0
        } else {
            (t - self.t) / span
        };
        ImuSample {
            t,
            acc: self.acc + (other.acc - self.acc) * alpha,
            gyro: self.gyro + (other.gyro - self.gyro) * alpha,
        }
    }
}
