use nalgebra::{Matrix3, Vector3};

/// Continuous-time IMU noise densities, discretized per pre-integration
/// step (spec §4.1 "standard midpoint IMU noise model").
///
/// Defaults are typical MEMS-grade values, the same order of magnitude used
/// throughout this workspace's tracking/estimation code for synthetic-data
/// tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuNoiseModel {
    pub acc_noise: f64,
    pub gyro_noise: f64,
    pub acc_bias_walk: f64,
    pub gyro_bias_walk: f64,
}

impl Default for ImuNoiseModel {
    fn default() -> Self {
        ImuNoiseModel {
            acc_noise: 0.08,
            gyro_noise: 0.004,
            acc_bias_walk: 4.0e-5,
            gyro_bias_walk: 2.0e-6,
        }
    }
}

impl ImuNoiseModel {
    pub fn acc_cov(&self) -> Matrix3<f64> {
        Matrix3::identity() * (self.acc_noise * self.acc_noise)
    }

    pub fn gyro_cov(&self) -> Matrix3<f64> {
        Matrix3::identity() * (self.gyro_noise * self.gyro_noise)
    }

    pub fn acc_bias_cov(&self) -> Matrix3<f64> {
        Matrix3::identity() * (self.acc_bias_walk * self.acc_bias_walk)
    }

    pub fn gyro_bias_cov(&self) -> Matrix3<f64> {
        Matrix3::identity() * (self.gyro_bias_walk * self.gyro_bias_walk)
    }
}

pub fn skew(v: Vector3<f64>) -> Matrix3<f64> {
    #[rustfmt::skip]
    let m = Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    );
    m
}
