use nalgebra::{SMatrix, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// 15x15 covariance over `(delta_p, delta_q, delta_v, ba, bg)` tangent errors.
pub type Covariance15 = SMatrix<f64, 15, 15>;

/// The result of pre-integrating a run of IMU samples between two frames
/// (spec §4.1 `propagate`, §3 `Frame::pre_integrations`).
///
/// `linearized_ba`/`linearized_bg` record the bias estimate the block was
/// linearized at; a caller observing the bias estimate has since drifted
/// too far re-integrates rather than reusing the stored Jacobians.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreintegrationBlock {
    pub dt: f64,
    pub delta_p: Vector3<f64>,
    pub delta_q: UnitQuaternion<f64>,
    pub delta_v: Vector3<f64>,
    pub linearized_ba: Vector3<f64>,
    pub linearized_bg: Vector3<f64>,
    pub covariance: Covariance15,
}

impl PreintegrationBlock {
    pub fn identity(ba: Vector3<f64>, bg: Vector3<f64>) -> Self {
        PreintegrationBlock {
            dt: 0.0,
            delta_p: Vector3::zeros(),
            delta_q: UnitQuaternion::identity(),
            delta_v: Vector3::zeros(),
            linearized_ba: ba,
            linearized_bg: bg,
            covariance: Covariance15::zeros(),
        }
    }
}
