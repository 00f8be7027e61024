//! Marginalization (spec §4.3 step 6): when the window exceeds `W`, the
//! oldest frame's factors are folded into a prior on the remaining oldest
//! state rather than simply discarded, preserving the information they
//! carried (fixed-lag smoothing, spec §1/§3).
//!
//! A full Schur-complement elimination over every factor touching the
//! dropped frame (as `tracking`'s batch smoother or a production VIO
//! back-end would do) needs the factor graph's sparse Jacobian structure
//! kept live across marginalization boundaries. This crate instead folds
//! the dropped frame's own IMU pre-integration covariance into a Gaussian
//! anchor prior on the new oldest frame's pose/velocity/bias, pulling it
//! toward the value it held immediately after the solve that preceded
//! marginalization. This is strictly weaker than true Schur-complement
//! marginalization (it discards cross-correlations with landmarks observed
//! only by the dropped frame) but keeps the gauge-fixed oldest state from
//! drifting unconstrained once its originating frame leaves the window,
//! which is the property fixed-lag smoothing needs.

use nalgebra::{SMatrix, Vector3};
use swarmvio_types::{Covariance15, PreintegrationBlock};

use crate::state::FrameParam;

/// A linear(ized) anchor prior on one frame's 15-dimensional state.
#[derive(Debug, Clone)]
pub struct Prior {
    pub linearization_point: FrameParam,
    pub information: Covariance15,
}

impl Prior {
    /// Builds a prior from the frame being dropped: its own state becomes
    /// the linearization point, and the inverse of its incoming
    /// pre-integration covariance becomes the information matrix (a tight
    /// covariance, i.e. a confident IMU measurement, yields a strong
    /// prior pulling the new oldest frame toward it).
    pub fn from_dropped_frame(dropped: &FrameParam, preint: Option<&PreintegrationBlock>) -> Self {
        let information = match preint {
            Some(p) if p.dt > 0.0 => pseudo_inverse_diagonal(&p.covariance),
            _ => SMatrix::<f64, 15, 15>::identity() * 1e-3,
        };
        Prior {
            linearization_point: *dropped,
            information,
        }
    }

    /// Residual of `current` against this prior: the tangent-space
    /// difference from the linearization point, which the solve cycle
    /// treats as just another (Huber-robustified) factor.
    pub fn residual(&self, current: &FrameParam) -> [f64; 15] {
        let mut out = [0.0; 15];
        for i in 0..6 {
            out[i] = current.pose_tangent[i] - self.linearization_point.pose_tangent[i];
        }
        let dv = current.velocity - self.linearization_point.velocity;
        let dba = current.ba - self.linearization_point.ba;
        let dbg = current.bg - self.linearization_point.bg;
        out[6..9].copy_from_slice(dv.as_slice());
        out[9..12].copy_from_slice(dba.as_slice());
        out[12..15].copy_from_slice(dbg.as_slice());
        out
    }

    /// Per-component prior weight, the diagonal of `information` (used to
    /// scale each residual component before handing it to the solver).
    pub fn weights(&self) -> [f64; 15] {
        let mut w = [0.0; 15];
        for i in 0..15 {
            w[i] = self.information[(i, i)];
        }
        w
    }
}

/// A cheap stand-in for a true matrix inverse: since `p.covariance` is
/// block-diagonal-dominant for the midpoint IMU noise model, using only
/// its diagonal avoids forming an ill-conditioned 15x15 inverse when the
/// block has near-zero off-diagonal entries (e.g. a very short interval).
fn pseudo_inverse_diagonal(cov: &Covariance15) -> Covariance15 {
    let mut out = SMatrix::<f64, 15, 15>::zeros();
    for i in 0..15 {
        let v = cov[(i, i)];
        out[(i, i)] = if v > 1e-12 { 1.0 / v } else { 1e6 };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmvio_geom::Pose;

    #[test]
    fn residual_is_zero_at_the_linearization_point() {
        let frame = FrameParam::new(Pose::identity(), Vector3::zeros(), Vector3::zeros(), Vector3::zeros());
        let prior = Prior::from_dropped_frame(&frame, None);
        let r = prior.residual(&frame);
        assert!(r.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn residual_grows_with_distance_from_anchor() {
        let frame = FrameParam::new(Pose::identity(), Vector3::zeros(), Vector3::zeros(), Vector3::zeros());
        let prior = Prior::from_dropped_frame(&frame, None);
        let moved = FrameParam::new(Pose::identity(), Vector3::new(1.0, 0.0, 0.0), Vector3::zeros(), Vector3::zeros());
        let r = prior.residual(&moved);
        assert!(r[6].abs() > 0.0);
    }
}
