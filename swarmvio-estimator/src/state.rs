//! The sliding-window parameter store (spec §4.3 "State vector",
//! "Parameter manifolds", C6).
//!
//! Each frame contributes 15 scalars to the optimization (pose tangent-6 +
//! velocity-3 + bias-accel-3 + bias-gyro-3); quaternions are reconstructed
//! from the rotation-vector slice of the tangent on every `set_params`
//! call, giving the right-multiplicative tangent update spec §4.3 asks
//! for (see `swarmvio-geom::Pose::to_tangent6`/`from_tangent6`, and
//! decision #4 in the grounding ledger).

use std::collections::HashMap;

use nalgebra::Vector3;
use swarmvio_geom::Pose;
use swarmvio_types::{FrameId, LandmarkId};

/// Per-frame optimizable state.
#[derive(Debug, Clone, Copy)]
pub struct FrameParam {
    pub pose_tangent: [f64; 6],
    pub velocity: Vector3<f64>,
    pub ba: Vector3<f64>,
    pub bg: Vector3<f64>,
}

impl FrameParam {
    pub fn new(pose: Pose, velocity: Vector3<f64>, ba: Vector3<f64>, bg: Vector3<f64>) -> Self {
        FrameParam {
            pose_tangent: pose.to_tangent6(),
            velocity,
            ba,
            bg,
        }
    }

    pub fn pose(&self) -> Pose {
        Pose::from_tangent6(&self.pose_tangent)
    }

    /// Scalar count this frame contributes to the flat parameter vector.
    pub const DIM: usize = 15;

    fn write_into(&self, out: &mut [f64]) {
        out[0..6].copy_from_slice(&self.pose_tangent);
        out[6..9].copy_from_slice(self.velocity.as_slice());
        out[9..12].copy_from_slice(self.ba.as_slice());
        out[12..15].copy_from_slice(self.bg.as_slice());
    }

    fn read_from(slice: &[f64]) -> Self {
        let mut pose_tangent = [0.0; 6];
        pose_tangent.copy_from_slice(&slice[0..6]);
        FrameParam {
            pose_tangent,
            velocity: Vector3::new(slice[6], slice[7], slice[8]),
            ba: Vector3::new(slice[9], slice[10], slice[11]),
            bg: Vector3::new(slice[12], slice[13], slice[14]),
        }
    }
}

/// Per-camera extrinsic state; held fixed unless
/// `EstimatorConfig::estimate_extrinsic` is set (spec §4.3, §6).
#[derive(Debug, Clone, Copy)]
pub struct ExtrinsicParam {
    pub tangent: [f64; 6],
}

impl ExtrinsicParam {
    pub const DIM: usize = 6;

    pub fn new(pose: Pose) -> Self {
        ExtrinsicParam { tangent: pose.to_tangent6() }
    }

    pub fn pose(&self) -> Pose {
        Pose::from_tangent6(&self.tangent)
    }
}

/// The optimizer's view of the sliding window: per-frame state, per-camera
/// extrinsics, the global time offset, and per-landmark inverse depths.
/// Gauge freedom is fixed by never including the oldest frame's pose and
/// velocity/bias in the flat vector (spec §4.3 step 4, §8 invariant 4).
#[derive(Debug, Clone)]
pub struct WindowState {
    pub frame_ids: Vec<FrameId>,
    pub frames: Vec<FrameParam>,
    pub extrinsics: Vec<ExtrinsicParam>,
    pub estimate_extrinsics: bool,
    pub td: f64,
    pub estimate_td: bool,
    pub landmark_order: Vec<LandmarkId>,
    pub landmark_inv_depth: HashMap<LandmarkId, f64>,
    pub min_inv_dep: f64,
}

impl WindowState {
    pub fn new(extrinsics: Vec<Pose>, estimate_extrinsics: bool, td_initial: f64, estimate_td: bool, min_inv_dep: f64) -> Self {
        WindowState {
            frame_ids: Vec::new(),
            frames: Vec::new(),
            extrinsics: extrinsics.into_iter().map(ExtrinsicParam::new).collect(),
            estimate_extrinsics,
            td: td_initial,
            estimate_td,
            landmark_order: Vec::new(),
            landmark_inv_depth: HashMap::new(),
            min_inv_dep,
        }
    }

    pub fn frame_index(&self, id: FrameId) -> Option<usize> {
        self.frame_ids.iter().position(|&f| f == id)
    }

    pub fn push_frame(&mut self, id: FrameId, param: FrameParam) {
        self.frame_ids.push(id);
        self.frames.push(param);
    }

    /// Drops the oldest (index 0) frame, the first step of marginalization
    /// (spec §4.3 step 6).
    pub fn drop_oldest_frame(&mut self) -> Option<(FrameId, FrameParam)> {
        if self.frames.is_empty() {
            return None;
        }
        let id = self.frame_ids.remove(0);
        let param = self.frames.remove(0);
        Some((id, param))
    }

    pub fn set_landmark(&mut self, id: LandmarkId, inv_depth: f64) {
        if !self.landmark_inv_depth.contains_key(&id) {
            self.landmark_order.push(id);
        }
        self.landmark_inv_depth.insert(id, inv_depth.max(self.min_inv_dep));
    }

    pub fn drop_landmark(&mut self, id: LandmarkId) {
        self.landmark_inv_depth.remove(&id);
        self.landmark_order.retain(|&l| l != id);
    }

    /// Number of optimizable frames, i.e. excluding the gauge-fixed oldest.
    fn movable_frame_count(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    pub fn dim(&self) -> usize {
        self.movable_frame_count() * FrameParam::DIM
            + if self.estimate_extrinsics { self.extrinsics.len() * ExtrinsicParam::DIM } else { 0 }
            + if self.estimate_td { 1 } else { 0 }
            + self.landmark_order.len()
    }

    /// Flattens the movable portion of the state (everything but the
    /// gauge-fixed oldest frame) into a parameter vector for the solver.
    pub fn to_vector(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.dim()];
        let mut offset = 0;
        for frame in self.frames.iter().skip(1) {
            frame.write_into(&mut out[offset..offset + FrameParam::DIM]);
            offset += FrameParam::DIM;
        }
        if self.estimate_extrinsics {
            for ext in &self.extrinsics {
                out[offset..offset + ExtrinsicParam::DIM].copy_from_slice(&ext.tangent);
                offset += ExtrinsicParam::DIM;
            }
        }
        if self.estimate_td {
            out[offset] = self.td;
            offset += 1;
        }
        for id in &self.landmark_order {
            out[offset] = self.landmark_inv_depth[id];
            offset += 1;
        }
        debug_assert_eq!(offset, out.len());
        out
    }

    /// Inverse of [`WindowState::to_vector`].
    pub fn from_vector(&mut self, v: &[f64]) {
        let mut offset = 0;
        let gauge = self.frames.first().copied();
        self.frames.clear();
        if let Some(gauge) = gauge {
            self.frames.push(gauge);
        }
        for _ in 1..self.frame_ids.len() {
            self.frames.push(FrameParam::read_from(&v[offset..offset + FrameParam::DIM]));
            offset += FrameParam::DIM;
        }
        if self.estimate_extrinsics {
            for ext in &mut self.extrinsics {
                let mut tangent = [0.0; 6];
                tangent.copy_from_slice(&v[offset..offset + ExtrinsicParam::DIM]);
                ext.tangent = tangent;
                offset += ExtrinsicParam::DIM;
            }
        }
        if self.estimate_td {
            self.td = v[offset];
            offset += 1;
        }
        for id in self.landmark_order.clone() {
            let inv_dep = v[offset].max(self.min_inv_dep);
            self.landmark_inv_depth.insert(id, inv_dep);
            offset += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use swarmvio_types::AgentId;

    #[test]
    fn round_trips_through_flat_vector() {
        let mut state = WindowState::new(vec![Pose::identity()], false, 0.0, false, 1.0 / 50.0);
        state.push_frame(FrameId(1), FrameParam::new(Pose::identity(), Vector3::zeros(), Vector3::zeros(), Vector3::zeros()));
        state.push_frame(
            FrameId(2),
            FrameParam::new(
                Pose::from_rotation_translation(nalgebra::UnitQuaternion::identity(), Vector3::new(1.0, 0.0, 0.0)),
                Vector3::new(0.1, 0.0, 0.0),
                Vector3::zeros(),
                Vector3::zeros(),
            ),
        );
        state.set_landmark(LandmarkId::new(AgentId(0), 0), 0.2);

        let v = state.to_vector();
        let mut state2 = state.clone();
        // Perturb before restoring, to make sure from_vector actually overwrites.
        state2.frames[1].velocity = Vector3::new(99.0, 0.0, 0.0);
        state2.from_vector(&v);

        assert_relative_eq!(state2.frames[1].velocity, state.frames[1].velocity, epsilon = 1e-12);
        assert_eq!(state2.landmark_inv_depth[&LandmarkId::new(AgentId(0), 0)], 0.2);
    }

    #[test]
    fn gauge_frame_is_excluded_from_dim() {
        let mut state = WindowState::new(vec![], false, 0.0, false, 1.0 / 50.0);
        state.push_frame(FrameId(1), FrameParam::new(Pose::identity(), Vector3::zeros(), Vector3::zeros(), Vector3::zeros()));
        assert_eq!(state.dim(), 0);
        state.push_frame(FrameId(2), FrameParam::new(Pose::identity(), Vector3::zeros(), Vector3::zeros(), Vector3::zeros()));
        assert_eq!(state.dim(), FrameParam::DIM);
    }
}
