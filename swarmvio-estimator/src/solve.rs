//! Orchestrates the per-frame solve cycle (spec §4.3 "Solve cycle", C7):
//! append the frame, decide its initial pose, prepare landmarks, build and
//! solve the windowed problem, marginalize, and sync results back.

use std::collections::HashMap;

use levenberg_marquardt::LevenbergMarquardt;
use nalgebra::Vector3;
use swarmvio_geom::Pose;
use swarmvio_imu::{ImuNoiseModel, PreintegrationBuffer};
use swarmvio_relpose::{
    solve_central_pnp, solve_gp3p, CentralObservation, Gp3pObservation, PnpResult,
};
use swarmvio_types::{
    AgentId, EstimatorConfig, Frame, FrameId, ImuSample, Landmark, LandmarkFlag, LandmarkId,
    LandmarkObservation, SlidingWindow,
};

use crate::init::initialize_from_imu;
use crate::marginalization::Prior;
use crate::problem::{ImuFactor, ProjectionFactor, ProjectionObservation, SlidingWindowProblem};
use crate::state::{FrameParam, WindowState};
use crate::triangulate::{promote_if_ready, try_initialize_landmark};

const GRAVITY_MAGNITUDE: f64 = 9.81;

/// Drives one agent's sliding-window estimate: the authoritative
/// `SlidingWindow`/landmark database (spec §4.7 "the estimator owns the
/// authoritative window") plus everything needed to solve it.
pub struct Estimator {
    config: EstimatorConfig,
    self_id: AgentId,
    camera_extrinsics: Vec<Pose>,
    focal_length: f64,
    pub window: SlidingWindow,
    pub landmarks: HashMap<LandmarkId, Landmark>,
    imu: PreintegrationBuffer,
    gravity: Vector3<f64>,
    initialized: bool,
    prior: Option<Prior>,
    next_pnp_seed: u64,
}

impl Estimator {
    pub fn new(config: EstimatorConfig, self_id: AgentId, camera_extrinsics: Vec<Pose>, focal_length: f64, noise: ImuNoiseModel) -> Self {
        Estimator {
            config,
            self_id,
            camera_extrinsics,
            focal_length,
            window: SlidingWindow::new(),
            landmarks: HashMap::new(),
            imu: PreintegrationBuffer::new(noise),
            gravity: Vector3::new(0.0, 0.0, GRAVITY_MAGNITUDE),
            initialized: false,
            prior: None,
            next_pnp_seed: 0,
        }
    }

    pub fn feed_imu(&mut self, sample: ImuSample) -> bool {
        self.imu.add(sample)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Spec §4.3 "Initialization": runs once, over the first `init_imu_num`
    /// samples. `samples` must already hold at least that many; callers
    /// accumulate from their own ingestion thread and call this once ready.
    pub fn try_initialize(&mut self, samples: &[ImuSample]) -> bool {
        if self.initialized {
            return true;
        }
        if samples.len() < self.config.init_imu_num {
            return false;
        }
match initialize_from_imu(&samples[..self.config.init_imu_num]) {
            Some(result) => {
                let mut first = Frame::new(FrameId(0), samples[0].t, self.self_id);
                first.odom.pose = Pose::from_rotation_translation(result.initial_rotation.inverse(), Vector3::zeros());
                first.ba = result.initial_accel_bias;
                first.bg = result.initial_gyro_bias;
                first.is_keyframe = true;
                self.window.push(first);
                self.initialized = true;
                tracing::info!("estimator initialized from stationary IMU alignment");
                true
            }
            None => false,
        }
    }

    /// Accepts a keyframe (spec §4.3 steps 1-7). `observations` pairs each
    /// surviving track's landmark id with the `LandmarkObservation` the
    /// front-end produced for this frame. Returns `false` if the frame could
    /// not be admitted (not initialized yet, or IMU not yet available up to
    /// `frame.stamp`).
    pub fn accept_frame(&mut self, mut frame: Frame, observations: Vec<(LandmarkId, LandmarkObservation)>) -> bool {
        if !self.initialized {
            tracing::debug!("dropping frame before initialization completes");
            return false;
        }

        let prev = self.window.newest().cloned();
        if let Some(prev) = &prev {
            if !self.imu.available(frame.stamp) {
                return false;
            }
            let block = self.imu.propagate(prev.ba, prev.bg, prev.stamp, frame.stamp);
            frame.pre_integrations = Some(block);
            frame.ba = prev.ba;
            frame.bg = prev.bg;
        }

        for (id, obs) in &observations {
            self.landmarks
                .entry(*id)
                .and_modify(|lm| lm.add_observation(*obs))
                .or_insert_with(|| Landmark::new(*id, *obs));
        }

        // Step 2: initial pose, PnP against INITIALIZED landmarks or IMU fallback.
        frame.odom.pose = self.estimate_initial_pose(&frame, &observations, prev.as_ref());
        frame.odom.velocity = prev.as_ref().map(|p| p.odom.velocity).unwrap_or_else(Vector3::zeros);

        self.window.push(frame);

        // Step 3: landmark preparation.
        self.prepare_landmarks();

        // Steps 4-5: build and solve.
        self.solve_window();

        // Step 6: marginalize.
        self.maybe_marginalize();

        true
    }

    fn estimate_initial_pose(
        &mut self,
        frame: &Frame,
        observations: &[(LandmarkId, LandmarkObservation)],
        prev: Option<&Frame>,
    ) -> Pose {
        let anchors: Vec<(LandmarkId, LandmarkObservation)> = observations
            .iter()
            .filter(|(id, _)| self.landmarks.get(id).map(|l| l.usable_for_pnp()).unwrap_or(false))
            .cloned()
            .collect();

        let seed = self.next_pnp_seed;
        self.next_pnp_seed += 1;

        let pnp_result = if self.camera_extrinsics.len() <= 1 {
            let extrinsic = self.camera_extrinsics.first().copied().unwrap_or_else(Pose::identity);
            let obs: Vec<CentralObservation> = anchors
                .iter()
                .map(|(id, o)| CentralObservation {
                    world_point: self.landmarks[id].position,
                    bearing: o.bearing,
                })
                .collect();
            solve_central_pnp(&obs, &extrinsic, self.focal_length, self.config.pnp_min_inliers, seed)
        } else {
            let obs: Vec<Gp3pObservation> = anchors
                .iter()
                .map(|(id, o)| Gp3pObservation {
                    camera_id: o.camera_id,
                    camera_extrinsic: self.camera_extrinsics[o.camera_id as usize],
                    world_point: self.landmarks[id].position,
                    bearing: o.bearing,
                })
                .collect();
            solve_gp3p(&obs, self.focal_length, self.config.pnp_min_inliers, seed)
        };

        match pnp_result {
            PnpResult::Solved { pose, .. } => pose,
            _ => {
                tracing::info!("PnP initialization failed, falling back to IMU propagation");
                match (prev, &frame.pre_integrations) {
                    (Some(prev), Some(block)) => {
                        let dt = block.dt;
                        let r_prev = prev.odom.pose.rotation();
                        let predicted_t = prev.odom.pose.translation() + r_prev * block.delta_p + prev.odom.velocity * dt - 0.5 * self.gravity * dt * dt;
                        let predicted_r = r_prev * block.delta_q;
                        Pose::from_rotation_translation(predicted_r, predicted_t)
                    }
                    (Some(prev), None) => prev.odom.pose,
                    (None, _) => Pose::identity(),
                }
            }
        }
    }

    fn prepare_landmarks(&mut self) {
        let window = &self.window;
        let pose_of = |frame_id: FrameId, camera_id: u8| -> Option<Pose> {
            window
                .frames()
                .iter()
                .find(|f| f.frame_id == frame_id)
                .map(|f| f.odom.pose.compose(&self.camera_extrinsics.get(camera_id as usize).copied().unwrap_or_else(Pose::identity)))
        };

        for lm in self.landmarks.values_mut() {
            if lm.flag == LandmarkFlag::Uninitialized {
                try_initialize_landmark(lm, pose_of);
            }
            promote_if_ready(lm, 2);
        }
    }

    fn solve_window(&mut self) {
        if self.window.len() < self.config.min_solve_frames {
            return;
        }

        let mut state = WindowState::new(
            self.camera_extrinsics.clone(),
            self.config.estimate_extrinsic,
            self.config.td_initial,
            self.config.estimate_td,
            self.config.min_inv_dep,
        );
        for f in self.window.frames() {
            state.push_frame(f.frame_id, FrameParam::new(f.odom.pose, f.odom.velocity, f.ba, f.bg));
        }
        for (id, lm) in &self.landmarks {
            if lm.usable_for_pnp() || lm.flag == LandmarkFlag::Triangulated {
                state.set_landmark(*id, lm.inverse_depth.max(self.config.min_inv_dep));
            }
        }

        let imu_factors: Vec<ImuFactor> = self
            .window
            .frames()
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(i, f)| f.pre_integrations.clone().map(|p| ImuFactor { frame_a: i - 1, frame_b: i, preintegration: p }))
            .collect();

        let mut projection_factors = Vec::new();
        for (id, lm) in &self.landmarks {
            if !state.landmark_inv_depth.contains_key(id) || lm.track.len() < 2 {
                continue;
            }
            let anchor_obs = lm.track[0];
            let Some(anchor_frame_idx) = self.window.frame_ids().iter().position(|&f| f == anchor_obs.frame_id) else {
                continue;
            };
            for obs in lm.track.iter().skip(1) {
                let Some(obs_frame_idx) = self.window.frame_ids().iter().position(|&f| f == obs.frame_id) else {
                    continue;
                };
                projection_factors.push(ProjectionFactor {
                    landmark_id: *id,
                    anchor: ProjectionObservation {
                        frame_index: anchor_frame_idx,
                        camera_index: anchor_obs.camera_id as usize,
                        bearing: anchor_obs.bearing,
                        pixel_velocity: anchor_obs.pixel_velocity,
                        td_measured: anchor_obs.td_at_observation,
                    },
                    observation: ProjectionObservation {
                        frame_index: obs_frame_idx,
                        camera_index: obs.camera_id as usize,
                        bearing: obs.bearing,
                        pixel_velocity: obs.pixel_velocity,
                        td_measured: obs.td_at_observation,
                    },
                });
            }
        }

        let prior = self.prior.clone();
        let problem = SlidingWindowProblem {
            state,
            imu_factors,
            projection_factors,
            prior: prior.as_ref(),
            gravity: self.gravity,
            focal_length: self.focal_length,
        };

        // `options.max_iterations`/`max_solver_time_secs` bound the solve in
        // principle (spec §4.3 step 5, §6); `levenberg_marquardt`'s own
        // termination criteria (gradient/parameter tolerance) are used as-is
        // here, the same way `geometry/bundle-adj` calls `minimize` with no
        // further tuning.
        let solver = LevenbergMarquardt::new();
        let (solved, report) = solver.minimize(problem);

        if report.termination.was_successful() {
            for (frame, param) in self.window_frames_mut().zip(solved.state.frames.iter()) {
                frame.odom.pose = param.pose();
                frame.odom.velocity = param.velocity;
                frame.ba = param.ba;
                frame.bg = param.bg;
            }
            for id in &solved.state.landmark_order {
                if let Some(lm) = self.landmarks.get_mut(id) {
                    lm.inverse_depth = solved.state.landmark_inv_depth[id];
                    let anchor = *lm.anchor();
                    if let Some(anchor_pose) = self
                        .window
                        .frames()
                        .iter()
                        .find(|f| f.frame_id == anchor.frame_id)
                        .map(|f| f.odom.pose.compose(&self.camera_extrinsics[anchor.camera_id as usize]))
                    {
                        lm.position = anchor_pose.transform_point(&(anchor.bearing / lm.inverse_depth));
                    }
                }
            }
        }
    }

    fn window_frames_mut(&mut self) -> impl Iterator<Item = &mut Frame> {
        self.window.frames_mut().iter_mut()
    }



    /// Spec §3 "Frame": "non-keyframes are never retained once superseded".
    /// Prefers dropping the oldest non-keyframe over the two frames so a
    /// keyframe never gets pushed out by a non-keyframe that is still
    /// sitting in the window; falls back to the literal oldest frame once
    /// every retained frame but the newest is a keyframe.
    fn choose_frame_to_drop(&self) -> Option<FrameId> {
        let frames = self.window.frames();
        if frames.len() < 2 {
            return frames.first().map(|f| f.frame_id);
        }
        frames[..frames.len() - 1]
            .iter()
            .find(|f| !f.is_keyframe)
            .or_else(|| frames.first())
            .map(|f| f.frame_id)
    }

    fn maybe_marginalize(&mut self) {
        if self.window.len() <= self.config.max_sld_win_size {
            return;
        }
        let Some(drop_id) = self.choose_frame_to_drop() else { return };
        let is_oldest = self.window.oldest().map(|f| f.frame_id) == Some(drop_id);
        let Some(dropped) = self.window.remove(drop_id) else { return };

        // The prior only has a coherent meaning against the new oldest
        // frame (`state.frames[0]` in the solve, see `problem.rs`), so it
        // is only built when the dropped frame actually was the oldest.
        if is_oldest {
            let dropped_param = FrameParam::new(dropped.odom.pose, dropped.odom.velocity, dropped.ba, dropped.bg);
            self.prior = Some(Prior::from_dropped_frame(&dropped_param, dropped.pre_integrations.as_ref()));
        }

        let mut to_drop = Vec::new();
        for (id, lm) in self.landmarks.iter_mut() {
            if lm.anchor().frame_id == dropped.frame_id && !lm.re_anchor() {
                to_drop.push(*id);
            }
        }
        for id in to_drop {
            self.landmarks.remove(&id);
        }
    }

    /// Spec §4.7 "Shared sliding-window synchronization": the solved depth
    /// (not inverse depth) of every landmark currently usable as a PnP
    /// anchor or already triangulated, keyed by landmark id. Callers feed
    /// this back into the front-end/loop-detector so their own copy of a
    /// landmark's observation can carry a real depth instead of `None`.
    pub fn solved_depths(&self) -> HashMap<LandmarkId, f64> {
        self.landmarks
            .iter()
            .filter(|(_, lm)| lm.usable_for_pnp() || lm.flag == LandmarkFlag::Triangulated)
            .filter(|(_, lm)| lm.inverse_depth > 0.0)
            .map(|(id, lm)| (*id, 1.0 / lm.inverse_depth))
            .collect()
    }

    /// Spec §4.3 step 7: IMU-propagates from the newest solved frame to
    /// `t_now` for a low-latency odometry estimate between keyframe solves.
    pub fn propagate_to_now(&self, t_now: f64) -> Option<(Pose, Vector3<f64>)> {
        let newest = self.window.newest()?;
        if !self.imu.available(t_now) || t_now <= newest.stamp {
            return Some((newest.odom.pose, newest.odom.velocity));
        }
        let block = self.imu.propagate(newest.ba, newest.bg, newest.stamp, t_now);
        let dt = block.dt;
        let r_newest = newest.odom.pose.rotation();
        let predicted_t =
            newest.odom.pose.translation() + r_newest * block.delta_p + newest.odom.velocity * dt - 0.5 * self.gravity * dt * dt;
        let predicted_v = newest.odom.velocity + r_newest * block.delta_v - self.gravity * dt;
        let predicted_r = r_newest * block.delta_q;
        Some((Pose::from_rotation_translation(predicted_r, predicted_t), predicted_v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmvio_types::AgentId;

    fn imu_samples(n: usize, dt: f64) -> Vec<ImuSample> {
        (0..n).map(|i| ImuSample::new(i as f64 * dt, Vector3::new(0.0, 0.0, GRAVITY_MAGNITUDE), Vector3::zeros())).collect()
    }

    #[test]
    fn initialization_requires_enough_samples() {
        let mut config = EstimatorConfig::default();
        config.init_imu_num = 20;
        let mut est = Estimator::new(config, AgentId(0), vec![Pose::identity()], 250.0, ImuNoiseModel::default());
        let samples = imu_samples(10, 0.01);
        assert!(!est.try_initialize(&samples));
        let samples = imu_samples(20, 0.01);
        assert!(est.try_initialize(&samples));
        assert!(est.is_initialized());
    }

    #[test]
    fn frame_is_rejected_before_initialization() {
        let config = EstimatorConfig::default();
        let mut est = Estimator::new(config, AgentId(0), vec![Pose::identity()], 250.0, ImuNoiseModel::default());
        let frame = Frame::new(FrameId(1), 1.0, AgentId(0));
        assert!(!est.accept_frame(frame, vec![]));
    }

    #[test]
    fn marginalization_prefers_dropping_non_keyframes() {
        let mut config = EstimatorConfig::default();
        config.init_imu_num = 20;
        config.max_sld_win_size = 3;
        // Isolate marginalization from the solve: no landmarks are fed in
        // this test, so keep `solve_window` a no-op.
        config.min_solve_frames = 1000;
        let mut est = Estimator::new(config, AgentId(0), vec![Pose::identity()], 250.0, ImuNoiseModel::default());
        assert!(est.try_initialize(&imu_samples(20, 0.01)));
        for s in imu_samples(1000, 0.01) {
            est.feed_imu(s);
        }

        let mut push = |id: u64, stamp: f64, is_keyframe: bool| {
            let mut f = Frame::new(FrameId(id), stamp, AgentId(0));
            f.is_keyframe = is_keyframe;
            assert!(est.accept_frame(f, vec![]));
        };

        push(1, 1.0, true);
        push(2, 2.0, false);
        push(3, 3.0, true);
        // Window now holds 4 frames (the init frame plus 1-3), exceeding
        // `max_sld_win_size = 3`: the non-keyframe (id 2) should be dropped
        // rather than the oldest frame (id 0, a keyframe).
        let ids: Vec<u64> = est.window.frame_ids().into_iter().map(|f| f.0).collect();
        assert_eq!(ids, vec![0, 1, 3]);

        // All remaining frames but the newest are now keyframes, so the
        // next overflow falls back to dropping the literal oldest frame.
        push(4, 4.0, true);
        let ids: Vec<u64> = est.window.frame_ids().into_iter().map(|f| f.0).collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }
}
