//! Loop detector orchestration: retrieve, match, verify, decide whether to
//! re-broadcast (spec §4.5, C8).

use std::time::Instant;

use nalgebra::Matrix6;
use swarmvio_relpose::{
    solve_central_pnp, solve_gp3p, verify_loop_pose, CentralObservation, Gp3pObservation, PnpResult, VerifyThresholds,
};
use swarmvio_types::{AgentId, LoopConfig, LoopEdge, PgoMode, SwarmVioConfig, VisualImageDescArray};

use crate::database::{KeyframeDatabase, KeyframeKey};
use crate::matching::{knn_match_camera, local_distance_gate};
use crate::retrieval::{retrieve_candidates, RetrievalParams};
use crate::wait::MatchedFrameWaiter;

#[derive(Debug, Clone, Copy)]
pub struct LoopDetectorParams {
    pub retrieval: RetrievalParams,
    pub knn_match_ratio: f64,
    pub focal_length: f64,
    pub max_depth_to_fuse: f64,
    pub loop_inlier_feature_num: usize,
    pub accept_loop_max_yaw: f64,
    pub accept_loop_max_pos: f64,
    pub gravity_check_thres: f64,
    pub search_local_dist: f64,
}

impl LoopDetectorParams {
    pub fn from_config(config: &SwarmVioConfig) -> Self {
        let LoopConfig {
            loop_inlier_feature_num,
            accept_loop_max_yaw,
            accept_loop_max_pos,
            gravity_check_thres,
            search_local_dist,
        } = config.loop_detector;
        LoopDetectorParams {
            retrieval: RetrievalParams::default(),
            knn_match_ratio: config.frontend.knn_match_ratio,
            focal_length: config.frontend.focal_length,
            max_depth_to_fuse: config.estimator.max_depth_to_fuse,
            loop_inlier_feature_num,
            accept_loop_max_yaw,
            accept_loop_max_pos,
            gravity_check_thres,
            search_local_dist,
        }
    }

    fn verify_thresholds(&self) -> VerifyThresholds {
        VerifyThresholds {
            accept_loop_max_yaw: self.accept_loop_max_yaw,
            accept_loop_max_pos: self.accept_loop_max_pos,
            gravity_check_thres: self.gravity_check_thres,
        }
    }
}

/// Outcome of admitting one keyframe descriptor into the detector.
#[derive(Debug)]
pub enum AdmitOutcome {
    /// Processed immediately; carries any loop edges found (possibly empty)
    /// paired with whether each should be re-broadcast.
    Processed(Vec<(LoopEdge, bool)>),
    /// A remote descriptor referencing a local frame not yet in the
    /// database; deferred (spec §4.5 "Matched-frame wait").
    Deferred,
}

/// Database, retrieval, matching and verification for cross-agent loop
/// closure (spec C8).
pub struct LoopDetector {
    self_id: AgentId,
    pgo_mode: PgoMode,
    params: LoopDetectorParams,
    db: KeyframeDatabase,
    waiter: MatchedFrameWaiter,
    next_seed: u64,
}

impl LoopDetector {
    pub fn new(self_id: AgentId, pgo_mode: PgoMode, params: LoopDetectorParams) -> Self {
        LoopDetector {
            self_id,
            pgo_mode,
            params,
            db: KeyframeDatabase::new(),
            waiter: MatchedFrameWaiter::default(),
            next_seed: 1,
        }
    }

    pub fn database(&self) -> &KeyframeDatabase {
        &self.db
    }

    fn fresh_seed(&mut self) -> u64 {
        let seed = self.next_seed;
        self.next_seed += 1;
        seed
    }

    /// Whether a detected edge should be re-broadcast over the network
    /// (spec §4.5 step 4): local edges go out under non-distributed PGO,
    /// stay local under distributed; remote edges are never re-broadcast.
    fn should_rebroadcast(&self, is_local: bool) -> bool {
        is_local && self.pgo_mode == PgoMode::NonDist
    }

    /// Admits one keyframe (local or remote) into the detector.
    pub fn admit(&mut self, desc: VisualImageDescArray, is_local: bool) -> AdmitOutcome {
        if !is_local {
            if let (Some(matched_frame), Some(matched_drone)) = (desc.matched_frame, desc.matched_drone) {
                if matched_drone == self.self_id {
                    let key = KeyframeKey {
                        drone_id: self.self_id,
                        frame_id: matched_frame,
                    };
                    if !self.db.contains(key) {
                        tracing::info!(frame_id = matched_frame.0, "loop: deferring remote frame pending local match");
                        self.waiter.wait_for(key, desc);
                        return AdmitOutcome::Deferred;
                    }
                }
            }
        }

        let key = KeyframeKey::of(&desc);
        self.db.insert(desc.clone());
        let mut edges = self.process_query(&desc, is_local);

        if let Some(deferred) = self.waiter.on_admitted(key) {
            self.db.insert(deferred.clone());
            edges.extend(self.process_query(&deferred, false));
        }

        AdmitOutcome::Processed(edges)
    }

    /// Drops pending remote frames whose 1 s wait budget has expired.
    pub fn expire_pending(&mut self, now: Instant) {
        self.waiter.expire(now);
    }

    fn process_query(&mut self, query: &VisualImageDescArray, is_local: bool) -> Vec<(LoopEdge, bool)> {
        // Clone the candidate list out of the database first: `try_verify`
        // needs `&mut self` for its RANSAC seed counter, so it cannot run
        // while still borrowing `self.db`.
        let candidates: Vec<VisualImageDescArray> = retrieve_candidates(&self.db, query, &self.params.retrieval)
            .into_iter()
            .cloned()
            .collect();

        let mut edges = Vec::new();
        for candidate in &candidates {
            if let Some(edge) = self.try_verify(query, candidate) {
                edges.push((edge, self.should_rebroadcast(is_local)));
            }
        }
        edges
    }

    fn try_verify(&mut self, query: &VisualImageDescArray, candidate: &VisualImageDescArray) -> Option<LoopEdge> {
        let ratio = self.params.knn_match_ratio;
        let max_depth = self.params.max_depth_to_fuse;
        let same_frame = query.frame_id == candidate.frame_id && query.drone_id == candidate.drone_id;

        let mut central_obs = Vec::new();
        let mut gp3p_obs = Vec::new();

        for (cam_index, query_cam) in query.cameras.iter().enumerate() {
            let Some(candidate_cam) = candidate.cameras.get(cam_index) else {
                continue;
            };
            let matches = knn_match_camera(&query_cam.landmarks, &candidate_cam.landmarks, ratio);
            for m in matches {
                let q = query_cam.landmarks[m.query_index];
                let c = candidate_cam.landmarks[m.candidate_index];

                if same_frame && !local_distance_gate(&q, &c, self.params.focal_length, self.params.search_local_dist) {
                    continue;
                }

                let Some(depth) = c.depth else { continue };
                if depth <= 0.0 || depth > max_depth {
                    continue;
                }

                let candidate_camera_pose = candidate.pose_drone.compose(&candidate_cam.extrinsic);
                let world_point = candidate_camera_pose.transform_point(&(c.bearing * depth));

                if query.cameras.len() == 1 {
                    central_obs.push(CentralObservation {
                        world_point,
                        bearing: q.bearing,
                    });
                } else {
                    gp3p_obs.push(Gp3pObservation {
                        camera_id: query_cam.camera_id,
                        camera_extrinsic: query_cam.extrinsic,
                        world_point,
                        bearing: q.bearing,
                    });
                }
            }
        }

        let min_inliers = self.params.loop_inlier_feature_num;
        let seed = self.fresh_seed();
        let result = if query.cameras.len() == 1 {
            solve_central_pnp(&central_obs, &query.cameras[0].extrinsic, self.params.focal_length, min_inliers, seed)
        } else {
            solve_gp3p(&gp3p_obs, self.params.focal_length, min_inliers, seed)
        };

        let PnpResult::Solved { pose: hypothesis, inlier_indices } = result else {
            tracing::info!(
                candidate_frame = candidate.frame_id.0,
                "loop: PnP/GP3P not solved against candidate"
            );
            return None;
        };

        if let Err(rejection) = verify_loop_pose(&query.pose_drone, &candidate.pose_drone, &hypothesis, &self.params.verify_thresholds()) {
            tracing::info!(candidate_frame = candidate.frame_id.0, ?rejection, "loop: verification rejected candidate");
            return None;
        }

        let inliers = inlier_indices.len() as u32;
        let covariance = Matrix6::<f64>::identity() * (1.0 / inliers.max(1) as f64);

        Some(LoopEdge {
            frame_a: query.frame_id,
            frame_b: candidate.frame_id,
            relative_pose: hypothesis,
            covariance,
            inliers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{UnitQuaternion, Vector2, Vector3};
    use swarmvio_geom::Pose;
    use swarmvio_types::{CameraImageDesc, FrameId, LandmarkObservation};

    fn flat_params() -> LoopDetectorParams {
        LoopDetectorParams {
            retrieval: RetrievalParams {
                top_k: 5,
                min_time_gap: 0.0,
                max_spatial_dist: 100.0,
            },
            knn_match_ratio: 0.8,
            focal_length: 250.0,
            max_depth_to_fuse: 10.0,
            loop_inlier_feature_num: 8,
            accept_loop_max_yaw: 0.3,
            accept_loop_max_pos: 1.0,
            gravity_check_thres: 0.2,
            search_local_dist: 30.0,
        }
    }

    fn synthetic_frame(frame: u64, drone: u32, stamp: f64, pose: Pose) -> VisualImageDescArray {
        let landmarks: Vec<LandmarkObservation> = (0..20)
            .map(|i| {
                let angle = i as f64 * 0.3;
                let point_in_body = Vector3::new(angle.sin() * 0.6, angle.cos() * 0.4, 3.0 + (i % 4) as f64 * 0.4);
                LandmarkObservation {
                    frame_id: FrameId(frame),
                    camera_id: 0,
                    bearing: point_in_body.normalize(),
                    pixel_velocity: Vector2::zeros(),
                    td_at_observation: 0.0,
                    depth: Some(point_in_body.norm()),
                }
            })
            .collect();

        VisualImageDescArray {
            frame_id: FrameId(frame),
            drone_id: AgentId(drone),
            reference_frame_id: FrameId(frame),
            stamp,
            pose_drone: pose,
            sld_win_status: vec![FrameId(frame)],
            cameras: vec![CameraImageDesc {
                camera_id: 0,
                extrinsic: Pose::identity(),
                global_descriptor: vec![1.0, 0.0, 0.0],
                landmarks,
            }],
            is_keyframe: true,
            is_lazy_frame: false,
            matched_frame: None,
            matched_drone: None,
            send_to_backend: true,
        }
    }

    #[test]
    fn revisiting_the_same_pose_produces_a_loop_edge() {
        let mut detector = LoopDetector::new(AgentId(0), PgoMode::NonDist, flat_params());
        let first = synthetic_frame(1, 0, 0.0, Pose::identity());
        detector.admit(first, true);

        let revisit = synthetic_frame(50, 0, 100.0, Pose::identity());
        let outcome = detector.admit(revisit, true);
        match outcome {
            AdmitOutcome::Processed(edges) => {
                assert_eq!(edges.len(), 1);
                assert!(edges[0].0.inliers >= 8);
                assert!(edges[0].1, "local edge under NON_DIST should re-broadcast");
            }
            AdmitOutcome::Deferred => panic!("should not defer a local frame"),
        }
    }

    #[test]
    fn distributed_mode_keeps_local_edges_unbroadcast() {
        let mut detector = LoopDetector::new(AgentId(0), PgoMode::Distributed, flat_params());
        detector.admit(synthetic_frame(1, 0, 0.0, Pose::identity()), true);
        let outcome = detector.admit(synthetic_frame(50, 0, 100.0, Pose::identity()), true);
        match outcome {
            AdmitOutcome::Processed(edges) => {
                assert_eq!(edges.len(), 1);
                assert!(!edges[0].1, "local edge under DISTRIBUTED should stay local");
            }
            AdmitOutcome::Deferred => panic!("should not defer a local frame"),
        }
    }

    #[test]
    fn remote_frame_matching_unarrived_local_frame_is_deferred_then_released() {
        let mut detector = LoopDetector::new(AgentId(0), PgoMode::NonDist, flat_params());

        let mut remote = synthetic_frame(5, 1, 10.0, Pose::identity());
        remote.matched_frame = Some(FrameId(42));
        remote.matched_drone = Some(AgentId(0));

        let outcome = detector.admit(remote, false);
        assert!(matches!(outcome, AdmitOutcome::Deferred));

        let local = synthetic_frame(42, 0, 9.9, Pose::identity());
        let outcome = detector.admit(local, true);
        match outcome {
            AdmitOutcome::Processed(_) => {}
            AdmitOutcome::Deferred => panic!("local admission must not itself defer"),
        }
    }

    #[test]
    fn excessive_yaw_drift_is_rejected() {
        let mut detector = LoopDetector::new(AgentId(0), PgoMode::NonDist, flat_params());
        detector.admit(synthetic_frame(1, 0, 0.0, Pose::identity()), true);

        let drifted = Pose::from_rotation_translation(UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 1.2), Vector3::zeros());
        let outcome = detector.admit(synthetic_frame(50, 0, 100.0, drifted), true);
        match outcome {
            AdmitOutcome::Processed(edges) => assert!(edges.is_empty()),
            AdmitOutcome::Deferred => panic!("should not defer a local frame"),
        }
    }
}
