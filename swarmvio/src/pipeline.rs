//! Ties the front-end, estimator, and loop detector into the per-frame
//! and per-sample entry points the ingestion threads call (spec §4,
//! §9 "define a small SharedWindow value type... Callbacks become typed
//! events dispatched via an event bus" — here, the typed events are the
//! broadcastable [`VisualImageDescArray`]/[`LoopEdge`] values pushed onto
//! `desc_tx`/`edge_tx`).

use nalgebra::{Vector3, Vector5};
use opencv_ros_camera::{Distortion, RosOpenCvIntrinsics};

use crossbeam_ok::CrossbeamOk;

use swarmvio_estimator::Estimator;
use swarmvio_frontend::{FeatureTracker, GlobalDescriptorExtractor, HistogramDescriptor, LoopDescriptorBuilder, TrackerParams};
use swarmvio_geom::CameraModel;
use swarmvio_imu::ImuNoiseModel;
use swarmvio_loop::{AdmitOutcome, LoopDetector, LoopDetectorParams};
use swarmvio_swarm::{decide_broadcast, PeerTracker, DEFAULT_NEARBY_DIST};
use swarmvio_types::{AgentId, Frame, FrameId, ImuSample, LoopEdge, SwarmVioConfig, VisualImageDescArray};

use crate::ingest::ImageFrame;

/// Drives one agent's full pipeline: feature tracking, sliding-window
/// estimation, loop detection, and the lazy-broadcast decision for its
/// own keyframes.
pub struct Pipeline {
    self_id: AgentId,
    config: SwarmVioConfig,
    tracker: FeatureTracker,
    camera_models: Vec<Option<CameraModel>>,
    extractor: HistogramDescriptor,
    estimator: Estimator,
    loop_detector: LoopDetector,
    peers: PeerTracker,
    next_frame_id: FrameId,
    imu_init_buffer: Vec<ImuSample>,
    desc_tx: channellib::Sender<VisualImageDescArray>,
    edge_tx: channellib::Sender<LoopEdge>,
}

impl Pipeline {
    pub fn new(config: SwarmVioConfig, desc_tx: channellib::Sender<VisualImageDescArray>, edge_tx: channellib::Sender<LoopEdge>) -> Self {
        let self_id = AgentId(config.self_id);
        let num_cameras = config.camera_extrinsics.len();

        let tracker = FeatureTracker::new(
            self_id,
            num_cameras,
            TrackerParams {
                feature_min_dist: config.frontend.feature_min_dist,
                undistort_fov_deg: config.frontend.undistort_fov,
                ..TrackerParams::default()
            },
        );

        let estimator = Estimator::new(
            config.estimator,
            self_id,
            config.camera_extrinsics.clone(),
            config.frontend.focal_length,
            ImuNoiseModel::default(),
        );

        let loop_detector = LoopDetector::new(self_id, config.pgo_mode, LoopDetectorParams::from_config(&config));

        Pipeline {
            self_id,
            camera_models: vec![None; num_cameras],
            extractor: HistogramDescriptor::default(),
            tracker,
            estimator,
            loop_detector,
            peers: PeerTracker::new(),
            next_frame_id: FrameId(0),
            imu_init_buffer: Vec::new(),
            config,
            desc_tx,
            edge_tx,
        }
    }

    /// Appends one IMU sample to both the raw initialization buffer and the
    /// estimator's own pre-integration buffer, then attempts initialization
    /// if it hasn't completed yet (spec §4.3 "Initialization").
    pub fn process_imu_sample(&mut self, sample: ImuSample) {
        self.imu_init_buffer.push(sample);
        self.estimator.feed_imu(sample);

        if !self.estimator.is_initialized() && self.imu_init_buffer.len() >= self.config.estimator.init_imu_num {
            if self.estimator.try_initialize(&self.imu_init_buffer) {
                tracing::info!(self_id = self.self_id.0, "estimator initialized from IMU");
                self.imu_init_buffer.clear();
                self.imu_init_buffer.shrink_to_fit();
            }
        }
    }

    fn ensure_camera_models(&mut self, images: &[swarmvio_frontend::GrayImage]) {
        for (i, image) in images.iter().enumerate() {
            if self.camera_models[i].is_none() {
                let f = self.config.frontend.focal_length;
                let distortion = Distortion::from_opencv_vec(Vector5::zeros());
                let intrinsics = RosOpenCvIntrinsics::from_params_with_distortion(
                    f,
                    0.0,
                    f,
                    image.width as f64 / 2.0,
                    image.height as f64 / 2.0,
                    distortion,
                );
                self.camera_models[i] = Some(CameraModel::new(
                    image.width as usize,
                    image.height as usize,
                    intrinsics,
                    self.config.camera_extrinsics[i],
                ));
            }
        }
    }

    /// Processes one synchronized multi-camera frame (spec §4.2-§4.3):
    /// tracks features, builds the broadcastable descriptor, admits the
    /// frame into the estimator, and runs it through the loop detector.
    /// Returns `false` if the estimator has not initialized yet and so
    /// dropped the frame.
    pub fn process_image_frame(&mut self, frame: ImageFrame) -> bool {
        if !self.estimator.is_initialized() {
            tracing::debug!("dropping image frame before initialization completes");
            return false;
        }

        self.ensure_camera_models(&frame.images);
        let models: Vec<CameraModel> = self.camera_models.iter().map(|m| m.clone().expect("camera models populated")).collect();

        let track_output = self.tracker.process_stereo_frame(frame.stamp, &frame.images);

        let frame_id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.next();

        // Depths from the previous solve (spec §4.7): a track whose landmark
        // wasn't yet triangulated/anchored as of the last solve still gets
        // `None` here, same as the loop detector's copy.
        let prior_depths = self.estimator.solved_depths();
        let observations = track_output
            .cameras
            .iter()
            .flat_map(|cam| {
                let model = &models[cam.camera_id as usize];
                cam.features.iter().map(move |f| {
                    (
                        f.landmark_id,
                        swarmvio_types::LandmarkObservation {
                            frame_id,
                            camera_id: cam.camera_id,
                            bearing: model.pixel_to_bearing(f.pixel),
                            pixel_velocity: f.pixel_velocity,
                            td_at_observation: 0.0,
                            depth: prior_depths.get(&f.landmark_id).copied(),
                        },
                    )
                })
            })
            .collect::<Vec<_>>();

        let sld_win_status = self.estimator.window.frame_ids();
        let mut vio_frame = Frame::new(frame_id, frame.stamp, self.self_id);
        vio_frame.is_keyframe = track_output.is_keyframe;
        let accepted = self.estimator.accept_frame(vio_frame, observations);
        if !accepted {
            tracing::debug!(frame_id = frame_id.0, "frame not admitted to sliding window");
            return false;
        }

        let odom = self
            .estimator
            .window
            .newest()
            .map(|f| f.odom)
            .unwrap_or_else(swarmvio_types::Odometry::identity);

        let depths = self.estimator.solved_depths();
        let builder = LoopDescriptorBuilder::new(&models, ReuseExtractor(&self.extractor));
        let desc = builder.build(
            frame_id,
            self.self_id,
            frame.stamp,
            odom,
            sld_win_status,
            &frame.images,
            &track_output.cameras,
            track_output.is_keyframe,
            &depths,
        );

        self.dispatch_own_descriptor(desc.clone());
        self.run_loop_detector(desc, true);
        true
    }

    /// Handles a keyframe descriptor received from the swarm transport
    /// (either a peer's own frame, or a frame referencing a local match
    /// this agent hasn't produced yet).
    pub fn process_remote_descriptor(&mut self, desc: VisualImageDescArray) {
        self.peers.mark_heard(desc.drone_id);
        self.run_loop_detector(desc, false);
    }

    fn run_loop_detector(&mut self, desc: VisualImageDescArray, is_local: bool) {
        match self.loop_detector.admit(desc, is_local) {
            AdmitOutcome::Processed(edges) => {
                for (edge, rebroadcast) in edges {
                    tracing::info!(frame_a = edge.frame_a.0, frame_b = edge.frame_b.0, inliers = edge.inliers, "loop edge verified");
                    if rebroadcast {
                        self.edge_tx.send(edge).cb_ok();
                    }
                }
            }
            AdmitOutcome::Deferred => {}
        }
    }

    fn dispatch_own_descriptor(&mut self, desc: VisualImageDescArray) {
        let self_position = self
            .estimator
            .window
            .newest()
            .map(|f| f.odom.pose.translation())
            .unwrap_or_else(Vector3::zeros);

        if let Some(out) = decide_broadcast(&desc, &self.config.network, &self.peers, self_position, DEFAULT_NEARBY_DIST) {
            self.desc_tx.send(out).cb_ok();
        }
    }

    /// Drops matched-frame waits whose budget has expired (spec §4.5,
    /// §5 "Timeouts").
    pub fn expire_pending_matches(&mut self) {
        self.loop_detector.expire_pending(std::time::Instant::now());
    }
}

/// Adapter letting `&HistogramDescriptor` satisfy `GlobalDescriptorExtractor`
/// without moving ownership into the builder on every call.
struct ReuseExtractor<'a>(&'a HistogramDescriptor);

impl<'a> GlobalDescriptorExtractor for ReuseExtractor<'a> {
    fn extract(&self, image: &swarmvio_frontend::GrayImage) -> Vec<f32> {
        self.0.extract(image)
    }
}
