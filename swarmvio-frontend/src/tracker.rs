use nalgebra::Vector2;
use swarmvio_types::{AgentId, LandmarkId};

use crate::corner::good_features_to_track;
use crate::image::{GrayImage, Pyramid};
use crate::klt::{track_points_seeded, track_with_reverse_check, KltParams};

/// Tuning knobs for [`FeatureTracker`] (spec §4.2, §6 front-end options).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerParams {
    pub target_features: usize,
    pub feature_min_dist: f64,
    pub klt: KltParams,
    pub keyframe_min_tracked: usize,
    pub keyframe_max_parallax: f64,
    pub keyframe_max_interval: f64,
    pub undistort_fov_deg: f64,
}

impl Default for TrackerParams {
    fn default() -> Self {
        TrackerParams {
            target_features: 150,
            feature_min_dist: 20.0,
            klt: KltParams::default(),
            keyframe_min_tracked: 50,
            keyframe_max_parallax: 20.0,
            keyframe_max_interval: 0.5,
            undistort_fov_deg: 200.0,
        }
    }
}

/// A surviving track for one camera in one frame.
#[derive(Debug, Clone, Copy)]
pub struct TrackedFeature {
    pub landmark_id: LandmarkId,
    pub pixel: Vector2<f64>,
    pub pixel_velocity: Vector2<f64>,
}

#[derive(Debug, Clone)]
pub struct CameraTrackOutput {
    pub camera_id: u8,
    pub features: Vec<TrackedFeature>,
}

#[derive(Debug, Clone)]
pub struct StereoFrameTrackOutput {
    pub stamp: f64,
    pub cameras: Vec<CameraTrackOutput>,
    pub is_keyframe: bool,
}

struct CameraState {
    pyramid: Option<Pyramid>,
    stamp: Option<f64>,
    points: Vec<Vector2<f64>>,
    landmark_ids: Vec<LandmarkId>,
}

impl CameraState {
    fn new() -> Self {
        CameraState {
            pyramid: None,
            stamp: None,
            points: Vec::new(),
            landmark_ids: Vec::new(),
        }
    }
}

/// Per-camera KLT tracker with left-right stereo consistency and
/// keyframe-decision logic (spec §4.2, C3).
pub struct FeatureTracker {
    params: TrackerParams,
    self_id: AgentId,
    cameras: Vec<CameraState>,
    next_local_id: u64,
    last_keyframe_stamp: Option<f64>,
}

impl FeatureTracker {
    pub fn new(self_id: AgentId, num_cameras: usize, params: TrackerParams) -> Self {
        FeatureTracker {
            params,
            self_id,
            cameras: (0..num_cameras).map(|_| CameraState::new()).collect(),
            next_local_id: 0,
            last_keyframe_stamp: None,
        }
    }

    fn fresh_landmark_id(&mut self) -> LandmarkId {
        let id = LandmarkId::new(self.self_id, self.next_local_id);
        self.next_local_id += 1;
        id
    }

    /// Processes one synchronized stereo (or multi-camera) frame: forward/
    /// reverse KLT per camera against the previous frame, left→right
    /// consistency matching for cameras beyond the first, replenishment,
    /// and the keyframe decision.
    pub fn process_stereo_frame(&mut self, stamp: f64, images: &[GrayImage]) -> StereoFrameTrackOutput {
        assert_eq!(images.len(), self.cameras.len(), "image count must match configured camera count");

        let mut outputs = Vec::with_capacity(images.len());
        let mut left_pixels_velocities: Option<(Vec<Vector2<f64>>, Vec<LandmarkId>)> = None;

        for (camera_id, image) in images.iter().enumerate() {
            let pyr = Pyramid::build(image, self.params.klt.levels);
            let (points, ids, velocities) = if camera_id == 0 {
                self.track_primary_camera(camera_id, &pyr, image, stamp)
            } else {
                self.track_secondary_camera(camera_id, &pyr, left_pixels_velocities.as_ref())
            };

            if camera_id == 0 {
                left_pixels_velocities = Some((points.clone(), ids.clone()));
            }

            let features = ids
                .into_iter()
                .zip(points)
                .zip(velocities)
                .map(|((landmark_id, pixel), pixel_velocity)| TrackedFeature {
                    landmark_id,
                    pixel,
                    pixel_velocity,
                })
                .collect();
            outputs.push(CameraTrackOutput {
                camera_id: camera_id as u8,
                features,
            });
        }

        let primary_tracked = outputs.first().map(|c| c.features.len()).unwrap_or(0);
        let parallax = self.mean_parallax(0, &outputs);
        let is_keyframe = self.decide_keyframe(stamp, primary_tracked, parallax);
        if is_keyframe {
            self.last_keyframe_stamp = Some(stamp);
        }

        StereoFrameTrackOutput {
            stamp,
            cameras: outputs,
            is_keyframe,
        }
    }

    fn track_primary_camera(
        &mut self,
        camera_id: usize,
        pyr: &Pyramid,
        image: &GrayImage,
        stamp: f64,
    ) -> (Vec<Vector2<f64>>, Vec<LandmarkId>, Vec<Vector2<f64>>) {
        let state = &self.cameras[camera_id];
        let prev_dt = state
            .stamp
            .map(|s| (stamp - s).max(1e-6))
            .unwrap_or(1.0);

        let (mut points, mut ids, mut velocities) = if let (Some(prev_pyr), true) = (&state.pyramid, !state.points.is_empty()) {
            let tracked = track_with_reverse_check(prev_pyr, pyr, &state.points, &self.params.klt);
            let mut points = Vec::new();
            let mut ids = Vec::new();
            let mut velocities = Vec::new();
            for ((maybe_p, &p_prev), &id) in tracked.iter().zip(state.points.iter()).zip(state.landmark_ids.iter()) {
                if let Some(p) = maybe_p {
                    if !self.is_near_edge(*p, image) {
                        velocities.push((p - p_prev) / prev_dt);
                        points.push(*p);
                        ids.push(id);
                    }
                }
            }
            (points, ids, velocities)
        } else {
            (Vec::new(), Vec::new(), Vec::new())
        };

        self.replenish(image, &mut points, &mut ids, &mut velocities);

        let state = &mut self.cameras[camera_id];
        state.pyramid = Some(pyr.clone());
        state.stamp = Some(stamp);
        state.points = points.clone();
        state.landmark_ids = ids.clone();

        (points, ids, velocities)
    }

    fn track_secondary_camera(
        &mut self,
        camera_id: usize,
        pyr: &Pyramid,
        left: Option<&(Vec<Vector2<f64>>, Vec<LandmarkId>)>,
    ) -> (Vec<Vector2<f64>>, Vec<LandmarkId>, Vec<Vector2<f64>>) {
        let mut points = Vec::new();
        let mut ids = Vec::new();
        let velocities = Vec::new();

        if let Some((left_points, left_ids)) = left {
            if !left_points.is_empty() {
                let left_pyr = self.cameras[0]
                    .pyramid
                    .clone()
                    .expect("left camera pyramid must exist once left_points is non-empty");
                let cols = left_pyr.levels[0].width as f64;
                let shift_x = cols * 90.0 / self.params.undistort_fov_deg;
                let seed = Vector2::new(shift_x, 0.0);

                let forward = track_points_seeded(&left_pyr, pyr, left_points, seed, &self.params.klt);
                for ((maybe_p, &p_left), &id) in forward.iter().zip(left_points.iter()).zip(left_ids.iter()) {
                    let Some(p) = maybe_p else { continue };
                    let back = track_points_seeded(pyr, &left_pyr, &[*p], -seed, &self.params.klt);
                    let Some(back_p) = back.into_iter().next().flatten() else { continue };
                    if (back_p - p_left).norm() <= self.params.klt.reverse_threshold {
                        points.push(*p);
                        ids.push(id);
                    }
                }
            }
        }

        self.cameras[camera_id].pyramid = Some(pyr.clone());
        (points, ids, velocities)
    }

    fn is_near_edge(&self, p: Vector2<f64>, image: &GrayImage) -> bool {
        p.x < 1.0 || p.y < 1.0 || p.x > image.width as f64 - 1.0 || p.y > image.height as f64 - 1.0
    }

    fn replenish(
        &mut self,
        image: &GrayImage,
        points: &mut Vec<Vector2<f64>>,
        ids: &mut Vec<LandmarkId>,
        velocities: &mut Vec<Vector2<f64>>,
    ) {
        let target = self.params.target_features;
        let threshold = (target * 3) / 4;
        if points.len() >= threshold {
            return;
        }
        let needed = target - points.len();
        let fresh = good_features_to_track(image, points, needed, self.params.feature_min_dist);
        for p in fresh {
            points.push(p);
            ids.push(self.fresh_landmark_id());
            velocities.push(Vector2::zeros());
        }
    }

    fn mean_parallax(&self, camera_id: usize, outputs: &[CameraTrackOutput]) -> f64 {
        let Some(cam) = outputs.get(camera_id) else { return 0.0 };
        if cam.features.is_empty() {
            return 0.0;
        }
        let sum: f64 = cam.features.iter().map(|f| f.pixel_velocity.norm()).sum();
        sum / cam.features.len() as f64
    }

    /// Spec §4.2 step 5: keyframe iff tracked-point count drops below
    /// threshold, mean parallax exceeds threshold, or time since last
    /// keyframe exceeds bound.
    fn decide_keyframe(&self, stamp: f64, tracked_count: usize, mean_parallax: f64) -> bool {
        if tracked_count < self.params.keyframe_min_tracked {
            return true;
        }
        if mean_parallax > self.params.keyframe_max_parallax {
            return true;
        }
        match self.last_keyframe_stamp {
            None => true,
            Some(last) => stamp - last > self.params.keyframe_max_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmvio_types::AgentId;

    fn checker(size: u32, offset: i32) -> GrayImage {
        let mut data = vec![0u8; (size * size) as usize];
        for y in 0..size {
            for x in 0..size {
                let v = if ((x as i32 + offset) / 8 + (y as i32) / 8) % 2 == 0 { 220 } else { 20 };
                data[(y * size + x) as usize] = v as u8;
            }
        }
        GrayImage::new(size, size, data)
    }

    #[test]
    fn first_frame_has_no_previous_points_and_still_produces_descriptor() {
        let mut tracker = FeatureTracker::new(AgentId(0), 1, TrackerParams::default());
        let img = checker(160, 0);
        let out = tracker.process_stereo_frame(0.0, &[img]);
        assert_eq!(out.cameras.len(), 1);
        // With no previous points, replenishment should populate most of the target.
        assert!(!out.cameras[0].features.is_empty());
    }

    #[test]
    fn second_frame_tracks_existing_landmarks() {
        let mut tracker = FeatureTracker::new(AgentId(0), 1, TrackerParams::default());
        let img0 = checker(160, 0);
        let out0 = tracker.process_stereo_frame(0.0, &[img0]);
        let ids0: Vec<_> = out0.cameras[0].features.iter().map(|f| f.landmark_id).collect();

        let img1 = checker(160, 2);
        let out1 = tracker.process_stereo_frame(0.1, &[img1]);
        let ids1: Vec<_> = out1.cameras[0].features.iter().map(|f| f.landmark_id).collect();

        let carried_over = ids1.iter().filter(|id| ids0.contains(id)).count();
        assert!(carried_over > 0);
    }

    #[test]
    fn empty_image_drops_all_points_and_triggers_keyframe() {
        let mut tracker = FeatureTracker::new(AgentId(0), 1, TrackerParams::default());
        let img0 = checker(160, 0);
        tracker.process_stereo_frame(0.0, &[img0]);

        let blank = GrayImage::filled(160, 160, 128);
        let out = tracker.process_stereo_frame(0.1, &[blank]);
        assert!(out.is_keyframe);
    }
}
