//! Loop camera / descriptor builder (spec §4.2 data-flow output, C4):
//! turns tracked pixel features into normalized bearings plus a global
//! image descriptor, and assembles the broadcastable
//! [`VisualImageDescArray`].
//!
//! The neural network that produces keypoint/global descriptors is an
//! external collaborator (out of scope); [`GlobalDescriptorExtractor`] is
//! the seam it plugs into. [`HistogramDescriptor`] is a cheap deterministic
//! stand-in usable for local testing of the loop detector's retrieval step.

use std::collections::HashMap;

use swarmvio_geom::CameraModel;
use swarmvio_types::{
    AgentId, CameraImageDesc, FrameId, LandmarkId, LandmarkObservation, Odometry,
    VisualImageDescArray,
};

use crate::image::GrayImage;
use crate::tracker::CameraTrackOutput;

/// Produces a global image descriptor used by the loop detector's
/// retrieval step (spec §4.5 step 1).
pub trait GlobalDescriptorExtractor {
    fn extract(&self, image: &GrayImage) -> Vec<f32>;
}

/// A coarse intensity-histogram descriptor. Not a substitute for a learned
/// global descriptor, but sufficient to exercise retrieval/matching logic
/// without depending on an external model.
pub struct HistogramDescriptor {
    pub bins: usize,
}

impl Default for HistogramDescriptor {
    fn default() -> Self {
        HistogramDescriptor { bins: 32 }
    }
}

impl GlobalDescriptorExtractor for HistogramDescriptor {
    fn extract(&self, image: &GrayImage) -> Vec<f32> {
        let mut hist = vec![0f32; self.bins];
        if image.data.is_empty() {
            return hist;
        }
        let bin_width = 256.0 / self.bins as f64;
        for &px in &image.data {
            let bin = ((px as f64) / bin_width) as usize;
            hist[bin.min(self.bins - 1)] += 1.0;
        }
        let total = image.data.len() as f32;
        for v in &mut hist {
            *v /= total;
        }
        hist
    }
}

pub struct LoopDescriptorBuilder<'a, D: GlobalDescriptorExtractor> {
    cameras: &'a [CameraModel],
    extractor: D,
}

impl<'a, D: GlobalDescriptorExtractor> LoopDescriptorBuilder<'a, D> {
    pub fn new(cameras: &'a [CameraModel], extractor: D) -> Self {
        LoopDescriptorBuilder { cameras, extractor }
    }

    /// Builds a [`VisualImageDescArray`] from one stereo frame's tracked
    /// features plus the raw images (needed for the global descriptor).
    /// `depths` is the estimator's current solved depth per landmark (spec
    /// §4.7 "Shared sliding-window synchronization"); a track whose
    /// landmark isn't in it yet (not triangulated/initialized) gets `None`.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        frame_id: FrameId,
        drone_id: AgentId,
        stamp: f64,
        odom: Odometry,
        sld_win_status: Vec<FrameId>,
        images: &[GrayImage],
        tracks: &[CameraTrackOutput],
        is_keyframe: bool,
        depths: &HashMap<LandmarkId, f64>,
    ) -> VisualImageDescArray {
        assert_eq!(images.len(), self.cameras.len());
        assert_eq!(tracks.len(), self.cameras.len());

        let cameras = images
            .iter()
            .zip(tracks.iter())
            .zip(self.cameras.iter())
            .map(|((image, track), model)| {
                let landmarks = track
                    .features
                    .iter()
                    .map(|f| LandmarkObservation {
                        frame_id,
                        camera_id: track.camera_id,
                        bearing: model.pixel_to_bearing(f.pixel),
                        pixel_velocity: f.pixel_velocity,
                        td_at_observation: 0.0,
                        depth: depths.get(&f.landmark_id).copied(),
                    })
                    .collect();
                CameraImageDesc {
                    camera_id: track.camera_id,
                    extrinsic: *model.extrinsic(),
                    global_descriptor: self.extractor.extract(image),
                    landmarks,
                }
            })
            .collect();

        VisualImageDescArray {
            frame_id,
            drone_id,
            reference_frame_id: frame_id,
            stamp,
            pose_drone: odom.pose,
            sld_win_status,
            cameras,
            is_keyframe,
            is_lazy_frame: false,
            matched_frame: None,
            matched_drone: None,
            send_to_backend: is_keyframe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;
    use swarmvio_geom::Pose;
    use swarmvio_types::LandmarkId;

    fn flat_camera() -> CameraModel {
        use nalgebra::Vector5;
        use opencv_ros_camera::{Distortion, RosOpenCvIntrinsics};
        let distortion = Distortion::from_opencv_vec(Vector5::zeros());
        let intrinsics = RosOpenCvIntrinsics::from_params_with_distortion(250.0, 0.0, 250.0, 320.0, 240.0, distortion);
        CameraModel::new(640, 480, intrinsics, Pose::identity())
    }

    #[test]
    fn histogram_descriptor_sums_to_one() {
        let img = GrayImage::filled(16, 16, 100);
        let hist = HistogramDescriptor::default().extract(&img);
        let sum: f32 = hist.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn build_produces_one_camera_desc_with_landmarks() {
        let cams = vec![flat_camera()];
        let builder = LoopDescriptorBuilder::new(&cams, HistogramDescriptor::default());
        let landmark_id = LandmarkId::new(AgentId(0), 0);
        let track = CameraTrackOutput {
            camera_id: 0,
            features: vec![crate::tracker::TrackedFeature {
                landmark_id,
                pixel: Vector2::new(320.0, 240.0),
                pixel_velocity: Vector2::zeros(),
            }],
        };
        let desc = builder.build(
            FrameId(1),
            AgentId(0),
            0.0,
            Odometry::identity(),
            vec![FrameId(1)],
            &[GrayImage::filled(640, 480, 128)],
            &[track],
            true,
            &HashMap::new(),
        );
        assert_eq!(desc.cameras.len(), 1);
        assert_eq!(desc.cameras[0].landmarks.len(), 1);
        assert_eq!(desc.cameras[0].landmarks[0].depth, None);
    }

    #[test]
    fn build_populates_depth_for_solved_landmarks() {
        let cams = vec![flat_camera()];
        let builder = LoopDescriptorBuilder::new(&cams, HistogramDescriptor::default());
        let landmark_id = LandmarkId::new(AgentId(0), 0);
        let track = CameraTrackOutput {
            camera_id: 0,
            features: vec![crate::tracker::TrackedFeature {
                landmark_id,
                pixel: Vector2::new(320.0, 240.0),
                pixel_velocity: Vector2::zeros(),
            }],
        };
        let mut depths = HashMap::new();
        depths.insert(landmark_id, 3.5);
        let desc = builder.build(
            FrameId(1),
            AgentId(0),
            0.0,
            Odometry::identity(),
            vec![FrameId(1)],
            &[GrayImage::filled(640, 480, 128)],
            &[track],
            true,
            &depths,
        );
        assert_eq!(desc.cameras[0].landmarks[0].depth, Some(3.5));
    }
}
