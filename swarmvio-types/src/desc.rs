use serde::{Deserialize, Serialize};
use swarmvio_geom::Pose;

use crate::ids::{AgentId, FrameId};
use crate::landmark::LandmarkObservation;

/// Per-camera payload of a keyframe descriptor (spec §6 "Keyframe descriptor").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraImageDesc {
    pub camera_id: u8,
    pub extrinsic: Pose,
    /// Global image descriptor used by the loop detector's retrieval step.
    pub global_descriptor: Vec<f32>,
    pub landmarks: Vec<LandmarkObservation>,
}

/// A broadcastable keyframe descriptor (spec §6 "Outputs").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualImageDescArray {
    pub frame_id: FrameId,
    pub drone_id: AgentId,
    pub reference_frame_id: FrameId,
    pub stamp: f64,
    pub pose_drone: Pose,
    pub sld_win_status: Vec<FrameId>,
    pub cameras: Vec<CameraImageDesc>,
    pub is_keyframe: bool,
    /// A lazy frame carries no landmark payload, only descriptor and pose
    /// (spec §6 "Lazy broadcast").
    pub is_lazy_frame: bool,
    pub matched_frame: Option<FrameId>,
    pub matched_drone: Option<AgentId>,
    pub send_to_backend: bool,
}

impl VisualImageDescArray {
    /// Strips per-camera landmark payloads in place, turning this into a
    /// lazy (descriptor + pose only) broadcast.
    pub fn make_lazy(&mut self) {
        self.is_lazy_frame = true;
        for cam in &mut self.cameras {
            cam.landmarks.clear();
        }
    }
}
