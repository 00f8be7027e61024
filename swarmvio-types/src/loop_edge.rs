use nalgebra::Matrix6;
use serde::{Deserialize, Serialize};
use swarmvio_geom::Pose;

use crate::ids::FrameId;

/// A verified constraint between two keyframes, possibly from different
/// agents (spec §3 "LoopEdge", §4.5 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopEdge {
    pub frame_a: FrameId,
    pub frame_b: FrameId,
    pub relative_pose: Pose,
    pub covariance: Matrix6<f64>,
    pub inliers: u32,
}
