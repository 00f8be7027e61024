use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use swarmvio_geom::Pose;

use crate::ids::{AgentId, FrameId};
use crate::preintegration::PreintegrationBlock;

/// 6-DoF pose plus velocity (spec §3 "Frame.odom").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Odometry {
    pub pose: Pose,
    pub velocity: Vector3<f64>,
}

impl Odometry {
    pub fn identity() -> Self {
        Odometry {
            pose: Pose::identity(),
            velocity: Vector3::zeros(),
        }
    }
}

impl Default for Odometry {
    fn default() -> Self {
        Odometry::identity()
    }
}

/// A sliding-window entry (spec §3 "Frame (sliding-window entry)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub frame_id: FrameId,
    pub stamp: f64,
    pub drone_id: AgentId,
    pub odom: Odometry,
    pub ba: Vector3<f64>,
    pub bg: Vector3<f64>,
    /// Pre-integration block from the previous frame in the window; `None`
    /// only for the very first frame an agent ever admits.
    pub pre_integrations: Option<PreintegrationBlock>,
    /// Drives marginalization policy: non-keyframes are never retained once
    /// superseded.
    pub is_keyframe: bool,
    /// The ordered frame-ids this agent currently holds; broadcast for peer
    /// awareness (part of `VisualImageDescArray::sld_win_status`).
    pub sld_win_status: Vec<FrameId>,
}

impl Frame {
    pub fn new(frame_id: FrameId, stamp: f64, drone_id: AgentId) -> Self {
        Frame {
            frame_id,
            stamp,
            drone_id,
            odom: Odometry::identity(),
            ba: Vector3::zeros(),
            bg: Vector3::zeros(),
            pre_integrations: None,
            is_keyframe: false,
            sld_win_status: Vec::new(),
        }
    }
}

/// A bounded, ordered window of keyframes (spec §3 "SlidingWindow").
///
/// Invariant: `frame_id` and `stamp` are strictly increasing front-to-back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlidingWindow {
    frames: Vec<Frame>,
}

impl SlidingWindow {
    pub fn new() -> Self {
        SlidingWindow { frames: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut [Frame] {
        &mut self.frames
    }

    pub fn oldest(&self) -> Option<&Frame> {
        self.frames.first()
    }

    pub fn newest(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn newest_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// Appends `frame`, enforcing the strictly-increasing id/stamp
    /// invariant. Returns `false` without mutating if the ordering would be
    /// violated.
    pub fn push(&mut self, frame: Frame) -> bool {
        if let Some(newest) = self.frames.last() {
            if frame.frame_id.0 <= newest.frame_id.0 || frame.stamp <= newest.stamp {
                return false;
            }
        }
        self.frames.push(frame);
        true
    }

    /// Removes and returns the oldest frame, the first step of
    /// marginalization (spec §3 "Lifecycles", §4.3 step 6).
    pub fn pop_oldest(&mut self) -> Option<Frame> {
        if self.frames.is_empty() {
            None
        } else {
            Some(self.frames.remove(0))
        }
    }

    /// Removes and returns the frame with the given id, wherever it sits
    /// in the window. Used by marginalization when the frame chosen for
    /// removal is a non-keyframe that is not necessarily the oldest.
    pub fn remove(&mut self, frame_id: FrameId) -> Option<Frame> {
        let idx = self.frames.iter().position(|f| f.frame_id == frame_id)?;
        Some(self.frames.remove(idx))
    }

    pub fn frame_ids(&self) -> Vec<FrameId> {
        self.frames.iter().map(|f| f.frame_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_rejects_non_increasing_id() {
        let mut w = SlidingWindow::new();
        assert!(w.push(Frame::new(FrameId(1), 1.0, AgentId(0))));
        assert!(!w.push(Frame::new(FrameId(1), 2.0, AgentId(0))));
        assert!(!w.push(Frame::new(FrameId(2), 0.5, AgentId(0))));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn marginalization_trims_from_front() {
        let mut w = SlidingWindow::new();
        for i in 1..=3u64 {
            assert!(w.push(Frame::new(FrameId(i), i as f64, AgentId(0))));
        }
        let oldest = w.pop_oldest().unwrap();
        assert_eq!(oldest.frame_id, FrameId(1));
        assert_eq!(w.oldest().unwrap().frame_id, FrameId(2));
    }
}
