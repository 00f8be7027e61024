use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::ids::{FrameId, LandmarkId};

/// Lifecycle flag for a landmark (spec §3). Ordinals do not encode a
/// `<`/`>=` ordering the way spec prose's "`flag ≥ INITIALIZED`" phrasing
/// suggests at a glance — `OUTLIER` is a terminal state reached only from
/// `INITIALIZED`, not something above it. Callers needing the spec's
/// "usable as a PnP anchor" predicate should use [`Landmark::usable_for_pnp`]
/// rather than comparing flags directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LandmarkFlag {
    Uninitialized,
    Triangulated,
    Initialized,
    Outlier,
}

/// One observation of a landmark in a single frame/camera.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LandmarkObservation {
    pub frame_id: FrameId,
    pub camera_id: u8,
    /// Normalized bearing vector, `‖bearing‖ == 1`.
    pub bearing: Vector3<f64>,
    /// Pixel velocity: `(current - previous) / dt`.
    pub pixel_velocity: Vector2<f64>,
    pub td_at_observation: f64,
    pub depth: Option<f64>,
}

/// A tracked 3D point (spec §3 "Landmark").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Landmark {
    pub id: LandmarkId,
    /// `track[0]` is the anchor observation; it defines the anchor frame and
    /// camera that `inverse_depth` is parameterized against.
    pub track: Vec<LandmarkObservation>,
    pub flag: LandmarkFlag,
    /// Position in the reference frame of the first observing agent.
    pub position: Vector3<f64>,
    /// Inverse depth at the anchor observation; this, not `position`, is
    /// the quantity the solver actually optimizes.
    pub inverse_depth: f64,
}

impl Landmark {
    pub fn new(id: LandmarkId, anchor: LandmarkObservation) -> Self {
        Landmark {
            id,
            track: vec![anchor],
            flag: LandmarkFlag::Uninitialized,
            position: Vector3::zeros(),
            inverse_depth: 0.0,
        }
    }

    pub fn anchor(&self) -> &LandmarkObservation {
        self.track.first().expect("landmark track is never empty")
    }

    pub fn add_observation(&mut self, obs: LandmarkObservation) {
        self.track.push(obs);
    }

    /// True for landmarks eligible as PnP anchors (spec §4.3 step 2,
    /// "PnP against landmarks with flag ≥ INITIALIZED"). Outliers are
    /// excluded even though they were once initialized.
    pub fn usable_for_pnp(&self) -> bool {
        self.flag == LandmarkFlag::Initialized
    }

    /// Spec §8 invariant 2: `flag ≥ INITIALIZED` implies a track of at
    /// least two observations.
    pub fn has_min_track_for_initialization(&self) -> bool {
        self.track.len() >= 2
    }

    /// Drops the anchor observation, re-anchoring the track on the next
    /// surviving observation. Used when the anchor frame is marginalized
    /// out of the sliding window (spec §3 "removing the anchor frame
    /// requires re-anchoring or dropping the landmark").
    pub fn re_anchor(&mut self) -> bool {
        if self.track.len() > 1 {
            self.track.remove(0);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::AgentId;

    fn obs(frame: u64) -> LandmarkObservation {
        LandmarkObservation {
            frame_id: FrameId(frame),
            camera_id: 0,
            bearing: Vector3::new(0.0, 0.0, 1.0),
            pixel_velocity: Vector2::zeros(),
            td_at_observation: 0.0,
            depth: None,
        }
    }

    #[test]
    fn usable_for_pnp_excludes_outliers() {
        let mut lm = Landmark::new(LandmarkId::new(AgentId(0), 1), obs(0));
        lm.flag = LandmarkFlag::Outlier;
        assert!(!lm.usable_for_pnp());
        lm.flag = LandmarkFlag::Initialized;
        assert!(lm.usable_for_pnp());
    }

    #[test]
    fn re_anchor_drops_oldest_observation() {
        let mut lm = Landmark::new(LandmarkId::new(AgentId(0), 1), obs(0));
        lm.add_observation(obs(1));
        assert!(lm.re_anchor());
        assert_eq!(lm.anchor().frame_id, FrameId(1));
    }

    #[test]
    fn re_anchor_fails_on_single_observation_track() {
        let mut lm = Landmark::new(LandmarkId::new(AgentId(0), 1), obs(0));
        assert!(!lm.re_anchor());
    }
}
