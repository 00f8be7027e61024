//! `SwarmVioConfig` and friends: the deserializable configuration surface
//! (spec §6 "Configuration surface"), following `braid-config-data`'s
//! `BraidConfig2` conventions — `deny_unknown_fields`, a whole-struct
//! `#[serde(default)]` backed by real `Default` impls, and shell-expansion
//! of path-like fields via `shellexpand`.

use serde::{Deserialize, Serialize};
use swarmvio_geom::Pose;

use crate::error::{Error, Result};

/// Whether this agent re-broadcasts locally-detected loop edges or keeps
/// them local, waiting for an external pose-graph optimizer to request them
/// (spec §4.5 step 4, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PgoMode {
    NonDist,
    Distributed,
}

impl Default for PgoMode {
    fn default() -> Self {
        PgoMode::NonDist
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EstimationMode {
    SingleDrone,
    DistributedConsensus,
    Server,
}

impl Default for EstimationMode {
    fn default() -> Self {
        EstimationMode::SingleDrone
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraConfiguration {
    StereoPinhole,
    StereoFisheye,
    PinholeDepth,
    FourcornerFisheye,
}

impl Default for CameraConfiguration {
    fn default() -> Self {
        CameraConfiguration::StereoPinhole
    }
}

impl CameraConfiguration {
    /// Number of physical camera extrinsics this configuration requires.
    pub fn expected_camera_count(self) -> usize {
        match self {
            CameraConfiguration::StereoPinhole | CameraConfiguration::StereoFisheye => 2,
            CameraConfiguration::PinholeDepth => 1,
            CameraConfiguration::FourcornerFisheye => 4,
        }
    }
}

/// Iteration/time caps passed to the nonlinear least-squares solver
/// (spec §6 "options.*").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolverOptions {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_max_solver_time_secs")]
    pub max_solver_time_secs: f64,
}

fn default_max_iterations() -> usize {
    8
}
fn default_max_solver_time_secs() -> f64 {
    0.04
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            max_iterations: default_max_iterations(),
            max_solver_time_secs: default_max_solver_time_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EstimatorConfig {
    pub min_solve_frames: usize,
    pub max_sld_win_size: usize,
    pub options: SolverOptions,
    pub estimate_extrinsic: bool,
    pub estimate_td: bool,
    pub td_initial: f64,
    pub td_max_diff: f64,
    pub fuse_dep: bool,
    pub max_depth_to_fuse: f64,
    pub min_inv_dep: f64,
    /// Minimum inlier correspondences required before RANSAC PnP is even
    /// attempted (spec §4.4, §8 "PnP with fewer than pnp_min_inliers").
    pub pnp_min_inliers: usize,
    /// Number of leading IMU samples used to set the initial gravity
    /// alignment, gyro bias and accel bias (spec §4.3 "Initialization").
    pub init_imu_num: usize,
    /// Solve rate for the distributed-consensus solver thread (spec §5).
    pub estimator_timer_freq: f64,
    /// Soft backpressure warning threshold for `viokf_queue` (spec §5).
    pub warn_pending_frames: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        EstimatorConfig {
            min_solve_frames: 2,
            max_sld_win_size: 10,
            options: SolverOptions::default(),
            estimate_extrinsic: false,
            estimate_td: false,
            td_initial: 0.0,
            td_max_diff: 0.05,
            fuse_dep: false,
            max_depth_to_fuse: 5.0,
            min_inv_dep: 1.0 / 50.0,
            pnp_min_inliers: 8,
            init_imu_num: 100,
            estimator_timer_freq: 1.0,
            warn_pending_frames: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FrontEndConfig {
    pub feature_min_dist: f64,
    pub undistort_fov: f64,
    pub focal_length: f64,
    pub knn_match_ratio: f64,
    pub show_raw_image: bool,
}

impl Default for FrontEndConfig {
    fn default() -> Self {
        FrontEndConfig {
            feature_min_dist: 20.0,
            undistort_fov: 200.0,
            focal_length: 250.0,
            knn_match_ratio: 0.8,
            show_raw_image: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoopConfig {
    pub loop_inlier_feature_num: usize,
    pub accept_loop_max_yaw: f64,
    pub accept_loop_max_pos: f64,
    pub gravity_check_thres: f64,
    /// Pixel-distance gate applied only to intra-frame (left-right) KNN
    /// matches, not inter-frame ones (spec §4.5 step 2).
    pub search_local_dist: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        LoopConfig {
            loop_inlier_feature_num: 15,
            accept_loop_max_yaw: 0.3,
            accept_loop_max_pos: 1.0,
            gravity_check_thres: 0.1,
            search_local_dist: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NetworkConfig {
    pub lcm_uri: String,
    pub send_img: bool,
    pub send_whole_img_desc: bool,
    pub recv_msg_duration_ms: u64,
    pub enable_pub_remote_frame: bool,
    pub enable_sub_remote_frame: bool,
    pub lazy_broadcast_keyframe: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            lcm_uri: "udpm://239.255.76.67:7667?ttl=1".to_string(),
            send_img: false,
            send_whole_img_desc: true,
            recv_msg_duration_ms: 10,
            enable_pub_remote_frame: true,
            enable_sub_remote_frame: true,
            lazy_broadcast_keyframe: false,
        }
    }
}

/// Top-level configuration for one agent (spec §6 "Configuration surface").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SwarmVioConfig {
    pub self_id: u32,
    pub pgo_mode: PgoMode,
    pub estimation_mode: EstimationMode,
    pub camera_configuration: CameraConfiguration,
    /// Extrinsic (body-to-camera) pose per physical camera, in the order
    /// the front-end expects them. Length must match
    /// `camera_configuration.expected_camera_count()`.
    pub camera_extrinsics: Vec<Pose>,
    pub estimator: EstimatorConfig,
    pub frontend: FrontEndConfig,
    pub loop_detector: LoopConfig,
    pub network: NetworkConfig,
}

impl Default for SwarmVioConfig {
    fn default() -> Self {
        SwarmVioConfig {
            self_id: 0,
            pgo_mode: PgoMode::default(),
            estimation_mode: EstimationMode::default(),
            camera_configuration: CameraConfiguration::default(),
            camera_extrinsics: vec![Pose::identity(), Pose::identity()],
            estimator: EstimatorConfig::default(),
            frontend: FrontEndConfig::default(),
            loop_detector: LoopConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl SwarmVioConfig {
    /// Validates cross-field invariants that cannot be expressed as a
    /// per-field default. Configuration errors are fatal at initialization
    /// (spec §7 "Configuration error").
    pub fn validate(&self) -> Result<()> {
        let expected = self.camera_configuration.expected_camera_count();
        if self.camera_extrinsics.len() != expected {
            return Err(Error::Config(format!(
                "camera_configuration {:?} requires {} camera_extrinsics entries, found {}",
                self.camera_configuration,
                expected,
                self.camera_extrinsics.len()
            )));
        }
        if self.estimation_mode == EstimationMode::DistributedConsensus
            && self.estimator.estimator_timer_freq <= 0.0
        {
            return Err(Error::Config(
                "estimator_timer_freq must be positive in DISTRIBUTED_CONSENSUS mode".to_string(),
            ));
        }
        if self.estimator.min_inv_dep <= 0.0 {
            return Err(Error::Config("min_inv_dep must be positive".to_string()));
        }
        Ok(())
    }

    /// Reads and validates a config from a TOML file, shell-expanding `path`
    /// first (so `~/cfg/swarmvio.toml` works), mirroring
    /// `braid-config-data::parse_config_file`.
    pub fn load(path: &str) -> Result<SwarmVioConfig> {
        let expanded = shellexpand::full(path)?;
        let contents = std::fs::read_to_string(expanded.as_ref())?;
        let config: SwarmVioConfig = toml::from_str(&contents).map_err(Error::from)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        SwarmVioConfig::default().validate().unwrap();
    }

    #[test]
    fn mismatched_extrinsic_count_is_rejected() {
        let mut cfg = SwarmVioConfig::default();
        cfg.camera_configuration = CameraConfiguration::FourcornerFisheye;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_round_trips_through_toml() {
        let cfg = SwarmVioConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let back: SwarmVioConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, cfg);
    }
}
