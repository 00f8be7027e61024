//! Shared data model, configuration and error types for the swarm VIO
//! estimator. Every other `swarmvio-*` crate depends on this one for its
//! vocabulary (`Frame`, `Landmark`, `VisualImageDescArray`, `LoopEdge`,
//! `SwarmVioConfig`) rather than redefining it locally.

pub mod config;
pub mod desc;
pub mod error;
pub mod ids;
pub mod imu;
pub mod landmark;
pub mod loop_edge;
pub mod preintegration;

pub mod frame;

pub use config::{
    CameraConfiguration, EstimationMode, EstimatorConfig, FrontEndConfig, LoopConfig,
    NetworkConfig, PgoMode, SolverOptions, SwarmVioConfig,
};
pub use desc::{CameraImageDesc, VisualImageDescArray};
pub use error::{Error, Result};
pub use frame::{Frame, Odometry, SlidingWindow};
pub use ids::{AgentId, FrameId, LandmarkId};
pub use imu::ImuSample;
pub use landmark::{Landmark, LandmarkFlag, LandmarkObservation};
pub use loop_edge::LoopEdge;
pub use preintegration::{Covariance15, PreintegrationBlock};
