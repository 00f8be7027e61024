//! Sliding-window VIO factor-graph estimator (spec C6/C7): parameter
//! store, residual factors, marginalization, initialization, landmark
//! triangulation, the `levenberg_marquardt` problem assembly, and the
//! per-frame solve cycle that ties them together.

pub mod factors;
pub mod init;
pub mod marginalization;
pub mod problem;
pub mod solve;
pub mod state;
pub mod triangulate;

pub use factors::{depth_residual, huber_weight, imu_residual, projection_residual};
pub use init::{initialize_from_imu, InitializationResult};
pub use marginalization::Prior;
pub use problem::{ImuFactor, ProjectionFactor, ProjectionObservation, SlidingWindowProblem};
pub use solve::Estimator;
pub use state::{ExtrinsicParam, FrameParam, WindowState};
pub use triangulate::{mark_if_outlier, promote_if_ready, triangulate_midpoint, try_initialize_landmark};
