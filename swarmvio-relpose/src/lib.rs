//! Relative-pose recovery: central PnP, non-central GP3P, and loop-closure
//! verification (spec C5, §4.4).

pub mod central;
pub mod dlt;
pub mod gp3p;
pub mod ransac;
pub mod refine;
pub mod verify;

pub use central::{solve_central_pnp, CentralObservation};
pub use dlt::solve_dlt_pose;
pub use gp3p::{solve_gp3p, Gp3pObservation};
pub use ransac::{PnpResult, RansacObservation, RansacParams};
pub use refine::{refine_pose, RefineObservation};
pub use verify::{verify_loop_pose, VerifyRejection, VerifyThresholds};
