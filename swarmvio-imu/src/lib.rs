//! Time-indexed IMU buffer and midpoint pre-integration (spec §4.1, C2).

pub mod buffer;
pub mod noise;

pub use buffer::{compose, integrate, PreintegrationBuffer};
pub use noise::ImuNoiseModel;
