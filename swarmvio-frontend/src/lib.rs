//! KLT feature tracking and loop-camera descriptor building (spec C3, C4).

pub mod corner;
pub mod image;
pub mod klt;
pub mod loop_desc;
pub mod tracker;

pub use image::{GrayImage, Pyramid};
pub use klt::{track_points, track_points_seeded, track_with_reverse_check, KltParams};
pub use loop_desc::{GlobalDescriptorExtractor, HistogramDescriptor, LoopDescriptorBuilder};
pub use tracker::{CameraTrackOutput, FeatureTracker, StereoFrameTrackOutput, TrackedFeature, TrackerParams};
