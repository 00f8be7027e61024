//! Input types the process ingests on its image and IMU ingestion threads
//! (spec §5, §6 "Inputs"). Decoding raw camera transport/compressed frames
//! into [`GrayImage`]s is an external collaborator's job; this process
//! only consumes the normalized result.

use swarmvio_frontend::GrayImage;

/// One synchronized multi-camera frame, already split and normalized to
/// 8-bit grayscale per camera (spec §6 "Image topics").
#[derive(Debug, Clone)]
pub struct ImageFrame {
    pub stamp: f64,
    pub images: Vec<GrayImage>,
}
