//! Cross-agent loop detection: a keyframe database, descriptor-similarity
//! retrieval, per-camera KNN matching, §4.4 geometric verification, and
//! the matched-frame wait policy for remote keyframes that race ahead of
//! their local match (spec C8, §4.5).

pub mod database;
pub mod detector;
pub mod matching;
pub mod retrieval;
pub mod wait;

pub use database::{KeyframeDatabase, KeyframeKey};
pub use detector::{AdmitOutcome, LoopDetector, LoopDetectorParams};
pub use matching::{knn_match_camera, local_distance_gate, MatchedLandmark};
pub use retrieval::{retrieve_candidates, RetrievalParams};
pub use wait::MatchedFrameWaiter;
