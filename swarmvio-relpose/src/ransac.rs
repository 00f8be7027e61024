//! Generic RANSAC driver shared by central PnP and non-central GP3P
//! (spec §4.4). Both solvers differ only in how a minimal-sample hypothesis
//! is generated and how a hypothesis's predicted bearing for a given
//! observation is computed; scoring and the final nonlinear refinement are
//! identical.

use nalgebra::Vector3;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use swarmvio_geom::Pose;

/// Outcome of a RANSAC pose solve.
#[derive(Debug, Clone)]
pub enum PnpResult {
    /// Too few input correspondences to even attempt RANSAC (spec §8:
    /// "PnP with fewer than `pnp_min_inliers` valid points returns 'not
    /// attempted' without invoking RANSAC").
    NotAttempted,
    /// RANSAC ran but never found a hypothesis with enough inliers.
    Failed,
    Solved {
        pose: Pose,
        inlier_indices: Vec<usize>,
    },
}

pub struct RansacParams {
    pub iterations: usize,
    pub inlier_angular_threshold: f64,
    pub min_inliers: usize,
    /// Target probability of having sampled an all-inlier minimal set at
    /// least once; used for adaptive early termination. `None` disables it
    /// and always runs the full iteration budget.
    pub confidence: Option<f64>,
    pub seed: u64,
}

/// One observation: a world point plus the predicted bearing direction a
/// candidate pose would produce for it. `predict` receives the body-pose
/// hypothesis and must return the unit bearing the observation would have
/// under that hypothesis (identity extrinsic for the central case, or
/// `extrinsic.inverse() ∘ body_pose.inverse()` composed for a rigidly
/// mounted camera in the non-central case).
pub trait RansacObservation {
    fn world_point(&self) -> Vector3<f64>;
    fn observed_bearing(&self) -> Vector3<f64>;
    fn predict_bearing(&self, hypothesis: &Pose) -> Vector3<f64>;
}

fn angular_error(predicted: Vector3<f64>, observed: Vector3<f64>) -> f64 {
    let p = predicted.normalize();
    let o = observed.normalize();
    (p.dot(&o)).clamp(-1.0, 1.0).acos()
}

/// Runs RANSAC given a hypothesis generator that produces a candidate pose
/// from a minimal sample of observation indices (returns `None` if the
/// sample is degenerate).
pub fn run_ransac<O: RansacObservation>(
    observations: &[O],
    min_sample: usize,
    params: &RansacParams,
    hypothesize: impl Fn(&[usize]) -> Option<Pose>,
) -> PnpResult {
    if observations.len() < params.min_inliers || observations.len() < min_sample {
        return PnpResult::NotAttempted;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let mut indices: Vec<usize> = (0..observations.len()).collect();
    let mut best: Option<(Pose, Vec<usize>)> = None;
    let n = observations.len();

    let mut adaptive_budget = params.iterations;
    let mut iter = 0;
    while iter < params.iterations.min(adaptive_budget) {
        iter += 1;
        indices.shuffle(&mut rng);
        let sample = &indices[..min_sample];
        let Some(hypothesis) = hypothesize(sample) else {
            continue;
        };

        let inliers: Vec<usize> = (0..n)
            .filter(|&i| {
                let predicted = observations[i].predict_bearing(&hypothesis);
                angular_error(predicted, observations[i].observed_bearing()) <= params.inlier_angular_threshold
            })
            .collect();

        let better = match &best {
            None => true,
            Some((_, best_inliers)) => inliers.len() > best_inliers.len(),
        };
        if better {
            best = Some((hypothesis, inliers));
        }

        if let (Some(confidence), Some((_, best_inliers))) = (params.confidence, &best) {
            let w = best_inliers.len() as f64 / n as f64;
            let denom = (1.0 - w.powi(min_sample as i32)).ln();
            if w > 0.0 && denom < 0.0 {
                let needed = ((1.0 - confidence).ln() / denom).ceil();
                if needed.is_finite() && (needed as usize) < adaptive_budget {
                    adaptive_budget = (needed as usize).max(iter);
                }
            }
        }
    }

    match best {
        Some((pose, inliers)) if inliers.len() >= params.min_inliers => PnpResult::Solved {
            pose,
            inlier_indices: inliers,
        },
        _ => PnpResult::Failed,
    }
}
