use nalgebra::Vector2;

use crate::image::GrayImage;

/// Shi-Tomasi-style "good features to track": picks corner-response local
/// maxima, greedily accepted in descending-score order subject to a minimum
/// spacing against both previously-accepted points and the caller's
/// existing tracked points (spec §4.2 "Replenishment").
pub fn good_features_to_track(
    image: &GrayImage,
    existing: &[Vector2<f64>],
    num_needed: usize,
    min_dist: f64,
) -> Vec<Vector2<f64>> {
    if num_needed == 0 {
        return Vec::new();
    }

    let border = 3i64;
    let mut candidates: Vec<(f64, Vector2<f64>)> = Vec::new();
    for y in border..(image.height as i64 - border) {
        for x in border..(image.width as i64 - border) {
            let score = corner_score(image, x as f64, y as f64);
            if score > 1.0 {
                candidates.push((score, Vector2::new(x as f64, y as f64)));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

    let mut accepted: Vec<Vector2<f64>> = Vec::with_capacity(num_needed);
    for (_, p) in candidates {
        if accepted.len() >= num_needed {
            break;
        }
        let far_enough = existing.iter().chain(accepted.iter()).all(|q| (q - p).norm() >= min_dist);
        if far_enough {
            accepted.push(p);
        }
    }
    accepted
}

fn corner_score(image: &GrayImage, x: f64, y: f64) -> f64 {
    let mut gxx = 0.0;
    let mut gxy = 0.0;
    let mut gyy = 0.0;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let (gx, gy) = image.gradient(x + dx as f64, y + dy as f64);
            gxx += gx * gx;
            gxy += gx * gy;
            gyy += gy * gy;
        }
    }
    let trace = gxx + gyy;
    let det = gxx * gyy - gxy * gxy;
    let disc = (trace * trace - 4.0 * det).max(0.0).sqrt();
    // Smaller eigenvalue of the structure tensor (Shi-Tomasi score).
    (trace - disc) * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(size: u32) -> GrayImage {
        let mut data = vec![0u8; (size * size) as usize];
        for y in 0..size {
            for x in 0..size {
                data[(y * size + x) as usize] = if (x / 8 + y / 8) % 2 == 0 { 220 } else { 20 };
            }
        }
        GrayImage::new(size, size, data)
    }

    #[test]
    fn finds_corners_respecting_min_distance() {
        let img = checker(64);
        let features = good_features_to_track(&img, &[], 10, 6.0);
        assert!(!features.is_empty());
        for i in 0..features.len() {
            for j in (i + 1)..features.len() {
                assert!((features[i] - features[j]).norm() >= 6.0 - 1e-9);
            }
        }
    }

    #[test]
    fn respects_existing_points() {
        let img = checker(64);
        let existing = vec![Vector2::new(32.0, 32.0)];
        let features = good_features_to_track(&img, &existing, 5, 6.0);
        for f in &features {
            assert!((f - existing[0]).norm() >= 6.0 - 1e-9);
        }
    }

    #[test]
    fn zero_needed_returns_empty() {
        let img = checker(64);
        assert!(good_features_to_track(&img, &[], 0, 6.0).is_empty());
    }
}
