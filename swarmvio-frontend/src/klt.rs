use nalgebra::Vector2;

use crate::image::{GrayImage, Pyramid};

/// Pyramid Lucas-Kanade parameters (spec §4.2 "Forward flow").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KltParams {
    pub half_window: i32,
    pub levels: usize,
    pub max_iterations: u32,
    pub epsilon: f64,
    /// Forward-reverse consistency threshold, in pixels (spec §4.2
    /// "Reverse flow").
    pub reverse_threshold: f64,
}

impl Default for KltParams {
    fn default() -> Self {
        KltParams {
            half_window: 10, // 21x21 window
            levels: 3,
            max_iterations: 30,
            epsilon: 0.01,
            reverse_threshold: 0.5,
        }
    }
}

/// Tracks `prev_points` from `prev` into `curr` via coarse-to-fine
/// Lucas-Kanade, then verifies each survivor with a reverse track back into
/// `prev`; entries whose reverse residual exceeds
/// `params.reverse_threshold` are dropped. This is the concrete contract
/// behind `opticalflowTrack`: CPU implementation here, a GPU backend could
/// implement the same signature.
pub fn track_with_reverse_check(
    prev_pyr: &Pyramid,
    curr_pyr: &Pyramid,
    prev_points: &[Vector2<f64>],
    params: &KltParams,
) -> Vec<Option<Vector2<f64>>> {
    let forward = track_points(prev_pyr, curr_pyr, prev_points, params);
    forward
        .into_iter()
        .zip(prev_points.iter())
        .map(|(fwd, &p0)| {
            let fwd = fwd?;
            let back = track_single_point(curr_pyr, prev_pyr, fwd, params)?;
            let residual = (back - p0).norm();
            if residual <= params.reverse_threshold {
                Some(fwd)
            } else {
                None
            }
        })
        .collect()
}

pub fn track_points(
    prev_pyr: &Pyramid,
    curr_pyr: &Pyramid,
    prev_points: &[Vector2<f64>],
    params: &KltParams,
) -> Vec<Option<Vector2<f64>>> {
    prev_points
        .iter()
        .map(|&p0| track_single_point(prev_pyr, curr_pyr, p0, params))
        .collect()
}

/// Seeded batch variant of [`track_points`] for cross-image (e.g.
/// left→right stereo) matching where `prev_points` and `curr`'s expected
/// locations differ by a known predicted shift.
pub fn track_points_seeded(
    prev_pyr: &Pyramid,
    curr_pyr: &Pyramid,
    prev_points: &[Vector2<f64>],
    seed_shift: Vector2<f64>,
    params: &KltParams,
) -> Vec<Option<Vector2<f64>>> {
    prev_points
        .iter()
        .map(|&p0| track_single_point_seeded(prev_pyr, curr_pyr, p0, seed_shift, params))
        .collect()
}

fn track_single_point(prev_pyr: &Pyramid, curr_pyr: &Pyramid, p0: Vector2<f64>, params: &KltParams) -> Option<Vector2<f64>> {
    track_single_point_seeded(prev_pyr, curr_pyr, p0, Vector2::zeros(), params)
}

/// Like [`track_single_point`], but the initial (full-resolution) guess for
/// `curr`'s location is `p0 + seed_shift` rather than `p0`. Used for
/// left→right stereo matching, where the expected shift is predicted from
/// the field of view rather than assumed zero (spec §4.2 "Left→right
/// matching").
pub fn track_single_point_seeded(
    prev_pyr: &Pyramid,
    curr_pyr: &Pyramid,
    p0: Vector2<f64>,
    seed_shift: Vector2<f64>,
    params: &KltParams,
) -> Option<Vector2<f64>> {
    let levels = prev_pyr.levels.len();
    let coarsest_scale = 2f64.powi(levels as i32 - 1);
    let mut guess = (p0 + seed_shift) / coarsest_scale;

    for level in (0..levels).rev() {
        let scale = 2f64.powi(level as i32);
        let p0_level = p0 / scale;
        if level != levels - 1 {
            guess *= 2.0;
        }
        guess = lk_single_level(
            &prev_pyr.levels[level],
            &curr_pyr.levels[level],
            p0_level,
            guess,
            params,
        )?;
    }
    Some(guess)
}

fn lk_single_level(
    prev: &GrayImage,
    curr: &GrayImage,
    p0: Vector2<f64>,
    guess: Vector2<f64>,
    params: &KltParams,
) -> Option<Vector2<f64>> {
    let hw = params.half_window;
    let mut gxx = 0.0;
    let mut gxy = 0.0;
    let mut gyy = 0.0;
    let mut patch = Vec::with_capacity(((2 * hw + 1) * (2 * hw + 1)) as usize);

    for dy in -hw..=hw {
        for dx in -hw..=hw {
            let x = p0.x + dx as f64;
            let y = p0.y + dy as f64;
            let (gx, gy) = prev.gradient(x, y);
            gxx += gx * gx;
            gxy += gx * gy;
            gyy += gy * gy;
            patch.push((dx as f64, dy as f64, prev.sample_bilinear(x, y), gx, gy));
        }
    }

    let det = gxx * gyy - gxy * gxy;
    if det.abs() < 1e-6 {
        return None;
    }
    let inv_det = 1.0 / det;

    let mut v = guess;
    for _ in 0..params.max_iterations {
        let mut bx = 0.0;
        let mut by = 0.0;
        for &(dx, dy, template, gx, gy) in &patch {
            let diff = template - curr.sample_bilinear(v.x + dx, v.y + dy);
            bx += gx * diff;
            by += gy * diff;
        }
        let delta_x = inv_det * (gyy * bx - gxy * by);
        let delta_y = inv_det * (-gxy * bx + gxx * by);
        v.x += delta_x;
        v.y += delta_y;
        if (delta_x * delta_x + delta_y * delta_y).sqrt() < params.epsilon {
            break;
        }
    }

    if v.x < 0.0 || v.y < 0.0 || v.x >= curr.width as f64 || v.y >= curr.height as f64 {
        None
    } else {
        Some(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Pyramid;

    fn checkerboard(width: u32, height: u32, offset_x: i32) -> GrayImage {
        let mut data = vec![0u8; (width * height) as usize];
        for y in 0..height {
            for x in 0..width {
                let val = if ((x as i32 + offset_x) / 8 + (y as i32) / 8) % 2 == 0 {
                    200
                } else {
                    40
                };
                data[(y * width + x) as usize] = val as u8;
            }
        }
        GrayImage::new(width, height, data)
    }

    #[test]
    fn tracks_shifted_checkerboard() {
        let prev = checkerboard(128, 128, 0);
        let curr = checkerboard(128, 128, 3);
        let prev_pyr = Pyramid::build(&prev, 2);
        let curr_pyr = Pyramid::build(&curr, 2);
        let params = KltParams::default();
        let points = vec![Vector2::new(64.0, 64.0)];
        let tracked = track_with_reverse_check(&prev_pyr, &curr_pyr, &points, &params);
        assert!(tracked[0].is_some());
    }

    #[test]
    fn empty_input_produces_empty_output() {
        let img = GrayImage::filled(32, 32, 100);
        let pyr = Pyramid::build(&img, 2);
        let tracked = track_with_reverse_check(&pyr, &pyr, &[], &KltParams::default());
        assert!(tracked.is_empty());
    }
}
