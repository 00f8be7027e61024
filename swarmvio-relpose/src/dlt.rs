//! Linear (DLT-style) pose solve from 3D-point / unit-bearing correspondences.
//!
//! Given `n >= 6` correspondences `(P_i, b_i)` with `b_i` a unit bearing in
//! the camera frame pointing at world point `P_i`, the collinearity
//! constraint `b_i x (M P_i + s) = 0` is linear in the 12 unknowns of `M`
//! (an unconstrained 3x3 matrix, ideally a scaled rotation) and `s` (a
//! translation-like offset). Stacking all constraints and taking the
//! smallest-singular-vector solution of the resulting homogeneous system
//! gives `M`/`s` up to scale and sign; orthogonal-Procrustes projection of
//! `M` onto `SO(3)` (via its own SVD) and a cheirality-based sign fix then
//! recover a camera pose. This is the same normalization idea
//! `geometry/braid-mvg`'s `rq_decomposition` uses to pull `K[R|t]` apart,
//! specialized to the calibrated (`K = I`) case.

use nalgebra::{DMatrix, Matrix3, Vector3};
use swarmvio_geom::Pose;

fn skew(v: Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Solves for the camera's pose in world coordinates (`pose_cam`, such that
/// `pose_cam.transform_point(point_cam) == point_world`) from `>= 6`
/// correspondences. Returns `None` if there are too few points or the
/// linear system is degenerate (e.g. all points coplanar with the camera
/// center, or fewer than 6 inputs).
pub fn solve_dlt_pose(points_world: &[Vector3<f64>], bearings_cam: &[Vector3<f64>]) -> Option<Pose> {
    assert_eq!(points_world.len(), bearings_cam.len());
    let n = points_world.len();
    if n < 6 {
        return None;
    }

    let mut a = DMatrix::<f64>::zeros(3 * n, 12);
    for (i, (p, b)) in points_world.iter().zip(bearings_cam.iter()).enumerate() {
        let b = b.normalize();
        let sb = skew(b);
        for r in 0..3 {
            let row = 3 * i + r;
            for c in 0..3 {
                for k in 0..3 {
                    a[(row, c * 3 + k)] = sb[(r, c)] * p[k];
                }
                a[(row, 9 + c)] = sb[(r, c)];
            }
        }
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    // Smallest singular value corresponds to the last row of V^T (nalgebra
    // orders singular values descending).
    let x = v_t.row(v_t.nrows() - 1).transpose();

    let mut m = Matrix3::zeros();
    for c in 0..3 {
        for k in 0..3 {
            m[(c, k)] = x[c * 3 + k];
        }
    }
    let s = Vector3::new(x[9], x[10], x[11]);

    let m_svd = m.svd(true, true);
    let (Some(u), Some(vt)) = (m_svd.u, m_svd.v_t) else {
        return None;
    };
    let mut r = u * vt;
    if r.determinant() < 0.0 {
        let mut u_fixed = u;
        for i in 0..3 {
            u_fixed[(i, 2)] = -u_fixed[(i, 2)];
        }
        r = u_fixed * vt;
    }
    let scale = {
        let sv = m_svd.singular_values;
        let sum = sv[0] + sv[1] + sv[2];
        if sum.abs() < 1e-12 {
            return None;
        }
        3.0 / sum
    };

    // `r` approximates M = R_wc^T (orthogonal-Procrustes with the
    // determinant correction above recovers the true factor regardless of
    // the sign of the SVD null vector, so no separate rotation sign-flip is
    // needed). The camera rotation itself is the transpose.
    let rotation = nalgebra::UnitQuaternion::from_matrix(&r.transpose());
    let s_scaled = s * scale;

    // Depth sign check: for most points, M P + s should point along +b, not -b.
    let mut positive = 0usize;
    for (p, b) in points_world.iter().zip(bearings_cam.iter()) {
        let cam_dir = scale * (m * p) + s_scaled;
        if cam_dir.dot(&b.normalize()) > 0.0 {
            positive += 1;
        }
    }
    let s_final = if positive * 2 < n { -s_scaled } else { s_scaled };

    // x_cam = R_wc^T (P_world - t_wc), s = -R_wc^T t_wc  =>  t_wc = -R_wc * s
    let camcenter = -(rotation * s_final);
    Some(Pose::from_rotation_translation(rotation, camcenter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Translation3, UnitQuaternion, Vector3};

    #[test]
    fn recovers_known_pose_from_synthetic_correspondences() {
        let rotation = UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3);
        let translation = Translation3::new(1.0, -0.5, 2.0);
        let pose = Pose::from_isometry(nalgebra::Isometry3::from_parts(translation, rotation));

        let points_world: Vec<Vector3<f64>> = vec![
            Vector3::new(0.3, 0.2, 5.0),
            Vector3::new(-0.4, 0.1, 4.5),
            Vector3::new(0.1, -0.3, 6.0),
            Vector3::new(0.5, 0.4, 5.5),
            Vector3::new(-0.2, -0.1, 4.0),
            Vector3::new(0.0, 0.0, 7.0),
            Vector3::new(-0.3, 0.3, 5.2),
            Vector3::new(0.2, -0.2, 6.5),
        ]
        .into_iter()
        .map(|p_cam| pose.transform_point(&p_cam))
        .collect();

        let bearings: Vec<Vector3<f64>> = points_world
            .iter()
            .map(|p_world| pose.inverse().transform_point(p_world).coords.normalize())
            .collect();

        let solved = solve_dlt_pose(&points_world, &bearings).expect("DLT solve should succeed");

        assert_relative_eq!(solved.translation().vector, pose.translation().vector, epsilon = 1e-3);
        assert_relative_eq!(solved.rotation().to_rotation_matrix().matrix(), pose.rotation().to_rotation_matrix().matrix(), epsilon = 1e-3);
    }

    #[test]
    fn too_few_points_returns_none() {
        let p = vec![Vector3::new(0.0, 0.0, 1.0); 5];
        let b = vec![Vector3::new(0.0, 0.0, 1.0); 5];
        assert!(solve_dlt_pose(&p, &b).is_none());
    }
}
