//! Rigid-body pose primitives shared by every other crate in the workspace.
//!
//! `Pose` wraps [`nalgebra::Isometry3`] rather than re-deriving SE3 from
//! scratch, the same way `braid-mvg::extrinsics::ExtrinsicParameters` wraps
//! an `Isometry3` internally. Composition, inversion and point transforms are
//! therefore just `Isometry3` operations; this crate adds the swarm-specific
//! vocabulary (delta-pose, gravity direction, yaw) on top.

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

pub mod camera;
pub use camera::CameraModel;

/// A rigid-body pose: orientation (unit quaternion) plus translation, in
/// some reference frame implied by context (world frame for `Frame::odom`,
/// body frame for per-camera extrinsics, etc).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose(Isometry3<f64>);

impl Pose {
    pub fn identity() -> Self {
        Pose(Isometry3::identity())
    }

    pub fn from_rotation_translation(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Pose(Isometry3::from_parts(Translation3::from(translation), rotation))
    }

    pub fn from_isometry(iso: Isometry3<f64>) -> Self {
        Pose(iso)
    }

    pub fn isometry(&self) -> &Isometry3<f64> {
        &self.0
    }

    pub fn rotation(&self) -> UnitQuaternion<f64> {
        self.0.rotation
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.0.translation.vector
    }

    /// Composes two poses: `self` applied after `other`, i.e. `self ∘ other`.
    pub fn compose(&self, other: &Pose) -> Pose {
        Pose(self.0 * other.0)
    }

    pub fn inverse(&self) -> Pose {
        Pose(self.0.inverse())
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.0.transform_point(&p.into()).coords
    }

    pub fn transform_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.0.transform_vector(v)
    }

    /// Yaw (rotation about world +z) in radians, extracted from the
    /// quaternion's Euler decomposition. Roll/pitch are discarded.
    pub fn yaw(&self) -> f64 {
        let (_, _, yaw) = self.0.rotation.euler_angles();
        yaw
    }

    /// A pose with the same translation as `self` but with rotation reduced
    /// to a yaw-only rotation about world +z (roll/pitch dropped). Used for
    /// the 4-DoF delta-pose path between independently gravity-aligned
    /// agents (spec.md §9, "is_4dof").
    pub fn to_4dof(&self) -> Pose {
        Pose::from_rotation_translation(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), self.yaw()),
            self.translation(),
        )
    }

    /// The world-gravity direction (`+z`) rotated into this pose's body
    /// frame. Two poses that agree on "up" produce nearly parallel vectors;
    /// see [`gravity_angle`].
    pub fn gravity_in_body_frame(&self) -> Vector3<f64> {
        self.0.rotation.inverse() * Vector3::z()
    }

    /// Flattens to the minimal 6-parameter tangent representation used by
    /// the sliding-window solver: translation (3) followed by the rotation
    /// vector (3), i.e. the scaled-axis form of the quaternion's logarithm.
    /// Mirrors `bundle-adj`'s flattening of `ExtrinsicParameters` to a
    /// 6-vector for `LeastSquaresProblem::params`.
    pub fn to_tangent6(&self) -> [f64; 6] {
        let t = self.translation();
        let rv = self.0.rotation.scaled_axis();
        [t.x, t.y, t.z, rv.x, rv.y, rv.z]
    }

    /// Reconstructs a pose from a 6-parameter tangent vector produced by
    /// [`Pose::to_tangent6`], via the exponential map on the rotation part.
    pub fn from_tangent6(v: &[f64; 6]) -> Self {
        let translation = Vector3::new(v[0], v[1], v[2]);
        let rv = Vector3::new(v[3], v[4], v[5]);
        let rotation = UnitQuaternion::from_scaled_axis(rv);
        Pose::from_rotation_translation(rotation, translation)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Pose::identity()
    }
}

/// The relative pose taking `base`'s frame to `other`'s frame: `base⁻¹ ∘ other`.
///
/// Round-trip law (spec.md §8): `delta_pose(&base.compose(&delta_ab), &base, false) == delta_ab`.
///
/// When `is_4dof` is set, both poses are first reduced to yaw-only rotation
/// via [`Pose::to_4dof`] before the relative pose is computed; this is the
/// path used when comparing poses from two independently gravity-aligned
/// agents (spec.md §9), where only yaw and position are meaningfully
/// comparable. For same-agent 6-DoF comparisons `is_4dof` must be `false`,
/// the identity case for the round-trip law above.
pub fn delta_pose(other: &Pose, base: &Pose, is_4dof: bool) -> Pose {
    if is_4dof {
        let a = base.to_4dof();
        let b = other.to_4dof();
        a.inverse().compose(&b)
    } else {
        base.inverse().compose(other)
    }
}

/// Angle in radians between the gravity directions of two poses, each
/// rotated into its own body frame. Used by the loop-closure verification
/// gravity check (spec.md §4.4).
pub fn gravity_angle(a: &Pose, b: &Pose) -> f64 {
    let ga = a.gravity_in_body_frame();
    let gb = b.gravity_in_body_frame();
    let cos_angle = (ga.dot(&gb) / (ga.norm() * gb.norm())).clamp(-1.0, 1.0);
    cos_angle.acos()
}
