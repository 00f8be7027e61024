use cam_geom::{ExtrinsicParameters, IntrinsicParameters, Pixels, Points};
use nalgebra::{Isometry3, Matrix1x2, RowVector3, Vector2, Vector3};
use opencv_ros_camera::RosOpenCvIntrinsics;

use crate::Pose;

/// A calibrated camera: intrinsics (focal length, principal point,
/// distortion) plus a body-to-camera extrinsic pose. Thin wrapper around
/// `cam_geom::Camera`, the same library `geometry/bundle-adj` and
/// `geometry/braid-mvg::Camera` build their camera abstractions on.
#[derive(Clone)]
pub struct CameraModel {
    width: usize,
    height: usize,
    intrinsics: RosOpenCvIntrinsics<f64>,
    extrinsic: Pose,
}

impl CameraModel {
    pub fn new(width: usize, height: usize, intrinsics: RosOpenCvIntrinsics<f64>, extrinsic: Pose) -> Self {
        CameraModel {
            width,
            height,
            intrinsics,
            extrinsic,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn extrinsic(&self) -> &Pose {
        &self.extrinsic
    }

    pub fn intrinsics(&self) -> &RosOpenCvIntrinsics<f64> {
        &self.intrinsics
    }

    /// Un-projects a distorted pixel to a unit bearing vector in the camera
    /// frame (spec §4.2 "normalized bearing ∈ S²").
    pub fn pixel_to_bearing(&self, pixel: Vector2<f64>) -> Vector3<f64> {
        let px = Pixels::new(Matrix1x2::new(pixel.x, pixel.y));
        let ray = self.intrinsics.pixel_to_camera(&px);
        ray.point_on_ray_at_distance(1.0).coords.normalize()
    }

    /// Projects a camera-frame 3D point to a distorted pixel.
    pub fn point_to_pixel(&self, point_cam: Vector3<f64>) -> Vector2<f64> {
        let cam = cam_geom::Camera::new(
            self.intrinsics.clone(),
            ExtrinsicParameters::from_pose(&Isometry3::identity()),
        );
        let pts = Points::new(RowVector3::new(point_cam.x, point_cam.y, point_cam.z));
        let px = cam.world_to_pixel(&pts).data;
        Vector2::new(px[(0, 0)], px[(0, 1)])
    }

    /// Projects a world-frame 3D point through this camera's extrinsic and
    /// intrinsics to a distorted pixel.
    pub fn world_to_pixel(&self, point_world: Vector3<f64>) -> Vector2<f64> {
        let point_cam = self.extrinsic.inverse().transform_point(&point_world);
        self.point_to_pixel(point_cam)
    }

    /// True if `pixel` lies within `margin` pixels of the image boundary
    /// (spec §4.2 "Boundary check rejects points within 1 px of the image
    /// edge").
    pub fn is_near_edge(&self, pixel: Vector2<f64>, margin: f64) -> bool {
        pixel.x < margin
            || pixel.y < margin
            || pixel.x > self.width as f64 - margin
            || pixel.y > self.height as f64 - margin
    }
}
