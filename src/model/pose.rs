//! Poses: the tracked camera and the last successful localization.

use nalgebra::{Matrix4, Rotation3, UnitQuaternion, Vector3};

use crate::geodesy::MapToEcef;

/// A rigid pose: position plus orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
}

impl Pose {
    pub fn new(position: Vector3<f64>, rotation: UnitQuaternion<f64>) -> Self {
        Self { position, rotation }
    }

    /// The pose's forward axis (+Z), unit length.
    pub fn forward(&self) -> Vector3<f64> {
        self.rotation * Vector3::z()
    }

    /// Homogeneous transform with unit scale.
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut m = self.rotation.to_homogeneous();
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.position);
        m
    }

    /// Extract a pose from a homogeneous transform, ignoring any scale.
    pub fn from_matrix(m: &Matrix4<f64>) -> Self {
        let position = m.fixed_view::<3, 1>(0, 3).into_owned();
        let basis = m.fixed_view::<3, 3>(0, 0).into_owned();
        let rotation = Rotation3::from_matrix(&basis);
        Self {
            position,
            rotation: UnitQuaternion::from_rotation_matrix(&rotation),
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }
}

/// The result of the last successful localization.
///
/// Produced by the external localizer. Only `last_updated_pose` is
/// written by this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalizedPose {
    pub valid: bool,

    /// Tracking space to map space.
    pub matrix: Matrix4<f64>,

    /// Map space to Earth-Centered-Earth-Fixed.
    pub map_to_ecef: MapToEcef,

    /// The camera pose in map space as of the most recent tick.
    pub last_updated_pose: Option<Pose>,
}

impl LocalizedPose {
    pub fn new(matrix: Matrix4<f64>, map_to_ecef: MapToEcef) -> Self {
        Self {
            valid: true,
            matrix,
            map_to_ecef,
            last_updated_pose: None,
        }
    }
}
