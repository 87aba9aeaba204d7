//! Geodetic transforms: map space to ECEF and WGS84, and compass bearings.
//!
//! Everything here is pure. Public angle inputs and outputs are in degrees;
//! trigonometry runs in radians internally.
//!
//! A map's placement on Earth is an affine transform from map space to
//! Earth-Centered-Earth-Fixed coordinates:
//!
//! ```text
//! ecef = translation + scale * rotation * map
//! ```

use nalgebra::{Matrix3, Matrix4, Point3, Vector2, Vector3};
use serde::Serialize;

use crate::model::{LocalizedPose, Pose};

/// WGS84 semi-major axis in meters.
const WGS84_A: f64 = 6_378_137.0;

/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// First eccentricity squared.
const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);

const ECEF_TO_WGS84_ITERATIONS: usize = 8;

/// Affine transform from map space to ECEF.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapToEcef {
    pub translation: Vector3<f64>,
    pub rotation: Matrix3<f64>,
    pub scale: f64,
}

impl MapToEcef {
    /// Build from the flat 13-value layout used on the wire:
    /// translation (3), row-major rotation (9), scale (1).
    pub fn from_array(values: &[f64; 13]) -> Self {
        Self {
            translation: Vector3::new(values[0], values[1], values[2]),
            rotation: Matrix3::from_row_slice(&values[3..12]),
            scale: values[12],
        }
    }

    pub fn to_array(&self) -> [f64; 13] {
        let mut values = [0.0; 13];
        values[..3].copy_from_slice(self.translation.as_slice());
        for row in 0..3 {
            for col in 0..3 {
                values[3 + row * 3 + col] = self.rotation[(row, col)];
            }
        }
        values[12] = self.scale;
        values
    }
}

impl Default for MapToEcef {
    fn default() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: Matrix3::identity(),
            scale: 1.0,
        }
    }
}

/// A geodetic position on the WGS84 ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Wgs84 {
    /// Degrees, positive north.
    pub latitude: f64,
    /// Degrees, positive east.
    pub longitude: f64,
    /// Meters above the ellipsoid.
    pub altitude: f64,
}

/// Where the camera is on Earth according to the last localization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,

    /// Compass bearing in degrees, `[0, 360)`. `None` when the camera
    /// looks straight up or down.
    pub bearing: Option<f64>,
}

/// A principal rotation axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// Transform a map-space point into ECEF.
pub fn map_to_ecef(point: &Vector3<f64>, m: &MapToEcef) -> Vector3<f64> {
    m.translation + m.rotation * (point * m.scale)
}

/// Transform a map-space point into WGS84.
pub fn map_to_wgs84(point: &Vector3<f64>, m: &MapToEcef) -> Wgs84 {
    ecef_to_wgs84(&map_to_ecef(point, m))
}

/// Convert geodetic coordinates to ECEF.
pub fn wgs84_to_ecef(position: &Wgs84) -> Vector3<f64> {
    let lat = position.latitude.to_radians();
    let lon = position.longitude.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();

    let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
    let h = position.altitude;

    Vector3::new(
        (n + h) * cos_lat * cos_lon,
        (n + h) * cos_lat * sin_lon,
        (n * (1.0 - WGS84_E2) + h) * sin_lat,
    )
}

/// Convert ECEF to geodetic coordinates by fixed-point iteration on latitude.
pub fn ecef_to_wgs84(ecef: &Vector3<f64>) -> Wgs84 {
    let (x, y, z) = (ecef.x, ecef.y, ecef.z);
    let p = x.hypot(y);
    let longitude = y.atan2(x).to_degrees();

    // On the polar axis the latitude is exact and p / cos(lat) degenerates.
    if p < 1e-9 {
        let b = WGS84_A * (1.0 - WGS84_F);
        return Wgs84 {
            latitude: if z >= 0.0 { 90.0 } else { -90.0 },
            longitude: 0.0,
            altitude: z.abs() - b,
        };
    }

    let mut lat = z.atan2(p * (1.0 - WGS84_E2));
    let mut altitude = 0.0;
    for _ in 0..ECEF_TO_WGS84_ITERATIONS {
        let sin_lat = lat.sin();
        let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
        altitude = p / lat.cos() - n;
        lat = z.atan2(p * (1.0 - WGS84_E2 * n / (n + altitude)));
    }

    Wgs84 {
        latitude: lat.to_degrees(),
        longitude,
        altitude,
    }
}

/// Rotation by `angle` degrees about `axis`, in the row convention where
/// `R * v` rotates the frame, not the vector.
pub fn rot(angle: f64, axis: Axis) -> Matrix3<f64> {
    let (s, c) = angle.to_radians().sin_cos();
    match axis {
        Axis::X => Matrix3::new(
            1.0, 0.0, 0.0, //
            0.0, c, s, //
            0.0, -s, c,
        ),
        Axis::Y => Matrix3::new(
            c, 0.0, -s, //
            0.0, 1.0, 0.0, //
            s, 0.0, c,
        ),
        Axis::Z => Matrix3::new(
            c, s, 0.0, //
            -s, c, 0.0, //
            0.0, 0.0, 1.0,
        ),
    }
}

/// Rotation taking ECEF directions into the local east-north-up frame at
/// the given latitude and longitude.
///
/// Composed as `R_x(90 - lat) * R_z(90 + lon)`; the order is significant.
pub fn enu_rotation(latitude: f64, longitude: f64) -> Matrix3<f64> {
    let r_up = rot(90.0 + longitude, Axis::Z);
    let r_north = rot(90.0 - latitude, Axis::X);
    r_north * r_up
}

/// Planar (east, north) unit direction the camera faces.
///
/// Both the camera position and the position one unit along `forward` are
/// taken through `tracker_to_map` and then into ECEF. Their difference is
/// rotated into the local frame at the camera's location. Returns `None`
/// when `forward` is zero or the view is vertical.
pub fn compass_direction(
    position: &Vector3<f64>,
    forward: &Vector3<f64>,
    tracker_to_map: &Matrix4<f64>,
    m: &MapToEcef,
) -> Option<Vector2<f64>> {
    let forward = forward.try_normalize(f64::EPSILON)?;

    let a = tracker_to_map
        .transform_point(&Point3::from(*position))
        .coords;
    let b = tracker_to_map
        .transform_point(&Point3::from(position + forward))
        .coords;

    let a_ecef = map_to_ecef(&a, m);
    let b_ecef = map_to_ecef(&b, m);
    let here = ecef_to_wgs84(&a_ecef);

    let r = enu_rotation(here.latitude, here.longitude);
    let v = (b_ecef - a_ecef).try_normalize(f64::EPSILON)?;
    let local = r * v;

    Vector2::new(local.x, local.y).try_normalize(f64::EPSILON)
}

/// Bearing in degrees for an (east, north) direction: `atan2(-east, north)`,
/// wrapped into `[0, 360)`.
pub fn bearing_degrees(direction: &Vector2<f64>) -> f64 {
    wrap_bearing((-direction.x).atan2(direction.y).to_degrees())
}

/// Wrap a raw `atan2` angle in `(-180, 180]` into `[0, 360)`.
pub fn wrap_bearing(raw: f64) -> f64 {
    let wrapped = if raw >= 0.0 { raw } else { 360.0 - raw.abs() };
    // A tiny negative angle rounds up to exactly 360.
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Compass bearing of a camera pose given in tracking space.
pub fn compass_bearing(camera: &Pose, tracker_to_map: &Matrix4<f64>, m: &MapToEcef) -> Option<f64> {
    compass_direction(&camera.position, &camera.forward(), tracker_to_map, m)
        .map(|d| bearing_degrees(&d))
}

/// Place the tracked camera on Earth using the last localization.
///
/// Writes the camera's map-space pose back into `pose.last_updated_pose`.
/// Returns `None` and leaves `pose` untouched when it is not valid.
pub fn update_location(camera: &Pose, pose: &mut LocalizedPose) -> Option<VirtualLocation> {
    if !pose.valid {
        return None;
    }

    let bearing = compass_bearing(camera, &pose.matrix, &pose.map_to_ecef);

    let in_map = pose.matrix * camera.to_matrix();
    let position: Vector3<f64> = in_map.fixed_view::<3, 1>(0, 3).into_owned();
    let wgs84 = map_to_wgs84(&position, &pose.map_to_ecef);

    pose.last_updated_pose = Some(Pose::from_matrix(&in_map));

    Some(VirtualLocation {
        latitude: wgs84.latitude,
        longitude: wgs84.longitude,
        altitude: wgs84.altitude,
        bearing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    /// A map anchored at `origin` whose axes are x = east, y = up, z = north.
    fn map_at(origin: Wgs84) -> MapToEcef {
        let (sin_lat, cos_lat) = origin.latitude.to_radians().sin_cos();
        let (sin_lon, cos_lon) = origin.longitude.to_radians().sin_cos();

        let east = Vector3::new(-sin_lon, cos_lon, 0.0);
        let north = Vector3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
        let up = Vector3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat);

        MapToEcef {
            translation: wgs84_to_ecef(&origin),
            rotation: Matrix3::from_columns(&[east, up, north]),
            scale: 1.0,
        }
    }

    fn equator() -> MapToEcef {
        map_at(Wgs84 {
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
        })
    }

    fn bearing_for(forward: Vector3<f64>, m: &MapToEcef) -> f64 {
        let dir = compass_direction(&Vector3::zeros(), &forward, &Matrix4::identity(), m).unwrap();
        bearing_degrees(&dir)
    }

    #[test]
    fn equator_origin_is_on_the_x_axis() {
        let ecef = wgs84_to_ecef(&Wgs84 {
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
        });
        assert_relative_eq!(ecef, Vector3::new(WGS84_A, 0.0, 0.0));
    }

    #[test]
    fn ecef_to_wgs84_inverts_wgs84_to_ecef() {
        let original = Wgs84 {
            latitude: 60.1699,
            longitude: 24.9384,
            altitude: 31.5,
        };
        let back = ecef_to_wgs84(&wgs84_to_ecef(&original));

        assert_relative_eq!(back.latitude, original.latitude, epsilon = 1e-9);
        assert_relative_eq!(back.longitude, original.longitude, epsilon = 1e-9);
        assert_relative_eq!(back.altitude, original.altitude, epsilon = 1e-6);
    }

    #[test]
    fn ecef_on_polar_axis() {
        let north_pole = wgs84_to_ecef(&Wgs84 {
            latitude: 90.0,
            longitude: 0.0,
            altitude: 10.0,
        });
        let back = ecef_to_wgs84(&Vector3::new(0.0, 0.0, north_pole.z));

        assert_relative_eq!(back.latitude, 90.0);
        assert_relative_eq!(back.altitude, 10.0, epsilon = 1e-6);
    }

    #[test]
    fn map_to_ecef_applies_scale_then_rotation_then_translation() {
        let m = MapToEcef {
            translation: Vector3::new(10.0, 20.0, 30.0),
            rotation: rot(90.0, Axis::Z),
            scale: 2.0,
        };
        let ecef = map_to_ecef(&Vector3::new(1.0, 0.0, 0.0), &m);

        // Row convention: R_z(90) maps +x to -y.
        assert_relative_eq!(ecef, Vector3::new(10.0, 18.0, 30.0), epsilon = 1e-12);
    }

    #[test]
    fn flat_layout_round_trip() {
        let values = [
            1.0, 2.0, 3.0, //
            0.0, 1.0, 0.0, //
            -1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, //
            0.5,
        ];
        let m = MapToEcef::from_array(&values);

        assert_relative_eq!(m.rotation[(0, 1)], 1.0);
        assert_relative_eq!(m.rotation[(1, 0)], -1.0);
        assert_eq!(m.to_array(), values);
    }

    #[test]
    fn enu_rotation_maps_local_axes() {
        let (lat, lon) = (45.0_f64, -73.0_f64);
        let m = map_at(Wgs84 {
            latitude: lat,
            longitude: lon,
            altitude: 0.0,
        });
        let r = enu_rotation(lat, lon);

        let east = m.rotation.column(0).into_owned();
        let up = m.rotation.column(1).into_owned();
        let north = m.rotation.column(2).into_owned();

        assert_relative_eq!(r * east, Vector3::x(), epsilon = 1e-12);
        assert_relative_eq!(r * north, Vector3::y(), epsilon = 1e-12);
        assert_relative_eq!(r * up, Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn facing_north_at_equator_is_zero() {
        let bearing = bearing_for(Vector3::z(), &equator());
        assert_relative_eq!(bearing, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn facing_south_at_equator_is_180() {
        let bearing = bearing_for(-Vector3::z(), &equator());
        assert_relative_eq!(bearing, 180.0, epsilon = 1e-9);
    }

    #[test]
    fn facing_east_reads_270() {
        // atan2(-east, north) counts counter-clockwise from north.
        let m = map_at(Wgs84 {
            latitude: 60.0,
            longitude: 25.0,
            altitude: 0.0,
        });
        let bearing = bearing_for(Vector3::x(), &m);
        assert_relative_eq!(bearing, 270.0, epsilon = 1e-6);
    }

    #[test]
    fn bearing_ignores_forward_magnitude() {
        let m = map_at(Wgs84 {
            latitude: 35.0,
            longitude: 139.0,
            altitude: 12.0,
        });
        let forward = Vector3::new(0.3, 0.1, 0.9);

        let unit = bearing_for(forward, &m);
        let scaled = bearing_for(forward * 42.0, &m);
        assert_relative_eq!(unit, scaled, epsilon = 1e-9);
    }

    #[test]
    fn vertical_view_has_no_direction() {
        let dir = compass_direction(
            &Vector3::zeros(),
            &Vector3::y(),
            &Matrix4::identity(),
            &equator(),
        );
        assert!(dir.is_none());
    }

    #[test]
    fn negative_bearings_wrap() {
        assert_relative_eq!(wrap_bearing(-30.0), 330.0);
        assert_relative_eq!(wrap_bearing(-180.0), 180.0);
        assert_relative_eq!(wrap_bearing(45.0), 45.0);
        assert_eq!(wrap_bearing(-1e-15), 0.0);
    }

    #[test]
    fn transforms_are_deterministic() {
        let m = map_at(Wgs84 {
            latitude: -33.86,
            longitude: 151.21,
            altitude: 5.0,
        });
        let point = Vector3::new(12.5, -1.0, 7.25);

        assert_eq!(map_to_wgs84(&point, &m), map_to_wgs84(&point, &m));
    }

    #[test]
    fn update_location_writes_back_map_space_pose() {
        let m = equator();
        let tracker_to_map = Matrix4::new_translation(&Vector3::new(0.0, 0.0, 100.0));
        let mut pose = LocalizedPose::new(tracker_to_map, m);
        let camera = Pose::new(Vector3::new(0.0, 1.5, 0.0), UnitQuaternion::identity());

        let location = update_location(&camera, &mut pose).unwrap();

        let written = pose.last_updated_pose.unwrap();
        assert_relative_eq!(written.position, Vector3::new(0.0, 1.5, 100.0), epsilon = 1e-12);
        // 100 m north of the equator origin, 1.5 m up.
        assert!(location.latitude > 0.0);
        assert_relative_eq!(location.longitude, 0.0, epsilon = 1e-9);
        assert_relative_eq!(location.altitude, 1.5, epsilon = 1e-2);
        assert_relative_eq!(location.bearing.unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn update_location_skips_invalid_pose() {
        let mut pose = LocalizedPose::new(Matrix4::identity(), equator());
        pose.valid = false;

        assert!(update_location(&Pose::default(), &mut pose).is_none());
        assert!(pose.last_updated_pose.is_none());
    }
}
