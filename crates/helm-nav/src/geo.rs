use helm_ctrl::Vec3;
use serde::{Deserialize, Serialize};

/// cm per 1e-7 degree of longitude at the equator.
pub const DISTANCE_BETWEEN_TWO_LONGITUDE_POINTS_AT_EQUATOR: f32 = 1.113195;

/// WGS84 position. Latitude/longitude in 1e-7 degrees, altitude in cm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: i32,
    pub lon: i32,
    pub alt: i32,
}

impl GeoPoint {
    pub fn from_degrees(lat: f64, lon: f64, alt_m: f32) -> Self {
        Self {
            lat: (lat * 1e7).round() as i32,
            lon: (lon * 1e7).round() as i32,
            alt: (alt_m * 100.0).round() as i32,
        }
    }

    pub fn lat_deg(&self) -> f64 {
        f64::from(self.lat) / 1e7
    }

    pub fn lon_deg(&self) -> f64 {
        f64::from(self.lon) / 1e7
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AltitudeDatum {
    /// Relative to the origin altitude.
    Relative,
    /// Mean sea level.
    Absolute,
}

/// Tangent-plane origin of the local NEU frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeoOrigin {
    pub point: GeoPoint,
    pub scale_lon_down: f32,
    pub valid: bool,
}

impl GeoOrigin {
    pub fn new(point: GeoPoint) -> Self {
        let scale_lon_down = (point.lat_deg() as f32).to_radians().cos();
        Self { point, scale_lon_down, valid: true }
    }

    /// Moves the origin keeping the horizontal datum, used when the altitude datum is reset.
    pub fn reset_altitude(&mut self, alt: i32) {
        self.point.alt = alt;
    }

    pub fn to_local(&self, p: &GeoPoint, datum: AltitudeDatum) -> Option<Vec3> {
        if !self.valid {
            return None;
        }
        let x = (p.lat - self.point.lat) as f32 * DISTANCE_BETWEEN_TWO_LONGITUDE_POINTS_AT_EQUATOR;
        let y = (p.lon - self.point.lon) as f32
            * (DISTANCE_BETWEEN_TWO_LONGITUDE_POINTS_AT_EQUATOR * self.scale_lon_down);
        let z = match datum {
            AltitudeDatum::Relative => p.alt as f32,
            AltitudeDatum::Absolute => (p.alt - self.point.alt) as f32,
        };
        Some(Vec3::new(x, y, z))
    }

    pub fn to_geodetic(&self, local: &Vec3) -> Option<GeoPoint> {
        if !self.valid {
            return None;
        }
        let lat = self.point.lat + (local.x / DISTANCE_BETWEEN_TWO_LONGITUDE_POINTS_AT_EQUATOR).round() as i32;
        let lon_scale = DISTANCE_BETWEEN_TWO_LONGITUDE_POINTS_AT_EQUATOR * self.scale_lon_down;
        let lon = if lon_scale.abs() > f32::EPSILON {
            self.point.lon + (local.y / lon_scale).round() as i32
        } else {
            self.point.lon
        };
        Some(GeoPoint { lat, lon, alt: self.point.alt + local.z.round() as i32 })
    }
}

// ----- Geometry -----

pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let r = 6_371_000.0_f64;
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    r * c
}

/// Horizontal distance (cm) between two local points.
pub fn distance_xy(from: &Vec3, to: &Vec3) -> f32 {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    (dx * dx + dy * dy).sqrt()
}

/// Bearing from `from` to `to` in centidegrees, 0..36000, 0 = north.
pub fn bearing_cd(from: &Vec3, to: &Vec3) -> i32 {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    helm_ctrl::math::wrap_36000((dy.atan2(dx).to_degrees() * 100.0).round() as i32)
}

/// Point `distance` cm away from `origin` along `yaw` (centidegrees).
pub fn project(origin: &Vec3, yaw_cd: i32, distance: f32) -> Vec3 {
    let yaw = helm_ctrl::math::centideg_to_rad(yaw_cd as f32);
    Vec3::new(origin.x + distance * yaw.cos(), origin.y + distance * yaw.sin(), origin.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_round_trip_near_origin() {
        let origin = GeoOrigin::new(GeoPoint::from_degrees(46.5197, 6.6323, 400.0));
        let p = GeoPoint::from_degrees(46.5206, 6.6336, 450.0);
        let local = origin.to_local(&p, AltitudeDatum::Absolute).unwrap();
        assert!((local.x - 10018.8).abs() < 5.0, "x {}", local.x);
        assert!((local.z - 5000.0).abs() < 0.5);
        let back = origin.to_geodetic(&local).unwrap();
        assert!((back.lat - p.lat).abs() <= 1);
        assert!((back.lon - p.lon).abs() <= 1);
    }

    #[test]
    fn invalid_origin_converts_nothing() {
        let origin = GeoOrigin::default();
        assert!(origin.to_local(&GeoPoint::default(), AltitudeDatum::Relative).is_none());
    }

    #[test]
    fn local_distance_agrees_with_haversine() {
        let a = GeoPoint::from_degrees(47.0, 8.0, 0.0);
        let b = GeoPoint::from_degrees(47.003, 8.004, 0.0);
        let origin = GeoOrigin::new(a);
        let local = origin.to_local(&b, AltitudeDatum::Relative).unwrap();
        let d_cm = distance_xy(&Vec3::ZERO, &local);
        let d_m = haversine_m(a.lat_deg(), a.lon_deg(), b.lat_deg(), b.lon_deg());
        assert!((f64::from(d_cm) / 100.0 - d_m).abs() < 2.0);
    }

    #[test]
    fn bearing_quadrants() {
        assert_eq!(bearing_cd(&Vec3::ZERO, &Vec3::new(100.0, 0.0, 0.0)), 0);
        assert_eq!(bearing_cd(&Vec3::ZERO, &Vec3::new(0.0, 100.0, 0.0)), 9000);
        assert_eq!(bearing_cd(&Vec3::ZERO, &Vec3::new(0.0, -100.0, 0.0)), 27000);
    }
}
