use serde::{Deserialize, Serialize};

pub const GRAVITY_CMSS: f32 = 980.665;
pub const GRAVITY_MSS: f32 = 9.80665;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn xy_length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

pub fn constrain<T: PartialOrd>(v: T, lo: T, hi: T) -> T {
    if v < lo {
        lo
    } else if v > hi {
        hi
    } else {
        v
    }
}

/// Linear map of `x` from [src_from, src_to] onto [dst_from, dst_to]. No clamping.
pub fn scale_range(x: f32, src_from: f32, src_to: f32, dst_from: f32, dst_to: f32) -> f32 {
    let span = src_to - src_from;
    if span == 0.0 {
        return dst_from;
    }
    (dst_to - dst_from) * (x - src_from) / span + dst_from
}

pub fn apply_deadband(value: i32, deadband: i32) -> i32 {
    if value.abs() < deadband {
        0
    } else if value > 0 {
        value - deadband
    } else {
        value + deadband
    }
}

pub fn apply_deadband_f(value: f32, deadband: f32) -> f32 {
    if value.abs() < deadband {
        0.0
    } else if value >= 0.0 {
        value - deadband
    } else {
        value + deadband
    }
}

/// Wraps centidegrees into [-18000, 18000].
pub fn wrap_18000(mut angle: i32) -> i32 {
    if angle > 18000 {
        angle -= 36000;
    }
    if angle < -18000 {
        angle += 36000;
    }
    angle
}

/// Wraps centidegrees into [0, 36000).
pub fn wrap_36000(angle: i32) -> i32 {
    angle.rem_euclid(36000)
}

pub fn wrap_18000_f(angle: f32) -> f32 {
    let mut a = angle % 36000.0;
    if a > 18000.0 {
        a -= 36000.0;
    }
    if a < -18000.0 {
        a += 36000.0;
    }
    a
}

pub fn centideg_to_rad(cd: f32) -> f32 {
    (cd / 100.0).to_radians()
}

pub fn rad_to_centideg(rad: f32) -> f32 {
    rad.to_degrees() * 100.0
}

pub fn decideg_to_rad(dd: f32) -> f32 {
    (dd / 10.0).to_radians()
}

pub fn rad_to_decideg(rad: f32) -> f32 {
    rad.to_degrees() * 10.0
}

pub fn hz_to_us(hz: f32) -> u64 {
    (1_000_000.0 / hz) as u64
}

pub fn us_to_s(us: u64) -> f32 {
    us as f32 * 1e-6
}
