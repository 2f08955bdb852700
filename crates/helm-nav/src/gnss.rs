use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    #[default]
    NoFix,
    Fix2D,
    Fix3D,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixQuality {
    pub sats: u8,
    pub hdop: f32,
    pub fix_age_ms: u32,
}

impl Default for FixQuality {
    fn default() -> Self {
        Self { sats: 0, hdop: 99.9, fix_age_ms: u32::MAX }
    }
}

/// One receiver solution as delivered by the GPS driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsSolution {
    pub fix: FixType,
    pub point: GeoPoint,
    /// North, east, up in cm/s.
    pub vel_neu: [f32; 3],
    pub quality: FixQuality,
}

impl GpsSolution {
    pub fn ground_speed(&self) -> f32 {
        (self.vel_neu[0] * self.vel_neu[0] + self.vel_neu[1] * self.vel_neu[1]).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GnssThresholds {
    pub min_sats: u8,
    pub max_hdop: f32,
    pub max_fix_age_ms: u32,
}

impl Default for GnssThresholds {
    fn default() -> Self {
        Self { min_sats: 6, max_hdop: 5.0, max_fix_age_ms: 5000 }
    }
}

/// Degrade ladder: a good fix feeds position and velocity, a degraded one velocity only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixHealth {
    Good,
    Degraded,
    Lost,
}

impl GnssThresholds {
    pub fn assess(&self, sol: &GpsSolution) -> FixHealth {
        let q = &sol.quality;
        if sol.fix == FixType::NoFix || q.fix_age_ms > self.max_fix_age_ms {
            return FixHealth::Lost;
        }
        if sol.fix == FixType::Fix3D && q.sats >= self.min_sats && q.hdop <= self.max_hdop {
            FixHealth::Good
        } else {
            FixHealth::Degraded
        }
    }
}
