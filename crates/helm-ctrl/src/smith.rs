use serde::{Deserialize, Serialize};

use crate::filter::Pt1Filter;
use crate::ring::RingBuffer;

pub const MAX_SMITH_SAMPLES: usize = 64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SmithConfig {
    /// Estimated sensor-to-actuator delay; 0 disables the predictor.
    pub delay_ms: f32,
    /// Percentage of the predicted difference added back.
    pub strength: u8,
    pub lpf_hz: f32,
}

impl Default for SmithConfig {
    fn default() -> Self {
        Self { delay_ms: 0.0, strength: 50, lpf_hz: 50.0 }
    }
}

/// Delay compensation on a gyro axis: adds back the filtered difference between the newest
/// sample and the one that is `delay` old.
#[derive(Debug, Clone)]
pub struct SmithPredictor {
    enabled: bool,
    samples: usize,
    strength: f32,
    history: RingBuffer<f32, MAX_SMITH_SAMPLES>,
    filter: Pt1Filter,
}

impl SmithPredictor {
    pub fn new(cfg: &SmithConfig, looptime_us: u32) -> Self {
        let samples = if looptime_us > 0 {
            ((cfg.delay_ms * 1000.0) / looptime_us as f32) as usize
        } else {
            0
        };
        let samples = samples.min(MAX_SMITH_SAMPLES - 1);
        let strength = f32::from(cfg.strength) / 100.0;
        Self {
            enabled: samples > 0 && strength > 0.0,
            samples,
            strength,
            history: RingBuffer::new(),
            filter: Pt1Filter::new(cfg.lpf_hz, looptime_us as f32 * 1e-6),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn apply(&mut self, sample: f32) -> f32 {
        if !self.enabled {
            return sample;
        }
        self.history.push(sample);
        let delayed = match self.history.get(self.samples) {
            Some(v) => *v,
            None => return sample,
        };
        let compensation = self.filter.apply(sample - delayed);
        sample + compensation * self.strength
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_delay() {
        let mut p = SmithPredictor::new(&SmithConfig::default(), 1000);
        assert!(!p.is_enabled());
        assert_eq!(p.apply(12.0), 12.0);
    }

    #[test]
    fn constant_signal_is_untouched() {
        let cfg = SmithConfig { delay_ms: 5.0, strength: 100, lpf_hz: 0.0 };
        let mut p = SmithPredictor::new(&cfg, 1000);
        let mut y = 0.0;
        for _ in 0..20 {
            y = p.apply(3.0);
        }
        assert_eq!(y, 3.0);
    }

    #[test]
    fn ramp_is_led() {
        let cfg = SmithConfig { delay_ms: 4.0, strength: 100, lpf_hz: 0.0 };
        let mut p = SmithPredictor::new(&cfg, 1000);
        let mut y = 0.0;
        for i in 0..20 {
            y = p.apply(i as f32);
        }
        // delay 4 samples, full strength: 19 + (19 - 15)
        assert!((y - 23.0).abs() < 1e-4);
    }
}
