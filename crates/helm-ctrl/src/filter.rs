use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use crate::math::constrain;
use crate::ring::RingBuffer;

pub const BIQUAD_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

// ----------- PT1 -----------

/// First-order low-pass. Gain is recomputed whenever cutoff or dt change.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pt1Filter {
    state: f32,
    rc: f32,
    dt: f32,
}

pub fn pt1_rc(cutoff_hz: f32) -> f32 {
    1.0 / (2.0 * PI * cutoff_hz)
}

impl Pt1Filter {
    pub fn new(cutoff_hz: f32, dt: f32) -> Self {
        let rc = if cutoff_hz > 0.0 { pt1_rc(cutoff_hz) } else { 0.0 };
        Self { state: 0.0, rc, dt }
    }

    pub fn with_rc(rc: f32, dt: f32) -> Self {
        Self { state: 0.0, rc, dt }
    }

    pub fn state(&self) -> f32 {
        self.state
    }

    pub fn reset(&mut self, value: f32) {
        self.state = value;
    }

    /// Uses the stored cutoff and sample period.
    pub fn apply(&mut self, input: f32) -> f32 {
        self.apply_dt(input, self.dt)
    }

    /// Stored cutoff, caller-provided dt.
    pub fn apply_dt(&mut self, input: f32, dt: f32) -> f32 {
        self.dt = dt;
        if self.rc <= 0.0 {
            self.state = input;
        } else {
            self.state += dt / (self.rc + dt) * (input - self.state);
        }
        self.state
    }

    /// Cutoff and dt supplied per call; a non-positive cutoff passes input through.
    pub fn apply_with(&mut self, input: f32, cutoff_hz: f32, dt: f32) -> f32 {
        self.rc = if cutoff_hz > 0.0 { pt1_rc(cutoff_hz) } else { 0.0 };
        self.apply_dt(input, dt)
    }
}

// ----------- Biquad -----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiquadKind {
    Lpf,
    Notch,
}

/// RBJ biquad in transposed direct form II.
#[derive(Debug, Clone, Copy)]
pub struct BiquadFilter {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
}

impl Default for BiquadFilter {
    fn default() -> Self {
        Self::passthrough()
    }
}

/// Q for a notch centred at `center_hz` whose lower -3dB edge sits at `cutoff_hz`.
pub fn notch_q(center_hz: f32, cutoff_hz: f32) -> f32 {
    let denom = center_hz * center_hz - cutoff_hz * cutoff_hz;
    if denom <= 0.0 {
        return BIQUAD_Q;
    }
    center_hz * cutoff_hz / denom
}

impl BiquadFilter {
    pub fn passthrough() -> Self {
        Self { b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0, x1: 0.0, x2: 0.0 }
    }

    pub fn lpf(cutoff_hz: f32, looptime_us: u32) -> Self {
        Self::new(cutoff_hz, looptime_us, BIQUAD_Q, BiquadKind::Lpf)
    }

    pub fn notch(center_hz: f32, cutoff_hz: f32, looptime_us: u32) -> Self {
        Self::new(center_hz, looptime_us, notch_q(center_hz, cutoff_hz), BiquadKind::Notch)
    }

    pub fn new(freq_hz: f32, looptime_us: u32, q: f32, kind: BiquadKind) -> Self {
        let mut f = Self::passthrough();
        f.update(freq_hz, looptime_us, q, kind);
        f
    }

    /// Recomputes coefficients, keeping the delay line. Frequencies at or above Nyquist
    /// (or a zero looptime) leave the filter as passthrough.
    pub fn update(&mut self, freq_hz: f32, looptime_us: u32, q: f32, kind: BiquadKind) {
        if looptime_us == 0 || freq_hz <= 0.0 || q <= 0.0 {
            self.set_passthrough();
            return;
        }
        let sample_rate = 1.0 / (looptime_us as f32 * 1e-6);
        if freq_hz >= sample_rate / 2.0 {
            self.set_passthrough();
            return;
        }

        let omega = 2.0 * PI * freq_hz / sample_rate;
        let (sn, cs) = omega.sin_cos();
        let alpha = sn / (2.0 * q);

        let (b0, b1, b2) = match kind {
            BiquadKind::Lpf => ((1.0 - cs) / 2.0, 1.0 - cs, (1.0 - cs) / 2.0),
            BiquadKind::Notch => (1.0, -2.0 * cs, 1.0),
        };
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cs;
        let a2 = 1.0 - alpha;

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
    }

    fn set_passthrough(&mut self) {
        self.b0 = 1.0;
        self.b1 = 0.0;
        self.b2 = 0.0;
        self.a1 = 0.0;
        self.a2 = 0.0;
    }

    pub fn apply(&mut self, input: f32) -> f32 {
        let result = self.b0 * input + self.x1;
        self.x1 = self.b1 * input - self.a1 * result + self.x2;
        self.x2 = self.b2 * input - self.a2 * result;
        result
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
    }
}

// ----------- FIR -----------

/// Noise-robust one-sided differentiator (Holoborodko), newest sample first.
pub const NRD_COEFFS: [f32; 5] = [5.0 / 8.0, 2.0 / 8.0, -8.0 / 8.0, -2.0 / 8.0, 3.0 / 8.0];
/// Plain first difference padded to the same length.
pub const FIRST_DIFF_COEFFS: [f32; 5] = [1.0, -1.0, 0.0, 0.0, 0.0];

/// Coefficient `i` multiplies the sample of age `i`.
#[derive(Debug, Clone)]
pub struct FirFilter<const N: usize> {
    coeffs: [f32; N],
    history: RingBuffer<f32, N>,
}

impl<const N: usize> FirFilter<N> {
    pub fn new(coeffs: [f32; N]) -> Self {
        let mut history = RingBuffer::new();
        for _ in 0..N {
            history.push(0.0);
        }
        Self { coeffs, history }
    }

    pub fn update(&mut self, input: f32) {
        self.history.push(input);
    }

    pub fn apply(&self) -> f32 {
        self.history
            .iter()
            .zip(self.coeffs.iter())
            .map(|(x, c)| x * c)
            .sum()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        for _ in 0..N {
            self.history.push(0.0);
        }
    }
}

// ----------- Rate limiter -----------

#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitFilter {
    state: f32,
}

impl RateLimitFilter {
    /// `rate_limit` is in units per second; zero or negative disables limiting.
    pub fn apply(&mut self, input: f32, rate_limit: f32, dt: f32) -> f32 {
        if rate_limit > 0.0 {
            let step = rate_limit * dt;
            self.state = constrain(input, self.state - step, self.state + step);
        } else {
            self.state = input;
        }
        self.state
    }

    pub fn reset(&mut self, value: f32) {
        self.state = value;
    }
}

// ----------- LULU -----------

pub const LULU_MAX_ORDER: usize = 7;
const LULU_WINDOW: usize = 2 * LULU_MAX_ORDER + 1;

/// LULU smoother (L_n . U_n). Removes impulses of width <= n in both directions.
/// Output lags the input by 2n samples; until both windows fill, input passes through.
#[derive(Debug, Clone)]
pub struct LuluFilter {
    order: usize,
    input: RingBuffer<f32, LULU_WINDOW>,
    upper: RingBuffer<f32, LULU_WINDOW>,
}

impl LuluFilter {
    pub fn new(order: usize) -> Self {
        Self {
            order: order.clamp(1, LULU_MAX_ORDER),
            input: RingBuffer::new(),
            upper: RingBuffer::new(),
        }
    }

    fn window(&self) -> usize {
        2 * self.order + 1
    }

    // min over a in 0..=n of max(ages a..=a+n), or the dual when `upper` is false
    fn sweep(buf: &RingBuffer<f32, LULU_WINDOW>, n: usize, upper: bool) -> f32 {
        let mut acc = if upper { f32::INFINITY } else { f32::NEG_INFINITY };
        for a in 0..=n {
            let mut inner = if upper { f32::NEG_INFINITY } else { f32::INFINITY };
            for age in a..=a + n {
                let v = buf.get(age).copied().unwrap_or(0.0);
                inner = if upper { inner.max(v) } else { inner.min(v) };
            }
            acc = if upper { acc.min(inner) } else { acc.max(inner) };
        }
        acc
    }

    pub fn apply(&mut self, input: f32) -> f32 {
        let w = self.window();
        self.input.push(input);
        if self.input.len() < w {
            return input;
        }
        let u = Self::sweep(&self.input, self.order, true);
        self.upper.push(u);
        if self.upper.len() < w {
            return input;
        }
        Self::sweep(&self.upper, self.order, false)
    }

    pub fn reset(&mut self) {
        self.input.clear();
        self.upper.clear();
    }
}

// ----------- Dispatch -----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LowPassKind {
    Pt1,
    Biquad,
}

/// Low-pass stage picked once from configuration.
#[derive(Debug, Clone, Copy)]
pub enum LowPass {
    None,
    Pt1(Pt1Filter),
    Biquad(BiquadFilter),
}

impl LowPass {
    pub fn from_config(kind: LowPassKind, cutoff_hz: f32, looptime_us: u32) -> Self {
        if cutoff_hz <= 0.0 || looptime_us == 0 {
            return LowPass::None;
        }
        match kind {
            LowPassKind::Pt1 => LowPass::Pt1(Pt1Filter::new(cutoff_hz, looptime_us as f32 * 1e-6)),
            LowPassKind::Biquad => LowPass::Biquad(BiquadFilter::lpf(cutoff_hz, looptime_us)),
        }
    }

    pub fn apply(&mut self, input: f32) -> f32 {
        match self {
            LowPass::None => input,
            LowPass::Pt1(f) => f.apply(input),
            LowPass::Biquad(f) => f.apply(input),
        }
    }

    pub fn reset(&mut self) {
        match self {
            LowPass::None => {}
            LowPass::Pt1(f) => f.reset(0.0),
            LowPass::Biquad(f) => f.reset(),
        }
    }
}
