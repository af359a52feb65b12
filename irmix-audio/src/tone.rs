//! Six-stage tone chain applied to the summed bus
//!
//! Stages, in order:
//! - High-pass (LoCut), Q = 1/sqrt(2)
//! - Low shelf at 100Hz (Bass)
//! - Peak (Mid gain/frequency/Q)
//! - High shelf at 3kHz (Treble)
//! - High shelf at 10kHz (Air)
//! - Low-pass (HiCut), Q = 1/sqrt(2)
//!
//! Coefficients use the RBJ Audio EQ Cookbook formulas. A stage is only
//! recomputed when one of its parameters changed since the last block; a
//! zero-gain shelf or peak becomes an exact pass-through.

use std::f64::consts::{FRAC_1_SQRT_2, PI};

use crate::params::ToneParams;

const BASS_FREQ: f64 = 100.0;
const TREBLE_FREQ: f64 = 3000.0;
const AIR_FREQ: f64 = 10000.0;

/// Q shared by the bass, treble and air shelves
const SHELF_Q: f64 = 0.707;

/// Corner frequencies are kept below this fraction of the sample rate
const MAX_CORNER_RATIO: f64 = 0.49;

/// Biquad filter coefficients
#[derive(Debug, Clone, Copy, PartialEq)]
struct BiquadCoeffs {
    a0: f32,
    a1: f32,
    a2: f32,
    b1: f32,
    b2: f32,
}

impl BiquadCoeffs {
    const IDENTITY: Self = Self {
        a0: 1.0,
        a1: 0.0,
        a2: 0.0,
        b1: 0.0,
        b2: 0.0,
    };

    /// Normalise raw cookbook terms by the a0 denominator
    fn normalized(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            a0: (b0 / a0) as f32,
            a1: (b1 / a0) as f32,
            a2: (b2 / a0) as f32,
            b1: (a1 / a0) as f32,
            b2: (a2 / a0) as f32,
        }
    }

    fn high_pass(sample_rate: f64, freq: f64, q: f64) -> Self {
        let omega = 2.0 * PI * freq / sample_rate;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q);
        Self::normalized(
            (1.0 + cos_omega) / 2.0,
            -(1.0 + cos_omega),
            (1.0 + cos_omega) / 2.0,
            1.0 + alpha,
            -2.0 * cos_omega,
            1.0 - alpha,
        )
    }

    fn low_pass(sample_rate: f64, freq: f64, q: f64) -> Self {
        let omega = 2.0 * PI * freq / sample_rate;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q);
        Self::normalized(
            (1.0 - cos_omega) / 2.0,
            1.0 - cos_omega,
            (1.0 - cos_omega) / 2.0,
            1.0 + alpha,
            -2.0 * cos_omega,
            1.0 - alpha,
        )
    }

    fn low_shelf(sample_rate: f64, freq: f64, gain_db: f64, q: f64) -> Self {
        if gain_db == 0.0 {
            return Self::IDENTITY;
        }
        let a = 10.0f64.powf(gain_db / 40.0);
        let omega = 2.0 * PI * freq / sample_rate;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
        Self::normalized(
            a * ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega),
            a * ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha),
            (a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos_omega),
            (a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha,
        )
    }

    fn high_shelf(sample_rate: f64, freq: f64, gain_db: f64, q: f64) -> Self {
        if gain_db == 0.0 {
            return Self::IDENTITY;
        }
        let a = 10.0f64.powf(gain_db / 40.0);
        let omega = 2.0 * PI * freq / sample_rate;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
        Self::normalized(
            a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega),
            a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cos_omega),
            (a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha,
        )
    }

    fn peaking(sample_rate: f64, freq: f64, gain_db: f64, q: f64) -> Self {
        if gain_db == 0.0 {
            return Self::IDENTITY;
        }
        let a = 10.0f64.powf(gain_db / 40.0);
        let omega = 2.0 * PI * freq / sample_rate;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q);
        Self::normalized(
            1.0 + alpha * a,
            -2.0 * cos_omega,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos_omega,
            1.0 - alpha / a,
        )
    }
}

/// Biquad filter state for a single channel
#[derive(Debug, Default, Clone)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: f32, coeffs: &BiquadCoeffs) -> f32 {
        let output = coeffs.a0 * input + coeffs.a1 * self.x1 + coeffs.a2 * self.x2
            - coeffs.b1 * self.y1
            - coeffs.b2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One filter stage with stereo state
#[derive(Debug, Clone)]
struct Stage {
    coeffs: BiquadCoeffs,
    left: BiquadState,
    right: BiquadState,
}

impl Stage {
    fn new() -> Self {
        Self {
            coeffs: BiquadCoeffs::IDENTITY,
            left: BiquadState::default(),
            right: BiquadState::default(),
        }
    }

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}

/// Raw parameter values the current coefficients were computed from
#[derive(Debug, Clone, Copy)]
struct ToneValues {
    lo_cut: f32,
    hi_cut: f32,
    bass: f32,
    mid_gain: f32,
    mid_freq: f32,
    mid_q: f32,
    treble: f32,
    air: f32,
}

impl ToneValues {
    /// Values that never compare equal to anything, forcing a full update
    const STALE: Self = Self {
        lo_cut: f32::NAN,
        hi_cut: f32::NAN,
        bass: f32::NAN,
        mid_gain: f32::NAN,
        mid_freq: f32::NAN,
        mid_q: f32::NAN,
        treble: f32::NAN,
        air: f32::NAN,
    };

    fn read(params: &ToneParams) -> Self {
        Self {
            lo_cut: params.lo_cut_hz.get(),
            hi_cut: params.hi_cut_hz.get(),
            bass: params.bass_db.get(),
            mid_gain: params.mid_gain_db.get(),
            mid_freq: params.mid_freq_hz.get(),
            mid_q: params.mid_q.get(),
            treble: params.treble_db.get(),
            air: params.air_db.get(),
        }
    }
}

const HIGH_PASS: usize = 0;
const BASS: usize = 1;
const MID: usize = 2;
const TREBLE: usize = 3;
const AIR: usize = 4;
const LOW_PASS: usize = 5;

/// Six-stage stereo tone chain driven by the shared parameters
pub struct ToneEngine {
    params: ToneParams,
    sample_rate: f64,
    stages: [Stage; 6],
    applied: ToneValues,
    /// Number of stage coefficient recomputations so far
    coefficient_updates: u64,
}

impl ToneEngine {
    pub fn new(params: ToneParams) -> Self {
        Self {
            params,
            sample_rate: 48000.0,
            stages: std::array::from_fn(|_| Stage::new()),
            applied: ToneValues::STALE,
            coefficient_updates: 0,
        }
    }

    /// Set the processing rate and clear all filter state
    pub fn prepare(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate as f64;
        self.applied = ToneValues::STALE;
        self.reset();
    }

    /// Clear filter history
    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }

    /// Total stage coefficient recomputations since creation
    pub fn coefficient_updates(&self) -> u64 {
        self.coefficient_updates
    }

    fn corner(&self, freq: f32) -> f64 {
        (freq as f64).min(self.sample_rate * MAX_CORNER_RATIO)
    }

    /// Recompute only the stages whose inputs changed
    fn update_coefficients(&mut self) {
        let v = ToneValues::read(&self.params);
        let old = self.applied;
        let sr = self.sample_rate;

        if v.lo_cut != old.lo_cut {
            self.stages[HIGH_PASS].coeffs = BiquadCoeffs::high_pass(sr, self.corner(v.lo_cut), FRAC_1_SQRT_2);
            self.coefficient_updates += 1;
        }
        if v.bass != old.bass {
            self.stages[BASS].coeffs = BiquadCoeffs::low_shelf(sr, BASS_FREQ, v.bass as f64, SHELF_Q);
            self.coefficient_updates += 1;
        }
        if v.mid_gain != old.mid_gain || v.mid_freq != old.mid_freq || v.mid_q != old.mid_q {
            self.stages[MID].coeffs =
                BiquadCoeffs::peaking(sr, self.corner(v.mid_freq), v.mid_gain as f64, v.mid_q as f64);
            self.coefficient_updates += 1;
        }
        if v.treble != old.treble {
            self.stages[TREBLE].coeffs = BiquadCoeffs::high_shelf(sr, TREBLE_FREQ, v.treble as f64, SHELF_Q);
            self.coefficient_updates += 1;
        }
        if v.air != old.air {
            self.stages[AIR].coeffs = BiquadCoeffs::high_shelf(sr, self.corner(AIR_FREQ as f32), v.air as f64, SHELF_Q);
            self.coefficient_updates += 1;
        }
        if v.hi_cut != old.hi_cut {
            self.stages[LOW_PASS].coeffs = BiquadCoeffs::low_pass(sr, self.corner(v.hi_cut), FRAC_1_SQRT_2);
            self.coefficient_updates += 1;
        }

        self.applied = v;
    }

    /// Filter an interleaved stereo block in place
    pub fn process(&mut self, samples: &mut [f32]) {
        self.update_coefficients();

        for frame in samples.chunks_exact_mut(2) {
            let mut left = frame[0];
            let mut right = frame[1];

            for stage in &mut self.stages {
                left = stage.left.process(left, &stage.coeffs);
                right = stage.right.process(right, &stage.coeffs);
            }

            frame[0] = left;
            frame[1] = right;
        }
    }
}
