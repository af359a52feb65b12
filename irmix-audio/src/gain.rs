//! Gain laws shared by the slots and the output stage

use std::f32::consts::FRAC_PI_4;

/// Level at or below which a decibel gain is treated as silence
pub const SILENCE_DB: f32 = -60.0;

/// Convert decibels to linear gain. Anything at or below `SILENCE_DB` is 0.
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    if db <= SILENCE_DB {
        0.0
    } else {
        10.0f32.powf(db / 20.0)
    }
}

/// Constant-power pan gains (left, right) for a pan position in [-100, 100].
///
/// Centre gives cos(pi/4) on both sides; the extremes give (1, 0) and (0, 1).
#[inline]
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let position = (pan / 100.0).clamp(-1.0, 1.0);
    let angle = (position + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}
