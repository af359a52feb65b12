//! Fractional stereo delay line with Lagrange interpolation
//!
//! Used by each slot to push its convolved signal back in time by the user
//! delay plus the alignment offset. The delay time is ramped linearly so that
//! changes never click.

/// Longest supported delay, in milliseconds
pub const MAX_DELAY_MS: f32 = 100.0;

/// Ramp length for delay time changes, in seconds
pub const DELAY_RAMP_SECS: f64 = 0.02;

/// Stereo delay line with 3rd-order Lagrange interpolation
pub struct DelayLine {
    /// Stereo interleaved history (L,R,L,R,...)
    buffer: Vec<f32>,
    /// Buffer length in stereo frames
    buffer_frames: usize,
    /// Write position in frames
    write_pos: usize,
    /// Largest delay accepted, in samples
    max_delay: f32,
}

impl DelayLine {
    /// Create a delay line holding up to `max_delay` samples
    pub fn new(max_delay: usize) -> Self {
        let buffer_frames = max_delay + 4;
        Self {
            buffer: vec![0.0; buffer_frames * 2],
            buffer_frames,
            write_pos: 0,
            max_delay: max_delay as f32,
        }
    }

    /// Delay line sized for `MAX_DELAY_MS` at `sample_rate`
    pub fn for_sample_rate(sample_rate: u32) -> Self {
        let frames = (sample_rate as f32 * MAX_DELAY_MS / 1000.0).ceil() as usize;
        Self::new(frames.saturating_sub(1).max(1))
    }

    /// Largest delay in samples
    pub fn max_delay(&self) -> f32 {
        self.max_delay
    }

    /// Clear the history
    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }

    /// Push one stereo frame and read it back `delay` samples later.
    ///
    /// The delay is clamped to `[0, max_delay]`; a delay of 0 returns the
    /// frame just pushed.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32, delay: f32) -> (f32, f32) {
        let idx = self.write_pos * 2;
        self.buffer[idx] = left;
        self.buffer[idx + 1] = right;

        let out = self.read(delay.clamp(0.0, self.max_delay));

        self.write_pos += 1;
        if self.write_pos >= self.buffer_frames {
            self.write_pos = 0;
        }
        out
    }

    /// Frame index `back` frames behind the write position
    #[inline]
    fn frame_behind(&self, back: usize) -> usize {
        if self.write_pos >= back {
            self.write_pos - back
        } else {
            self.buffer_frames - (back - self.write_pos)
        }
    }

    /// 4-point Lagrange read
    ///
    /// Nodes sit at delays `base..base+3`. Whenever the integer delay allows,
    /// the nodes straddle the read point (one newer, two older) so the
    /// interpolant stays centred.
    #[inline]
    fn read(&self, delay: f32) -> (f32, f32) {
        let int_delay = delay as usize;
        let frac = delay - int_delay as f32;

        let (base, x) = if int_delay >= 1 {
            (int_delay - 1, frac + 1.0)
        } else {
            (0, frac)
        };

        // L_k(x) with nodes at 0, 1, 2, 3
        let x1 = x - 1.0;
        let x2 = x - 2.0;
        let x3 = x - 3.0;
        let l0 = -x1 * x2 * x3 / 6.0;
        let l1 = x * x2 * x3 / 2.0;
        let l2 = -x * x1 * x3 / 2.0;
        let l3 = x * x1 * x2 / 6.0;

        let p0 = self.frame_behind(base) * 2;
        let p1 = self.frame_behind(base + 1) * 2;
        let p2 = self.frame_behind(base + 2) * 2;
        let p3 = self.frame_behind(base + 3) * 2;

        let left = self.buffer[p0] * l0
            + self.buffer[p1] * l1
            + self.buffer[p2] * l2
            + self.buffer[p3] * l3;
        let right = self.buffer[p0 + 1] * l0
            + self.buffer[p1 + 1] * l1
            + self.buffer[p2 + 1] * l2
            + self.buffer[p3 + 1] * l3;

        (left, right)
    }
}

/// Linear ramp toward a target value over a fixed number of steps
#[derive(Debug, Clone)]
pub struct LinearSmoother {
    current: f32,
    target: f32,
    step: f32,
    countdown: usize,
    ramp_steps: usize,
}

impl LinearSmoother {
    /// Smoother that ramps over `ramp_secs` at `sample_rate`
    pub fn new(sample_rate: u32, ramp_secs: f64) -> Self {
        Self {
            current: 0.0,
            target: 0.0,
            step: 0.0,
            countdown: 0,
            ramp_steps: (sample_rate as f64 * ramp_secs).floor() as usize,
        }
    }

    /// Jump straight to `value` with no ramp
    pub fn snap_to(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.countdown = 0;
    }

    /// Start ramping toward `target` (no-op if already heading there)
    #[inline]
    pub fn set_target(&mut self, target: f32) {
        if target == self.target {
            return;
        }
        if self.ramp_steps == 0 {
            self.snap_to(target);
            return;
        }
        self.target = target;
        self.countdown = self.ramp_steps;
        self.step = (target - self.current) / self.ramp_steps as f32;
    }

    /// Advance one sample and return the value
    #[inline]
    pub fn next_value(&mut self) -> f32 {
        if self.countdown == 0 {
            return self.target;
        }
        self.countdown -= 1;
        if self.countdown == 0 {
            self.current = self.target;
        } else {
            self.current += self.step;
        }
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_ramping(&self) -> bool {
        self.countdown > 0
    }
}
