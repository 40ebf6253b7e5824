//! LFO Module
//!
//! Triangular low-frequency oscillators for per-voice modulation
//! (`spec.md` §4.5). A voice owns two of these: `modlfo` (pitch/filter/
//! volume modulation) and `viblfo` (vibrato, pitch only).

use crate::constants::BUFSIZE;
use crate::tables::ct2hz;

/// A triangular LFO running in `[-1, 1]`, held at zero until its delay
/// elapses.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lfo {
    delay_samples: u32,
    incr: f64,
    val: f64,
}

impl Lfo {
    pub fn new() -> Self {
        Lfo::default()
    }

    /// Sample count before the LFO starts moving, from a delay generator
    /// already converted via `tc2secDelay` and the sample rate.
    pub fn set_delay_samples(&mut self, delay_samples: u32) {
        self.delay_samples = delay_samples;
    }

    /// Sets the LFO rate from its frequency generator, in absolute cents.
    /// `incr = 4 * BUFSIZE * ct2hz(cents) / sample_rate`: the per-buffer
    /// step such that one full triangle cycle (up then down) takes
    /// `1/freq` seconds (`spec.md` §4.5). Direction is preserved, so
    /// re-reading the frequency generator mid-cycle doesn't snap the
    /// phase.
    pub fn set_freq_cents(&mut self, cents: f64, sample_rate: f64) {
        let freq_hz = ct2hz(cents);
        let magnitude = 4.0 * BUFSIZE as f64 * freq_hz / sample_rate;
        self.incr = if self.incr < 0.0 { -magnitude } else { magnitude };
    }

    /// Resets the LFO to its rest state: value zero, ascending.
    pub fn reset(&mut self) {
        self.val = 0.0;
        self.incr = self.incr.abs();
    }

    /// Advances the LFO by one render buffer and returns the new value.
    /// `ticks` is the voice's elapsed-sample counter; before
    /// `delay_samples` the LFO stays at zero.
    pub fn advance_buffer(&mut self, ticks: u64) -> f64 {
        if ticks < self.delay_samples as u64 {
            return 0.0;
        }
        self.val += self.incr;
        if self.val > 1.0 {
            self.incr = -self.incr;
            self.val = 2.0 - self.val;
        } else if self.val < -1.0 {
            self.incr = -self.incr;
            self.val = -2.0 - self.val;
        }
        self.val
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.val
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_at_zero_before_delay_elapses() {
        let mut lfo = Lfo::new();
        lfo.set_delay_samples(100);
        lfo.set_freq_cents(0.0, 44100.0);
        assert_eq!(lfo.advance_buffer(0), 0.0);
        assert_eq!(lfo.advance_buffer(50), 0.0);
    }

    #[test]
    fn triangle_stays_within_bounds_after_delay() {
        let mut lfo = Lfo::new();
        lfo.set_delay_samples(0);
        lfo.set_freq_cents(6000.0, 44100.0);
        let mut ticks = 0u64;
        for _ in 0..10_000 {
            let v = lfo.advance_buffer(ticks);
            ticks += BUFSIZE as u64;
            assert!((-1.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn triangle_reflects_at_peak() {
        let mut lfo = Lfo::new();
        lfo.set_delay_samples(0);
        lfo.set_freq_cents(6000.0, 44100.0);
        let mut saw_negative = false;
        let mut ticks = 0u64;
        for _ in 0..200 {
            let v = lfo.advance_buffer(ticks);
            ticks += BUFSIZE as u64;
            if v < 0.0 {
                saw_negative = true;
            }
        }
        assert!(saw_negative);
    }

    #[test]
    fn reset_returns_to_zero_ascending() {
        let mut lfo = Lfo::new();
        lfo.set_delay_samples(0);
        lfo.set_freq_cents(6000.0, 44100.0);
        let mut ticks = 0u64;
        for _ in 0..50 {
            lfo.advance_buffer(ticks);
            ticks += BUFSIZE as u64;
        }
        lfo.reset();
        assert_eq!(lfo.value(), 0.0);
        assert!(lfo.advance_buffer(ticks) > 0.0);
    }
}
