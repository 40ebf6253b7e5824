//! Global Constants
//!
//! Fixed sizes shared across the render path (`spec.md` §2, §4.4, §4.6,
//! §4.7, §6).

/// Samples per render block. Every DSP stage (envelope section rounding,
/// LFO increment, filter coefficient ramping, frame rendering) is phrased
/// in units of this block.
pub const BUFSIZE: usize = 64;

/// Coefficient table rows for the linear/cubic/sinc interpolators, keyed
/// by the top 8 bits of the phase accumulator's fractional part.
pub const INTERP_MAX: usize = 256;

/// Number of samples the biquad filter takes to ramp from its current
/// coefficients to a newly computed target (`spec.md` §4.6).
pub const FILTER_TRANSITION_SAMPLES: usize = BUFSIZE;

/// Default fixed voice pool size (`spec.md` §3 Synth, §4.8 Allocation).
pub const DEFAULT_POLYPHONY: usize = 256;

/// Default sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: f64 = 44100.0;
