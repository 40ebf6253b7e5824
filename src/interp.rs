//! Interpolators
//!
//! The four wavetable interpolation qualities a channel can select
//! (`spec.md` §4.7): nearest-neighbor, linear, 4th-order cubic (the Olli
//! Niemitalo coefficients used by `original_source/src/dsp_float.c`), and
//! a 7th-order Hamming-windowed sinc. All four share the same loop/end
//! boundary handling: a "ghost tap" accessor substitutes the duplicated or
//! wrapped sample a real buffer boundary would otherwise read past, so the
//! per-sample inner loop never branches on position within the buffer.
//!
//! This collapses the reference implementation's several specialized
//! boundary loops (entry segment / interior / last-point / second-to-last
//! point) into one bounds-checked tap lookup; the audible result is the
//! same interpolated waveform, at the cost of one branch per tap instead
//! of amortizing the boundary check per buffer segment.

use std::sync::OnceLock;

use crate::channel::InterpMethod;
use crate::constants::INTERP_MAX;
use crate::phase::Phase;

struct InterpTables {
    linear: Vec<[f64; 2]>,
    cubic: Vec<[f64; 4]>,
    sinc7: Vec<[f64; 7]>,
}

static TABLES: OnceLock<InterpTables> = OnceLock::new();

fn tables() -> &'static InterpTables {
    TABLES.get_or_init(|| InterpTables {
        linear: build_linear(),
        cubic: build_cubic(),
        sinc7: build_sinc7(),
    })
}

fn build_linear() -> Vec<[f64; 2]> {
    (0..INTERP_MAX)
        .map(|i| {
            let x = i as f64 / INTERP_MAX as f64;
            [1.0 - x, x]
        })
        .collect()
}

/// Olli Niemitalo's 4th-order coefficients, centered on the second of
/// four taps.
fn build_cubic() -> Vec<[f64; 4]> {
    (0..INTERP_MAX)
        .map(|i| {
            let x = i as f64 / INTERP_MAX as f64;
            [
                x * (-0.5 + x * (1.0 - 0.5 * x)),
                1.0 + x * x * (1.5 * x - 2.5),
                x * (0.5 + x * (2.0 - 1.5 * x)),
                0.5 * x * x * (x - 1.0),
            ]
        })
        .collect()
}

const SINC_ORDER: i32 = 7;

/// 7-tap Hamming-windowed sinc, taps offset `-3..=3` from the base index;
/// row `i` is the fractional position `i/INTERP_MAX` between taps.
fn build_sinc7() -> Vec<[f64; 7]> {
    (0..INTERP_MAX)
        .map(|row| {
            let frac = row as f64 / INTERP_MAX as f64;
            let mut coeffs = [0.0f64; 7];
            for (t, coeff) in coeffs.iter_mut().enumerate() {
                let offset = t as f64 - 3.0;
                let shifted = offset - frac;
                let v = if shifted.abs() > 1e-7 {
                    let sinc = (shifted * std::f64::consts::PI).sin() / (std::f64::consts::PI * shifted);
                    let hamming =
                        0.5 * (1.0 + (2.0 * std::f64::consts::PI * shifted / SINC_ORDER as f64).cos());
                    sinc * hamming
                } else {
                    1.0
                };
                *coeff = v;
            }
            coeffs
        })
        .collect()
}

/// Everything the interpolator needs to know about a sample's playback
/// boundaries, independent of the `Sample`/`Voice` types so this module
/// has no upward dependency.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub start: u32,
    pub end: u32,
    pub loop_start: u32,
    pub loop_end: u32,
    pub looping: bool,
}

/// Reads the PCM sample at `idx`, substituting a duplicated boundary tap
/// (non-looping) or a wrapped loop tap (looping) when `idx` falls outside
/// `[start, end]` — so a caller can always ask for taps a few samples
/// either side of the playback pointer.
fn ghost_tap(data: &[i16], idx: i64, region: &Region, has_looped: bool) -> f64 {
    let start = region.start as i64;
    let end = region.end as i64;
    let loop_start = region.loop_start as i64;
    let loop_end = region.loop_end as i64;

    let resolved = if region.looping {
        if has_looped && loop_end > loop_start {
            let span = loop_end - loop_start;
            let mut i = idx;
            while i >= loop_end {
                i -= span;
            }
            while i < loop_start {
                i += span;
            }
            i
        } else if idx < start {
            start
        } else if idx >= loop_end {
            loop_start + (idx - loop_end)
        } else {
            idx
        }
    } else {
        idx.clamp(start, end)
    };

    data.get(resolved.max(0) as usize).copied().unwrap_or(0) as f64
}

/// Renders up to `out.len()` samples (normally `BUFSIZE`) through the
/// chosen interpolator, advancing `phase`/`amp` in place. Returns the
/// number of samples actually written; fewer than requested means the
/// voice reached the end of a non-looping sample and should turn off
/// (`spec.md` §4.7, §4.8 step 11).
#[allow(clippy::too_many_arguments)]
pub fn render(
    method: InterpMethod,
    data: &[i16],
    region: Region,
    phase: &mut Phase,
    incr: u64,
    amp: &mut f64,
    amp_incr: f64,
    has_looped: &mut bool,
    out: &mut [f64],
) -> usize {
    let t = tables();
    let mut written = 0;

    for slot in out.iter_mut() {
        let mut idx = phase.index() as i64;

        if region.looping && region.loop_end > region.loop_start && idx > region.loop_end as i64 - 1 {
            *phase = phase.sub_index(region.loop_end - region.loop_start);
            *has_looped = true;
            idx = phase.index() as i64;
        } else if !region.looping && idx > region.end as i64 {
            break;
        }

        let value = match method {
            InterpMethod::None => {
                let i = phase.index_round() as i64;
                ghost_tap(data, i, &region, *has_looped)
            }
            InterpMethod::Linear => {
                let c = t.linear[phase.interp_row()];
                c[0] * ghost_tap(data, idx, &region, *has_looped)
                    + c[1] * ghost_tap(data, idx + 1, &region, *has_looped)
            }
            InterpMethod::Cubic4th => {
                let c = t.cubic[phase.interp_row()];
                c[0] * ghost_tap(data, idx - 1, &region, *has_looped)
                    + c[1] * ghost_tap(data, idx, &region, *has_looped)
                    + c[2] * ghost_tap(data, idx + 1, &region, *has_looped)
                    + c[3] * ghost_tap(data, idx + 2, &region, *has_looped)
            }
            InterpMethod::Sinc7th => {
                let c = t.sinc7[phase.interp_row()];
                let mut acc = 0.0;
                for (tap, coeff) in c.iter().enumerate() {
                    acc += coeff * ghost_tap(data, idx + tap as i64 - 3, &region, *has_looped);
                }
                acc
            }
        };

        *slot = *amp * value;
        *phase = phase.add(incr);
        *amp += amp_incr;
        written += 1;
    }

    written
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(start: u32, end: u32, loop_start: u32, loop_end: u32, looping: bool) -> Region {
        Region {
            start,
            end,
            loop_start,
            loop_end,
            looping,
        }
    }

    #[test]
    fn linear_interpolation_is_monotonic_between_ramp_samples() {
        let data: Vec<i16> = (0..20).map(|i| i * 100).collect();
        let mut phase = Phase::from_index(0);
        let mut amp = 1.0;
        let mut has_looped = false;
        let mut out = [0.0; 8];
        let incr = Phase::incr_from_ratio(0.5);
        render(
            InterpMethod::Linear,
            &data,
            region(0, 19, 0, 0, false),
            &mut phase,
            incr,
            &mut amp,
            0.0,
            &mut has_looped,
            &mut out,
        );
        for w in out.windows(2) {
            assert!(w[1] >= w[0] - 1e-6);
        }
    }

    #[test]
    fn none_interpolation_returns_nearest_neighbor() {
        let data: Vec<i16> = vec![0, 1000, 2000, 3000, 4000];
        let mut phase = Phase::from_index(1);
        let mut amp = 1.0;
        let mut has_looped = false;
        let mut out = [0.0; 1];
        render(
            InterpMethod::None,
            &data,
            region(0, 4, 0, 0, false),
            &mut phase,
            Phase::incr_from_ratio(1.0),
            &mut amp,
            0.0,
            &mut has_looped,
            &mut out,
        );
        assert_eq!(out[0], 1000.0);
    }

    #[test]
    fn non_looping_sample_returns_fewer_than_requested_at_end() {
        let data: Vec<i16> = vec![0, 100, 200, 300];
        let mut phase = Phase::from_index(2);
        let mut amp = 1.0;
        let mut has_looped = false;
        let mut out = [0.0; 16];
        let n = render(
            InterpMethod::Linear,
            &data,
            region(0, 3, 0, 0, false),
            &mut phase,
            Phase::incr_from_ratio(1.0),
            &mut amp,
            0.0,
            &mut has_looped,
            &mut out,
        );
        assert!(n < 16);
    }

    #[test]
    fn looping_sample_sets_has_looped_and_keeps_producing() {
        let data: Vec<i16> = (0..10).map(|i| i * 10).collect();
        let mut phase = Phase::from_index(8);
        let mut amp = 1.0;
        let mut has_looped = false;
        let mut out = [0.0; 32];
        let n = render(
            InterpMethod::Linear,
            &data,
            region(0, 9, 2, 9, true),
            &mut phase,
            Phase::incr_from_ratio(1.0),
            &mut amp,
            0.0,
            &mut has_looped,
            &mut out,
        );
        assert_eq!(n, 32);
        assert!(has_looped);
    }

    #[test]
    fn sinc7_handles_sample_boundary_without_panicking() {
        let data: Vec<i16> = vec![0, 500, 1000, 500, 0];
        let mut phase = Phase::from_index(0);
        let mut amp = 1.0;
        let mut has_looped = false;
        let mut out = [0.0; 8];
        render(
            InterpMethod::Sinc7th,
            &data,
            region(0, 4, 0, 0, false),
            &mut phase,
            Phase::incr_from_ratio(0.7),
            &mut amp,
            0.0,
            &mut has_looped,
            &mut out,
        );
        for v in out {
            assert!(v.is_finite());
        }
    }
}
