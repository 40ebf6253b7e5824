//! Conversion Tables
//!
//! Precomputed lookup tables for the unit conversions the render path needs
//! every sample: cents-to-Hz, centibel-to-amplitude, the SF2 concave/convex
//! modulator curves, and the equal-power pan law. All tables are built once
//! at process startup (via `std::sync::OnceLock`) and are read-only for the
//! remainder of the process; nothing in the render path allocates or
//! recomputes them.

use std::sync::OnceLock;

/// `ct2hz` evaluates `2^(cents/1200)` relative to 12 octave-aligned base
/// frequencies so the full MIDI-cent range is covered by one table lookup
/// plus one multiply, rather than a `powf` call per sample.
const CENTS_TABLE_SIZE: usize = 1200;
const CB_TABLE_SIZE: usize = 961;
const ATTEN_TABLE_SIZE: usize = 1441;
const CONCAVE_CONVEX_SIZE: usize = 128;
const PAN_TABLE_SIZE: usize = 1002;

/// EMU-style alternate attenuation scale factor (`spec.md` §4.1).
pub const ATTEN_POWER_FACTOR: f64 = -200.0;

struct Tables {
    cents: Vec<f64>,
    cb_to_amp: Vec<f64>,
    atten_to_amp: Vec<f64>,
    concave: Vec<f64>,
    convex: Vec<f64>,
    pan: Vec<f64>,
}

static TABLES: OnceLock<Tables> = OnceLock::new();

fn tables() -> &'static Tables {
    TABLES.get_or_init(|| Tables {
        cents: (0..CENTS_TABLE_SIZE)
            .map(|i| 2f64.powf(i as f64 / 1200.0))
            .collect(),
        cb_to_amp: (0..CB_TABLE_SIZE)
            .map(|i| 10f64.powf(i as f64 / -200.0))
            .collect(),
        atten_to_amp: (0..ATTEN_TABLE_SIZE)
            .map(|i| 10f64.powf(i as f64 / ATTEN_POWER_FACTOR))
            .collect(),
        concave: build_concave(),
        convex: build_convex(),
        pan: (0..PAN_TABLE_SIZE)
            .map(|i| (i as f64 * std::f64::consts::FRAC_PI_2 / 1001.0).sin())
            .collect(),
    })
}

fn build_concave() -> Vec<f64> {
    let mut v = vec![0.0f64; CONCAVE_CONVEX_SIZE];
    for (i, slot) in v.iter_mut().enumerate() {
        *slot = -20.0 / 96.0 * ((i * i) as f64 / (127.0 * 127.0)).log10();
    }
    v[0] = 0.0;
    v[CONCAVE_CONVEX_SIZE - 1] = 1.0;
    v
}

fn build_convex() -> Vec<f64> {
    let concave = build_concave();
    let mut v = vec![0.0f64; CONCAVE_CONVEX_SIZE];
    for i in 0..CONCAVE_CONVEX_SIZE {
        v[i] = 1.0 - concave[CONCAVE_CONVEX_SIZE - 1 - i];
    }
    v[0] = 0.0;
    v[CONCAVE_CONVEX_SIZE - 1] = 1.0;
    v
}

/// Forces initialization of all static tables. Call once at synth
/// construction so the first `note_on` never pays the init cost.
pub fn init() {
    tables();
}

/// `8.176` Hz is the SF2 reference frequency for absolute cent 0 (MIDI key
/// 0). `ct2hz` is valid over the full real line, not just the "key
/// pitch" range — the mod/vib LFO frequency and delay generators (`spec.md`
/// §4.5) push cents far negative to reach sub-audio rates.
pub const ABSOLUTE_ZERO_HZ: f64 = 8.176;

/// Converts absolute cents to Hz: `8.176 * 2^(cents/1200)`. The fractional
/// octave is resolved via the 1200-entry table; the integer number of
/// octaves is applied with `exp2`, so the full double-precision range of
/// `cents` (including negative values) is supported, not just `[0, 14400)`.
pub fn ct2hz(cents: f64) -> f64 {
    if !cents.is_finite() {
        return ABSOLUTE_ZERO_HZ;
    }
    let octave = (cents / 1200.0).floor();
    let frac = cents - octave * 1200.0;
    let table = &tables().cents;
    let ti = (frac.round() as usize).min(CENTS_TABLE_SIZE - 1);
    ABSOLUTE_ZERO_HZ * table[ti] * octave.exp2()
}

/// Inverse of `ct2hz`: Hz to absolute cents, used only off the render path
/// (tests, tuning setup).
pub fn hz2ct(hz: f64) -> f64 {
    if hz <= 0.0 {
        return 0.0;
    }
    1200.0 * (hz / ABSOLUTE_ZERO_HZ).log2()
}

/// Centibels of attenuation to linear amplitude, `10^(-cb/200)`.
pub fn cb2amp(cb: f64) -> f64 {
    if cb <= 0.0 {
        return 1.0;
    }
    let table = &tables().cb_to_amp;
    let idx = cb.round() as usize;
    if idx >= CB_TABLE_SIZE {
        return table[CB_TABLE_SIZE - 1];
    }
    table[idx]
}

/// EMU alternate-attenuation-scale amplitude conversion, used for the
/// generator attenuation nominal value (`spec.md` §4.8).
pub fn atten2amp(cb: f64) -> f64 {
    if cb <= 0.0 {
        return 1.0;
    }
    let table = &tables().atten_to_amp;
    let idx = cb.round() as usize;
    if idx >= ATTEN_TABLE_SIZE {
        return table[ATTEN_TABLE_SIZE - 1];
    }
    table[idx]
}

/// Maps a normalized modulator source value `x` in `[0,1]` through the SF2
/// concave curve table.
pub fn concave(x: f64) -> f64 {
    lookup_0_1(&tables().concave, x)
}

/// Maps a normalized modulator source value `x` in `[0,1]` through the SF2
/// convex curve table.
pub fn convex(x: f64) -> f64 {
    lookup_0_1(&tables().convex, x)
}

fn lookup_0_1(table: &[f64], x: f64) -> f64 {
    let clamped = x.clamp(0.0, 1.0);
    let idx = (clamped * (CONCAVE_CONVEX_SIZE - 1) as f64).round() as usize;
    table[idx.min(CONCAVE_CONVEX_SIZE - 1)]
}

/// Equal-power pan gain for a normalized position `x` in `[0,1]`
/// (0 = hard left, 1 = hard right). Returns `(left_gain, right_gain)`.
pub fn pan_gains(x: f64) -> (f64, f64) {
    let clamped = x.clamp(0.0, 1.0);
    let table = &tables().pan;
    let idx_r = (clamped * (PAN_TABLE_SIZE - 1) as f64).round() as usize;
    let idx_l = ((1.0 - clamped) * (PAN_TABLE_SIZE - 1) as f64).round() as usize;
    (
        table[idx_l.min(PAN_TABLE_SIZE - 1)],
        table[idx_r.min(PAN_TABLE_SIZE - 1)],
    )
}

/// Filter cutoff clamp per SF2.01 §8.1.3 #8.
pub fn clamp_filter_cents(cents: f64) -> f64 {
    cents.clamp(1500.0, 13500.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ct2hz_round_trip_within_tolerance() {
        for hz in [20.0, 55.0, 110.0, 440.0, 1000.0, 8000.0, 19000.0] {
            let c = hz2ct(hz);
            let back = ct2hz(c);
            let rel_err = (back - hz).abs() / hz;
            assert!(rel_err < 1e-2, "hz={hz} back={back} rel_err={rel_err}");
        }
    }

    #[test]
    fn cb2amp_zero_is_unity() {
        assert!((cb2amp(0.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cb2amp_is_monotonically_decreasing() {
        let mut prev = cb2amp(0.0);
        for cb in (10..960).step_by(10) {
            let v = cb2amp(cb as f64);
            assert!(v <= prev);
            prev = v;
        }
    }

    #[test]
    fn concave_endpoints() {
        assert!((concave(0.0) - 0.0).abs() < 1e-9);
        assert!((concave(1.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn convex_endpoints() {
        assert!((convex(0.0) - 0.0).abs() < 1e-9);
        assert!((convex(1.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn pan_gains_center_is_equal_power() {
        let (l, r) = pan_gains(0.5);
        assert!((l - r).abs() < 1e-6);
    }

    #[test]
    fn pan_gains_hard_left_right() {
        let (l, r) = pan_gains(0.0);
        assert!(l > r);
        let (l2, r2) = pan_gains(1.0);
        assert!(r2 > l2);
    }
}
