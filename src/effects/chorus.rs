//! Windowed-Sinc Chorus
//!
//! A circular delay line read back by several detuned, phase-offset LFO
//! taps, each interpolated with a 5-tap/128-subsample windowed-sinc
//! kernel rather than linear interpolation (`spec.md` §4.10). Tap count,
//! speed, depth and level are all runtime-settable.

const MAX_CHORUS: usize = 99;
const MAX_SAMPLES: usize = 2048;
const INTERP_SAMPLES: usize = 5;
const INTERP_SUBSAMPLES: usize = 128;

fn sinc(x: f64) -> f64 {
    if x.abs() < 1.0e-9 {
        1.0
    } else {
        let px = std::f64::consts::PI * x;
        px.sin() / px
    }
}

fn hamming(x: f64, half_width: f64) -> f64 {
    0.54 + 0.46 * (std::f64::consts::PI * x / half_width).cos()
}

/// Precomputed windowed-sinc coefficients, `[subsample][tap]`, shared by
/// every chorus tap and every `Chorus` instance.
struct SincTable {
    coeffs: Vec<[f64; INTERP_SAMPLES]>,
}

impl SincTable {
    fn build() -> Self {
        let half = (INTERP_SAMPLES / 2) as f64;
        let mut coeffs = Vec::with_capacity(INTERP_SUBSAMPLES + 1);
        for sub in 0..=INTERP_SUBSAMPLES {
            let frac = sub as f64 / INTERP_SUBSAMPLES as f64;
            let mut row = [0.0f64; INTERP_SAMPLES];
            for (tap, slot) in row.iter_mut().enumerate() {
                let i = tap as f64 - half;
                let x = i - frac + half;
                *slot = sinc(i - frac) * hamming(x - half, half);
            }
            coeffs.push(row);
        }
        SincTable { coeffs }
    }

    #[inline]
    fn row(&self, subsample: usize) -> &[f64; INTERP_SAMPLES] {
        &self.coeffs[subsample.min(INTERP_SUBSAMPLES)]
    }
}

struct Tap {
    phase: f64,
}

/// One stereo chorus bus. LFO table length scales with `sample_rate` and
/// `speed_hz` so a full table sweep takes exactly `1/speed_hz` seconds.
pub struct Chorus {
    sample_rate: f64,
    buffer: Vec<f64>,
    write_pos: usize,
    sinc: SincTable,

    taps: Vec<Tap>,
    lfo_table: Vec<f64>,
    lfo_pos: f64,
    lfo_incr: f64,

    depth_samples: f64,
    level: f64,
}

impl Chorus {
    pub fn new(sample_rate: f64) -> Self {
        let mut c = Chorus {
            sample_rate,
            buffer: vec![0.0; MAX_SAMPLES],
            write_pos: 0,
            sinc: SincTable::build(),
            taps: Vec::new(),
            lfo_table: Vec::new(),
            lfo_pos: 0.0,
            lfo_incr: 0.0,
            depth_samples: 0.0,
            level: 0.0,
        };
        c.set_params(3, 0.3, 8.0, 1.0);
        c
    }

    /// Reconfigures tap count, LFO speed (Hz), modulation depth (ms) and
    /// output level. `taps` is clamped to `[1, MAX_CHORUS]`.
    pub fn set_params(&mut self, taps: usize, speed_hz: f64, depth_ms: f64, level: f64) {
        let taps = taps.clamp(1, MAX_CHORUS);
        self.taps = (0..taps)
            .map(|i| Tap {
                phase: i as f64 / taps as f64,
            })
            .collect();

        let table_len = ((self.sample_rate / speed_hz.max(0.01)) as usize).max(1);
        self.lfo_table = (0..table_len)
            .map(|i| (2.0 * std::f64::consts::PI * i as f64 / table_len as f64).sin())
            .collect();
        self.lfo_pos = 0.0;
        self.lfo_incr = 1.0;

        self.depth_samples = depth_ms * 0.001 * self.sample_rate;
        self.level = level;
    }

    fn lfo_value(&self, phase_frac: f64) -> f64 {
        let len = self.lfo_table.len();
        let pos = (self.lfo_pos + phase_frac * len as f64) % len as f64;
        let i0 = pos as usize % len;
        let i1 = (i0 + 1) % len;
        let frac = pos - i0 as f64;
        self.lfo_table[i0] * (1.0 - frac) + self.lfo_table[i1] * frac
    }

    #[inline]
    fn tap_at(&self, read_pos: f64) -> f64 {
        let base = read_pos.floor();
        let frac = read_pos - base;
        let subsample = (frac * INTERP_SUBSAMPLES as f64).round() as usize;
        let coeffs = self.sinc.row(subsample);
        let half = (INTERP_SAMPLES / 2) as isize;
        let mut acc = 0.0;
        for (k, &c) in coeffs.iter().enumerate() {
            let offset = k as isize - half;
            let idx = (base as isize - offset).rem_euclid(MAX_SAMPLES as isize) as usize;
            acc += self.buffer[idx] * c;
        }
        acc
    }

    /// Processes one mono input sample, adding the chorus signal into
    /// `left`/`right`.
    pub fn process_mix(&mut self, input: f64, left: &mut f64, right: &mut f64) {
        self.buffer[self.write_pos] = input;

        let mut wet = 0.0;
        for (i, tap) in self.taps.iter().enumerate() {
            let lfo = self.lfo_value(tap.phase);
            let delay = self.depth_samples * (0.5 + 0.5 * lfo) + INTERP_SAMPLES as f64;
            let read_pos =
                (self.write_pos as f64 - delay).rem_euclid(MAX_SAMPLES as f64);
            let sample = self.tap_at(read_pos);
            wet += if i % 2 == 0 { sample } else { -sample };
        }
        let wet = wet * self.level / self.taps.len().max(1) as f64;
        *left += wet;
        *right += wet;

        self.write_pos = (self.write_pos + 1) % MAX_SAMPLES;
        self.lfo_pos = (self.lfo_pos + self.lfo_incr) % self.lfo_table.len().max(1) as f64;
    }

    pub fn process_block_mix(&mut self, input: &[f64], left: &mut [f64], right: &mut [f64]) {
        for i in 0..input.len() {
            self.process_mix(input[i], &mut left[i], &mut right[i]);
        }
    }

    pub fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
        self.lfo_pos = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_in_is_silence_out() {
        let mut c = Chorus::new(44100.0);
        let mut l = 0.0;
        let mut r = 0.0;
        for _ in 0..1000 {
            c.process_mix(0.0, &mut l, &mut r);
        }
        assert_eq!(l, 0.0);
        assert_eq!(r, 0.0);
    }

    #[test]
    fn constant_input_produces_finite_bounded_output() {
        let mut c = Chorus::new(44100.0);
        let mut l = 0.0;
        let mut r = 0.0;
        for _ in 0..5000 {
            l = 0.0;
            r = 0.0;
            c.process_mix(1.0, &mut l, &mut r);
            assert!(l.is_finite() && r.is_finite());
            assert!(l.abs() < 10.0 && r.abs() < 10.0);
        }
    }

    #[test]
    fn sinc_zero_is_one() {
        assert_eq!(sinc(0.0), 1.0);
    }
}
