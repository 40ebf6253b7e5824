//! Sample Module
//!
//! Immutable PCM data plus SF2 metadata (`spec.md` §3 Sample). Samples are
//! created at bank load, shared by reference across every voice that plays
//! them, and destroyed at bank unload.

use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    /// SF2 `sfSampleType` flags (SF2.01 §7.10), plus the OggVorbis bit this
    /// implementation's SF3 support relies on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SampleTypeFlags: u16 {
        const MONO = 0x0001;
        const RIGHT = 0x0002;
        const LEFT = 0x0004;
        const LINKED = 0x0008;
        const ROM_MONO = 0x8001;
        const ROM_RIGHT = 0x8002;
        const ROM_LEFT = 0x8004;
        const ROM_LINKED = 0x8008;
        const OGG_VORBIS = 0x0010;
    }
}

impl SampleTypeFlags {
    pub fn is_rom(self) -> bool {
        self.bits() & 0x8000 != 0
    }

    pub fn is_ogg_vorbis(self) -> bool {
        self.contains(SampleTypeFlags::OGG_VORBIS)
    }
}

/// Minimum loop region size and padding, `spec.md` §3 Voice invariants.
pub const MIN_LOOP_SIZE: u32 = 2;
pub const MIN_LOOP_PAD: u32 = 0;

/// An immutable SF2 sample: PCM data plus metadata.
#[derive(Debug)]
pub struct Sample {
    pub name: String,
    pub data: Vec<i16>,
    pub start: u32,
    pub end: u32,
    pub loop_start: u32,
    pub loop_end: u32,
    pub original_key: u8,
    pub pitch_correction: i8,
    pub sample_rate: u32,
    pub sample_type: SampleTypeFlags,
    /// Precomputed amplitude bound over the loop region, used to cull
    /// inaudible voices (`spec.md` §3 Sample "cached post-import").
    pub loop_amplitude_bound: f32,
}

impl Sample {
    /// Computes the cached loop-region amplitude bound from raw PCM data.
    /// Called once at bank load after a sample's indices are finalized.
    pub fn compute_loop_amplitude_bound(data: &[i16], loop_start: u32, loop_end: u32) -> f32 {
        if loop_end <= loop_start {
            return 0.0;
        }
        let lo = loop_start as usize;
        let hi = (loop_end as usize).min(data.len());
        data[lo..hi]
            .iter()
            .map(|&s| (s as f32 / 32768.0).abs())
            .fold(0.0f32, f32::max)
    }

    pub fn is_rom(&self) -> bool {
        self.sample_type.is_rom()
    }

    /// Validates the ordering invariant from `spec.md` §3/§8:
    /// `start <= loopstart < loopend <= end+1`.
    pub fn sane_loop_points(&self) -> bool {
        self.start <= self.loop_start
            && self.loop_start < self.loop_end
            && self.loop_end <= self.end + 1
            && self.loop_end - self.loop_start >= MIN_LOOP_SIZE
    }
}

/// Samples are shared by reference, never copied into a voice.
pub type SampleRef = Arc<Sample>;
