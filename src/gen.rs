//! Generator Table
//!
//! A generator is a named SF2 audio parameter. This module defines the
//! 59-member generator type enum, the static default/min/max/NRPN-scale
//! metadata table (SF2.01 §8.1.3), and the per-generator value resolution
//! rules from `spec.md` §3.

use crate::channel::Channel;

/// One of the 59 SF2 generator types, in SF2.01 enumeration order. `Pitch`
/// is generator 58: not a real SoundFont generator, used internally to let
/// pitch bend and the other pitch modulators share the generator pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum GenType {
    StartAddrOfs = 0,
    EndAddrOfs,
    StartLoopAddrOfs,
    EndLoopAddrOfs,
    StartAddrCoarseOfs,
    ModLfoToPitch,
    VibLfoToPitch,
    ModEnvToPitch,
    FilterFc,
    FilterQ,
    ModLfoToFilterFc,
    ModEnvToFilterFc,
    EndAddrCoarseOfs,
    ModLfoToVol,
    Unused1,
    ChorusSend,
    ReverbSend,
    Pan,
    Unused2,
    Unused3,
    Unused4,
    ModLfoDelay,
    ModLfoFreq,
    VibLfoDelay,
    VibLfoFreq,
    ModEnvDelay,
    ModEnvAttack,
    ModEnvHold,
    ModEnvDecay,
    ModEnvSustain,
    ModEnvRelease,
    KeyToModEnvHold,
    KeyToModEnvDecay,
    VolEnvDelay,
    VolEnvAttack,
    VolEnvHold,
    VolEnvDecay,
    VolEnvSustain,
    VolEnvRelease,
    KeyToVolEnvHold,
    KeyToVolEnvDecay,
    Instrument,
    Reserved1,
    KeyRange,
    VelRange,
    StartLoopAddrCoarseOfs,
    KeyNum,
    Velocity,
    Attenuation,
    Reserved2,
    EndLoopAddrCoarseOfs,
    CoarseTune,
    FineTune,
    SampleId,
    SampleMode,
    Reserved3,
    ScaleTune,
    ExclusiveClass,
    OverrideRootKey,
    Pitch,
}

/// Number of generator slots; `spec.md` §3 calls this `GEN_LAST`.
pub const GEN_LAST: usize = 59;

impl GenType {
    pub const ALL: [GenType; GEN_LAST] = [
        GenType::StartAddrOfs,
        GenType::EndAddrOfs,
        GenType::StartLoopAddrOfs,
        GenType::EndLoopAddrOfs,
        GenType::StartAddrCoarseOfs,
        GenType::ModLfoToPitch,
        GenType::VibLfoToPitch,
        GenType::ModEnvToPitch,
        GenType::FilterFc,
        GenType::FilterQ,
        GenType::ModLfoToFilterFc,
        GenType::ModEnvToFilterFc,
        GenType::EndAddrCoarseOfs,
        GenType::ModLfoToVol,
        GenType::Unused1,
        GenType::ChorusSend,
        GenType::ReverbSend,
        GenType::Pan,
        GenType::Unused2,
        GenType::Unused3,
        GenType::Unused4,
        GenType::ModLfoDelay,
        GenType::ModLfoFreq,
        GenType::VibLfoDelay,
        GenType::VibLfoFreq,
        GenType::ModEnvDelay,
        GenType::ModEnvAttack,
        GenType::ModEnvHold,
        GenType::ModEnvDecay,
        GenType::ModEnvSustain,
        GenType::ModEnvRelease,
        GenType::KeyToModEnvHold,
        GenType::KeyToModEnvDecay,
        GenType::VolEnvDelay,
        GenType::VolEnvAttack,
        GenType::VolEnvHold,
        GenType::VolEnvDecay,
        GenType::VolEnvSustain,
        GenType::VolEnvRelease,
        GenType::KeyToVolEnvHold,
        GenType::KeyToVolEnvDecay,
        GenType::Instrument,
        GenType::Reserved1,
        GenType::KeyRange,
        GenType::VelRange,
        GenType::StartLoopAddrCoarseOfs,
        GenType::KeyNum,
        GenType::Velocity,
        GenType::Attenuation,
        GenType::Reserved2,
        GenType::EndLoopAddrCoarseOfs,
        GenType::CoarseTune,
        GenType::FineTune,
        GenType::SampleId,
        GenType::SampleMode,
        GenType::Reserved3,
        GenType::ScaleTune,
        GenType::ExclusiveClass,
        GenType::OverrideRootKey,
        GenType::Pitch,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<GenType> {
        GenType::ALL.get(i).copied()
    }
}

/// Static per-generator metadata: whether `genInit` needs to set it up,
/// the NRPN scale factor, and its min/max/default nominal value.
#[derive(Debug, Clone, Copy)]
pub struct GenDefault {
    pub needs_init: bool,
    pub nrpn_scale: i32,
    pub min: i32,
    pub max: i32,
    pub default: i32,
}

/// The 59-entry default table, SF2.01 §8.1.3.
pub const GEN_DEFAULTS: [GenDefault; GEN_LAST] = {
    const fn d(needs_init: bool, nrpn_scale: i32, min: i32, max: i32, default: i32) -> GenDefault {
        GenDefault {
            needs_init,
            nrpn_scale,
            min,
            max,
            default,
        }
    }
    [
        d(true, 1, 0, i32::MAX, 0),           // StartAddrOfs
        d(true, 1, 0, i32::MAX, 0),           // EndAddrOfs
        d(true, 1, 0, i32::MAX, 0),           // StartLoopAddrOfs
        d(true, 1, 0, i32::MAX, 0),           // EndLoopAddrOfs
        d(false, 1, 0, i32::MAX, 0),          // StartAddrCoarseOfs
        d(true, 2, -12000, 12000, 0),         // ModLfoToPitch
        d(true, 2, -12000, 12000, 0),         // VibLfoToPitch
        d(true, 2, -12000, 12000, 0),         // ModEnvToPitch
        d(true, 2, 1500, 13500, 13500),       // FilterFc
        d(true, 1, 0, 960, 0),                // FilterQ
        d(true, 2, -12000, 12000, 0),         // ModLfoToFilterFc
        d(true, 2, -12000, 12000, 0),         // ModEnvToFilterFc
        d(false, 1, 0, 0, 0),                 // EndAddrCoarseOfs
        d(true, 1, -960, 960, 0),             // ModLfoToVol
        d(false, 0, 0, 0, 0),                 // Unused1
        d(true, 1, 0, 1000, 0),               // ChorusSend
        d(true, 1, 0, 1000, 0),               // ReverbSend
        d(true, 1, -500, 500, 0),             // Pan
        d(false, 0, 0, 0, 0),                 // Unused2
        d(false, 0, 0, 0, 0),                 // Unused3
        d(false, 0, 0, 0, 0),                 // Unused4
        d(true, 2, -12000, 5000, -12000),     // ModLfoDelay
        d(true, 4, -16000, 4500, 0),          // ModLfoFreq
        d(true, 2, -12000, 5000, -12000),     // VibLfoDelay
        d(true, 4, -16000, 4500, 0),          // VibLfoFreq
        d(true, 2, -12000, 5000, -12000),     // ModEnvDelay
        d(true, 2, -12000, 8000, -12000),     // ModEnvAttack
        d(true, 2, -12000, 5000, -12000),     // ModEnvHold
        d(true, 2, -12000, 8000, -12000),     // ModEnvDecay
        d(false, 1, 0, 1000, 0),              // ModEnvSustain
        d(true, 2, -12000, 8000, -12000),     // ModEnvRelease
        d(false, 1, -1200, 1200, 0),          // KeyToModEnvHold
        d(false, 1, -1200, 1200, 0),          // KeyToModEnvDecay
        d(true, 2, -12000, 5000, -12000),     // VolEnvDelay
        d(true, 2, -12000, 8000, -12000),     // VolEnvAttack
        d(true, 2, -12000, 5000, -12000),     // VolEnvHold
        d(true, 2, -12000, 8000, -12000),     // VolEnvDecay
        d(false, 1, 0, 1440, 0),              // VolEnvSustain
        d(true, 2, -12000, 8000, -12000),     // VolEnvRelease
        d(false, 1, -1200, 1200, 0),          // KeyToVolEnvHold
        d(false, 1, -1200, 1200, 0),          // KeyToVolEnvDecay
        d(false, 0, 0, 0, 0),                 // Instrument
        d(false, 0, 0, 0, 0),                 // Reserved1
        d(false, 0, 0, 127, 0),               // KeyRange
        d(false, 0, 0, 127, 0),               // VelRange
        d(false, 1, 0, i32::MAX, 0),          // StartLoopAddrCoarseOfs
        d(true, 0, 0, 127, -1),               // KeyNum
        d(true, 1, 0, 127, -1),               // Velocity
        d(true, 1, 0, 1440, 0),               // Attenuation
        d(false, 0, 0, 0, 0),                 // Reserved2
        d(false, 1, 0, i32::MAX, 0),          // EndLoopAddrCoarseOfs
        d(false, 1, -120, 120, 0),            // CoarseTune
        d(false, 1, -99, 99, 0),              // FineTune
        d(false, 0, 0, 0, 0),                 // SampleId
        d(false, 0, 0, 0, 0),                 // SampleMode
        d(false, 0, 0, 0, 0),                 // Reserved3
        d(false, 1, 0, 1200, 100),            // ScaleTune
        d(false, 0, 0, 0, 0),                 // ExclusiveClass
        d(true, 0, 0, 127, -1),               // OverrideRootKey
        d(true, 0, 0, 127, 0),                // Pitch
    ]
};

/// Flag distinguishing "unused / set / NRPN-absolute" for one generator
/// instance, `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenFlags {
    Unused,
    Set,
    AbsNrpn,
}

/// One generator instance: nominal value plus modulator and NRPN offsets.
#[derive(Debug, Clone, Copy)]
pub struct Generator {
    pub flags: GenFlags,
    pub val: f64,
    pub modv: f64,
    pub nrpn: f64,
}

impl Generator {
    pub fn new(default: f64) -> Self {
        Generator {
            flags: GenFlags::Unused,
            val: default,
            modv: 0.0,
            nrpn: 0.0,
        }
    }

    /// Effective value per `spec.md` §3: `val + mod + nrpn`, except under
    /// NRPN-absolute mode where `nrpn` alone is authoritative.
    #[inline]
    pub fn effective(&self) -> f64 {
        match self.flags {
            GenFlags::AbsNrpn => self.nrpn,
            _ => self.val + self.modv + self.nrpn,
        }
    }
}

/// A full 59-slot generator array, as carried by a Voice.
#[derive(Debug, Clone, Copy)]
pub struct GenArray(pub [Generator; GEN_LAST]);

impl GenArray {
    /// `genSetDefaultValues`: resets every generator to its SF2 default,
    /// clearing mod/nrpn offsets and the flag.
    pub fn set_defaults() -> Self {
        let mut gens = [Generator::new(0.0); GEN_LAST];
        for (i, g) in gens.iter_mut().enumerate() {
            *g = Generator::new(GEN_DEFAULTS[i].default as f64);
        }
        GenArray(gens)
    }

    /// `genInit`: defaults, then pulls in channel NRPN offsets and the
    /// per-generator absolute-override flag (`spec.md` §4.3).
    pub fn init_from_channel(channel: &Channel) -> Self {
        let mut array = Self::set_defaults();
        for i in 0..GEN_LAST {
            array.0[i].nrpn = channel.nrpn_values[i];
            if channel.nrpn_abs[i] {
                array.0[i].flags = GenFlags::AbsNrpn;
            }
        }
        array
    }

    #[inline]
    pub fn get(&self, g: GenType) -> &Generator {
        &self.0[g.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, g: GenType) -> &mut Generator {
        &mut self.0[g.index()]
    }

    #[inline]
    pub fn effective(&self, g: GenType) -> f64 {
        self.get(g).effective()
    }
}

/// `genScaleNrpn`: maps a 14-bit NRPN data value into the generator's
/// scaled offset range (`spec.md` §4.3).
pub fn gen_scale_nrpn(gen: GenType, data14: i32) -> f64 {
    let value = (data14 - 8192).clamp(-8192, 8192);
    (value * GEN_DEFAULTS[gen.index()].nrpn_scale) as f64
}
