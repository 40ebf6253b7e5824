//! Modulator Module
//!
//! Evaluates one SF2 modulator: `amount * transform(source1) *
//! transform(source2)` (`spec.md` §3 Modulator, §4.1, §9). Curve lookups
//! go through `tables::concave`/`tables::convex` rather than a per-sample
//! 16-way branch, per the lookup-table design note in `spec.md` §9.

use crate::channel::Channel;
use crate::gen::GenType;
use crate::tables::{concave, convex};

/// Modulator source: either a standard MIDI CC number or one of the
/// "general controller" special sources (SF2.01 §8.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModSource {
    None,
    NoteOnVelocity,
    NoteOnKey,
    PolyPressure,
    ChannelPressure,
    PitchWheel,
    PitchWheelSensitivity,
    Cc(u8),
}

/// Curve shape, from `xformType & 0x0c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    Linear,
    Concave,
    Convex,
    Switch,
}

/// A single source's transform: polarity, direction, and curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transform {
    pub bipolar: bool,
    pub negative: bool,
    pub curve: Curve,
}

impl Transform {
    pub const fn new(bipolar: bool, negative: bool, curve: Curve) -> Self {
        Transform {
            bipolar,
            negative,
            curve,
        }
    }

    /// Maps a raw source value `v` (already in `[0, range]`) through this
    /// transform's polarity/direction/curve, per `original_source/src/mod.c`.
    fn apply(self, v: f64, range: f64) -> f64 {
        let x = v / range;
        match (self.bipolar, self.negative, self.curve) {
            (false, false, Curve::Linear) => x,
            (false, true, Curve::Linear) => 1.0 - x,
            (true, false, Curve::Linear) => -1.0 + 2.0 * x,
            (true, true, Curve::Linear) => 1.0 - 2.0 * x,
            (false, false, Curve::Concave) => concave(x),
            (false, true, Curve::Concave) => concave(1.0 - x),
            (true, false, Curve::Concave) => {
                if v > range / 2.0 {
                    concave(2.0 * x - 1.0)
                } else {
                    -concave(1.0 - 2.0 * x)
                }
            }
            (true, true, Curve::Concave) => {
                if v > range / 2.0 {
                    -concave(2.0 * x - 1.0)
                } else {
                    concave(1.0 - 2.0 * x)
                }
            }
            (false, false, Curve::Convex) => convex(x),
            (false, true, Curve::Convex) => convex(1.0 - x),
            (true, false, Curve::Convex) => {
                if v > range / 2.0 {
                    convex(2.0 * x - 1.0)
                } else {
                    -convex(1.0 - 2.0 * x)
                }
            }
            (true, true, Curve::Convex) => {
                if v > range / 2.0 {
                    -convex(2.0 * x - 1.0)
                } else {
                    convex(1.0 - 2.0 * x)
                }
            }
            (false, false, Curve::Switch) => {
                if x >= 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            (false, true, Curve::Switch) => {
                if x >= 0.5 {
                    0.0
                } else {
                    1.0
                }
            }
            (true, false, Curve::Switch) => {
                if x >= 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            (true, true, Curve::Switch) => {
                if x >= 0.5 {
                    -1.0
                } else {
                    1.0
                }
            }
        }
    }
}

/// The context a modulator reads its source values from: the owning
/// channel plus a handful of per-voice values (velocity, key, poly
/// pressure) that do not live on `Channel`.
pub struct ModContext<'a> {
    pub channel: &'a Channel,
    pub velocity: u8,
    pub key: u8,
}

impl ModSource {
    fn raw_value(self, ctx: &ModContext) -> (f64, f64) {
        match self {
            ModSource::None => (1.0, 1.0),
            ModSource::NoteOnVelocity => (ctx.velocity as f64, 127.0),
            ModSource::NoteOnKey => (ctx.key as f64, 127.0),
            ModSource::PolyPressure => (ctx.channel.key_pressure[ctx.key as usize] as f64, 127.0),
            ModSource::ChannelPressure => (ctx.channel.channel_pressure as f64, 127.0),
            ModSource::PitchWheel => (ctx.channel.pitch_bend as f64, 0x4000 as f64),
            ModSource::PitchWheelSensitivity => {
                (ctx.channel.pitch_wheel_sensitivity as f64, 127.0)
            }
            ModSource::Cc(cc) => (ctx.channel.cc_value(cc) as f64, 127.0),
        }
    }
}

/// One SF2 modulator: `(source1, transform1, source2, transform2, dest,
/// amount)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Modulator {
    pub src1: ModSource,
    pub xform1: Transform,
    pub src2: ModSource,
    pub xform2: Transform,
    pub dest: GenType,
    pub amount: f64,
}

impl Modulator {
    /// Evaluates this modulator against the given channel/voice context.
    /// Implements the SF2.01 §8.4.2 "S. Christian Collins" special case
    /// (velocity->filter-cutoff default modulator is neutered to zero
    /// rather than forcing filter closed on low-velocity notes), matching
    /// `original_source/src/mod.c`.
    pub fn evaluate(&self, ctx: &ModContext) -> f64 {
        if self.src1 == ModSource::NoteOnVelocity
            && self.src2 == ModSource::NoteOnVelocity
            && self.xform1 == DEFAULT_VEL_TO_FC_XFORM1
            && self.xform2 == DEFAULT_VEL_TO_FC_XFORM2
            && self.dest as usize == GenType::FilterFc as usize
        {
            return 0.0;
        }

        if self.src1 == ModSource::None {
            return 0.0;
        }
        let (raw1, range1) = self.src1.raw_value(ctx);
        let v1 = self.xform1.apply(raw1, range1);
        if v1 == 0.0 {
            return 0.0;
        }

        let v2 = if self.src2 == ModSource::None {
            1.0
        } else {
            let (raw2, range2) = self.src2.raw_value(ctx);
            self.xform2.apply(raw2, range2)
        };

        self.amount * v1 * v2
    }

    /// Two modulators are "identical" iff src1, src2, dest, and both
    /// transforms match; `amount` does not participate (`spec.md` §3,
    /// SF2.01 §9.5.1 bullet 3).
    pub fn identical(&self, other: &Modulator) -> bool {
        self.dest as usize == other.dest as usize
            && self.src1 == other.src1
            && self.src2 == other.src2
            && self.xform1 == other.xform1
            && self.xform2 == other.xform2
    }
}

const DEFAULT_VEL_TO_FC_XFORM1: Transform = Transform::new(false, true, Curve::Linear);
const DEFAULT_VEL_TO_FC_XFORM2: Transform = Transform::new(false, false, Curve::Switch);

/// The ten SF2.01 §8.4 default modulators, added to every new voice
/// before instrument/preset modulators (`spec.md` §4.8 step 4).
pub fn default_modulators() -> Vec<Modulator> {
    vec![
        // velocity -> initial attenuation
        Modulator {
            src1: ModSource::NoteOnVelocity,
            xform1: Transform::new(false, true, Curve::Concave),
            src2: ModSource::None,
            xform2: Transform::new(false, false, Curve::Linear),
            dest: GenType::Attenuation,
            amount: 960.0,
        },
        // velocity -> filter cutoff (neutered by the special case above)
        Modulator {
            src1: ModSource::NoteOnVelocity,
            xform1: DEFAULT_VEL_TO_FC_XFORM1,
            src2: ModSource::NoteOnVelocity,
            xform2: DEFAULT_VEL_TO_FC_XFORM2,
            dest: GenType::FilterFc,
            amount: -2400.0,
        },
        // channel pressure -> vibrato LFO pitch
        Modulator {
            src1: ModSource::ChannelPressure,
            xform1: Transform::new(true, false, Curve::Linear),
            src2: ModSource::None,
            xform2: Transform::new(false, false, Curve::Linear),
            dest: GenType::VibLfoToPitch,
            amount: 50.0,
        },
        // mod wheel -> vibrato LFO pitch
        Modulator {
            src1: ModSource::Cc(crate::channel::CC_MOD_WHEEL),
            xform1: Transform::new(true, false, Curve::Linear),
            src2: ModSource::None,
            xform2: Transform::new(false, false, Curve::Linear),
            dest: GenType::VibLfoToPitch,
            amount: 50.0,
        },
        // CC7 volume -> attenuation
        Modulator {
            src1: ModSource::Cc(crate::channel::CC_VOLUME),
            xform1: Transform::new(false, true, Curve::Concave),
            src2: ModSource::None,
            xform2: Transform::new(false, false, Curve::Linear),
            dest: GenType::Attenuation,
            amount: 960.0,
        },
        // CC10 pan -> pan
        Modulator {
            src1: ModSource::Cc(crate::channel::CC_PAN),
            xform1: Transform::new(true, false, Curve::Linear),
            src2: ModSource::None,
            xform2: Transform::new(false, false, Curve::Linear),
            dest: GenType::Pan,
            amount: 500.0,
        },
        // CC11 expression -> attenuation
        Modulator {
            src1: ModSource::Cc(crate::channel::CC_EXPRESSION),
            xform1: Transform::new(false, true, Curve::Concave),
            src2: ModSource::None,
            xform2: Transform::new(false, false, Curve::Linear),
            dest: GenType::Attenuation,
            amount: 960.0,
        },
        // CC91 reverb send -> reverb send
        Modulator {
            src1: ModSource::Cc(crate::channel::CC_REVERB_SEND),
            xform1: Transform::new(false, false, Curve::Linear),
            src2: ModSource::None,
            xform2: Transform::new(false, false, Curve::Linear),
            dest: GenType::ReverbSend,
            amount: 200.0,
        },
        // CC93 chorus send -> chorus send
        Modulator {
            src1: ModSource::Cc(crate::channel::CC_CHORUS_SEND),
            xform1: Transform::new(false, false, Curve::Linear),
            src2: ModSource::None,
            xform2: Transform::new(false, false, Curve::Linear),
            dest: GenType::ChorusSend,
            amount: 200.0,
        },
        // pitch wheel, scaled by pitch wheel sensitivity -> pitch
        Modulator {
            src1: ModSource::PitchWheel,
            xform1: Transform::new(true, false, Curve::Linear),
            src2: ModSource::PitchWheelSensitivity,
            xform2: Transform::new(false, false, Curve::Linear),
            dest: GenType::Pitch,
            amount: 12700.0,
        },
    ]
}

/// Whether a modulator's source1/source2 matches the given `(cc, ctrl)`
/// pair, used by `voiceModulate` to decide which generators need
/// recomputing after a CC message (`spec.md` §4.8).
pub fn mod_has_source(m: &Modulator, is_cc: bool, ctrl: u8) -> bool {
    let matches = |src: ModSource| match src {
        ModSource::Cc(c) => is_cc && c == ctrl,
        ModSource::None => false,
        _ => !is_cc && (src_as_ctrl(src) == ctrl),
    };
    matches(m.src1) || matches(m.src2)
}

fn src_as_ctrl(src: ModSource) -> u8 {
    match src {
        ModSource::NoteOnVelocity => 2,
        ModSource::NoteOnKey => 3,
        ModSource::PolyPressure => 10,
        ModSource::ChannelPressure => 13,
        ModSource::PitchWheel => 14,
        ModSource::PitchWheelSensitivity => 16,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(channel: &Channel) -> ModContext {
        ModContext {
            channel,
            velocity: 100,
            key: 60,
        }
    }

    #[test]
    fn identity_ignores_amount() {
        let mods = default_modulators();
        let mut clone = mods[0];
        clone.amount = 12345.0;
        assert!(mods[0].identical(&clone));
    }

    #[test]
    fn identity_is_reflexive_for_every_default() {
        for m in default_modulators() {
            assert!(m.identical(&m));
        }
    }

    #[test]
    fn velocity_to_attenuation_is_zero_at_max_velocity() {
        let channel = Channel::new(0);
        let m = &default_modulators()[0];
        let ctx = ModContext {
            channel: &channel,
            velocity: 127,
            key: 60,
        };
        let v = m.evaluate(&ctx);
        assert!(v.abs() < 1e-6, "expected ~0 at full velocity, got {v}");
    }

    #[test]
    fn velocity_to_attenuation_increases_attenuation_at_low_velocity() {
        let channel = Channel::new(0);
        let m = &default_modulators()[0];
        let ctx = ModContext {
            channel: &channel,
            velocity: 1,
            key: 60,
        };
        let v = m.evaluate(&ctx);
        assert!(v > 0.0);
    }

    #[test]
    fn velocity_to_filter_cutoff_default_is_neutered() {
        let channel = Channel::new(0);
        let m = &default_modulators()[1];
        let c = ctx(&channel);
        assert_eq!(m.evaluate(&c), 0.0);
    }

    #[test]
    fn pitch_wheel_centered_is_zero() {
        let channel = Channel::new(0);
        let m = &default_modulators()[9];
        let c = ctx(&channel);
        assert_eq!(m.evaluate(&c), 0.0);
    }

    #[test]
    fn pitch_wheel_full_positive_is_full_amount() {
        let mut channel = Channel::new(0);
        channel.pitch_bend = 0x3FFF;
        let m = &default_modulators()[9];
        let c = ctx(&channel);
        let v = m.evaluate(&c);
        assert!((v - 12700.0 * (2.0 / 127.0)).abs() < 1.0);
    }
}
