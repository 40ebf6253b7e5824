//! Channel Module
//!
//! Per-MIDI-channel state: controller values, NRPN overrides, pitch bend,
//! program/bank selection, and the optional micro-tuning binding
//! (`spec.md` §3 Channel).

use crate::gen::GEN_LAST;
use crate::tuning::Tuning;
use std::sync::Arc;

/// Standard MIDI CC numbers this crate inspects directly.
pub const CC_MOD_WHEEL: u8 = 1;
pub const CC_VOLUME: u8 = 7;
pub const CC_PAN: u8 = 10;
pub const CC_EXPRESSION: u8 = 11;
pub const CC_SUSTAIN: u8 = 64;
pub const CC_RPN_LSB: u8 = 100;
pub const CC_RPN_MSB: u8 = 101;
pub const CC_NRPN_LSB: u8 = 98;
pub const CC_NRPN_MSB: u8 = 99;
pub const CC_DATA_ENTRY_MSB: u8 = 6;
pub const CC_DATA_ENTRY_LSB: u8 = 38;
pub const CC_REVERB_SEND: u8 = 91;
pub const CC_CHORUS_SEND: u8 = 93;
pub const CC_ALL_SOUND_OFF: u8 = 120;
pub const CC_ALL_CTRL_OFF: u8 = 121;
pub const CC_ALL_NOTES_OFF: u8 = 123;

/// Wavetable interpolation quality, selectable per channel so a host can
/// trade CPU for audio fidelity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpMethod {
    None,
    #[default]
    Linear,
    Cubic4th,
    Sinc7th,
}

/// Percussion bank index, `spec.md` §3 Bank index.
pub const PERCUSSION_BANK: u32 = 128;
pub const PERCUSSION_CHANNEL: usize = 9;

/// Per-MIDI-channel state.
#[derive(Debug, Clone)]
pub struct Channel {
    pub index: usize,
    pub bank: u32,
    pub program: u32,
    /// Cached preset lookup key; resolved against the bank by the synth.
    pub preset_resolved: bool,

    pub cc: [i32; 128],
    pub channel_pressure: i32,
    pub pitch_bend: i32,
    pub pitch_wheel_sensitivity: i32,
    pub key_pressure: [i32; 128],

    /// Selected NRPN generator, or `None` if the last RPN/NRPN select was
    /// invalid or the select accumulated out of generator range
    /// (`spec.md` §9 open question: out-of-range is ignored, not remapped).
    pub nrpn_select: Option<usize>,
    pub nrpn_active: bool,
    pub nrpn_raw_select: i32,
    pub rpn_active: bool,
    pub data_entry_msb: i32,

    /// Cached NRPN-offset values and absolute-override flags, copied into
    /// a voice's generator array by `genInit`.
    pub nrpn_values: [f64; GEN_LAST],
    pub nrpn_abs: [bool; GEN_LAST],

    pub interp_method: InterpMethod,
    pub tuning: Option<Arc<Tuning>>,
}

impl Channel {
    pub fn new(index: usize) -> Self {
        let mut c = Channel {
            index,
            bank: 0,
            program: 0,
            preset_resolved: false,
            cc: [0; 128],
            channel_pressure: 0,
            pitch_bend: 0x2000,
            pitch_wheel_sensitivity: 2,
            key_pressure: [0; 128],
            nrpn_select: None,
            nrpn_active: false,
            nrpn_raw_select: 0,
            rpn_active: false,
            data_entry_msb: 0,
            nrpn_values: [0.0; GEN_LAST],
            nrpn_abs: [false; GEN_LAST],
            interp_method: InterpMethod::default(),
            tuning: None,
        };
        c.init_ctrl(false);
        c
    }

    /// `channelInitCtrl`: resets controllers. `all_ctrl_off` mirrors CC 121
    /// semantics, which spares a handful of controllers (RP-015).
    pub fn init_ctrl(&mut self, all_ctrl_off: bool) {
        self.channel_pressure = 0;
        self.pitch_bend = 0x2000;

        let spared = |cc: u8| {
            matches!(
                cc,
                91..=95 | 70..=79 | 0 | 32 | 7 | 39 | 10 | 42
            )
        };

        if all_ctrl_off {
            for cc in 0..CC_ALL_SOUND_OFF as usize {
                if !spared(cc as u8) {
                    self.cc[cc] = 0;
                }
            }
        } else {
            self.cc = [0; 128];
        }

        self.key_pressure = [0; 128];

        self.cc[CC_RPN_LSB as usize] = 127;
        self.cc[CC_RPN_MSB as usize] = 127;
        self.cc[CC_NRPN_LSB as usize] = 127;
        self.cc[CC_NRPN_MSB as usize] = 127;
        self.cc[CC_EXPRESSION as usize] = 127;

        if !all_ctrl_off {
            self.pitch_wheel_sensitivity = 2;
            self.cc[CC_VOLUME as usize] = 100;
            self.cc[CC_PAN as usize] = 64;
        }
    }

    pub fn reset(&mut self) {
        self.bank = 0;
        self.program = 0;
        self.preset_resolved = false;
        self.tuning = None;
        self.nrpn_select = None;
        self.init_ctrl(false);
    }

    #[inline]
    pub fn cc_value(&self, ctrl: u8) -> i32 {
        self.cc[ctrl as usize & 0x7f]
    }

    #[inline]
    pub fn sustained(&self) -> bool {
        self.cc_value(CC_SUSTAIN) >= 64
    }

    pub fn is_percussion(&self, drum_channel_active: bool) -> bool {
        self.index == PERCUSSION_CHANNEL && drum_channel_active
    }

    /// Sets channel pressure from a MIDI "channel pressure" message.
    pub fn set_channel_pressure(&mut self, value: i32) {
        self.channel_pressure = value;
    }

    /// Sets pitch bend from a 14-bit centered-at-0x2000 value.
    pub fn set_pitch_bend(&mut self, value14: i32) {
        self.pitch_bend = value14;
    }

    pub fn set_pitch_wheel_sens(&mut self, semitones: i32) {
        self.pitch_wheel_sensitivity = semitones;
    }

    /// Handles a CC message's channel-level bookkeeping (bank select, RPN/
    /// NRPN select and data-entry accumulation). Returns `true` if this CC
    /// changed an NRPN-mapped generator (caller should re-run
    /// `voiceModulate`-equivalent logic against active voices).
    pub fn cc(&mut self, ctrl: u8, value: i32, drum_channel_active: bool) -> CcEffect {
        self.cc[ctrl as usize & 0x7f] = value;

        match ctrl {
            c if c == CC_SUSTAIN as u8 => {
                if value < 64 {
                    return CcEffect::ReleaseSustained;
                }
            }
            0 => {
                // Bank select MSB
                if self.is_percussion(drum_channel_active) {
                    return CcEffect::None;
                }
                self.bank = (value as u32) & 0x7f;
                self.preset_resolved = false;
            }
            32 => {
                // Bank select LSB
                if self.is_percussion(drum_channel_active) {
                    return CcEffect::None;
                }
                self.bank = ((value as u32) & 0x7f) + (((self.bank >> 7) & 0x7f) << 7);
                self.preset_resolved = false;
            }
            c if c == CC_RPN_MSB => {
                self.rpn_active = (value != 127) && self.cc_value(ctrl) != 127;
                self.nrpn_active = false;
            }
            c if c == CC_NRPN_MSB => {
                self.nrpn_raw_select = 0;
                self.nrpn_active = true;
                self.rpn_active = false;
            }
            c if c == CC_NRPN_LSB => {
                // SF2.01 coarse/fine NRPN select convention (spec.md §9):
                // value==100/101 are RPN no-ops here; 96/97/98/99 select.
                if self.nrpn_active {
                    self.nrpn_raw_select += value;
                    self.resolve_nrpn_select();
                }
            }
            c if c == CC_DATA_ENTRY_MSB => {
                self.data_entry_msb = value;
                if self.nrpn_active {
                    if let Some(idx) = self.nrpn_select {
                        let data14 = (value << 7) | 0;
                        let gen = crate::gen::GenType::from_index(idx).unwrap();
                        let offset = crate::gen::gen_scale_nrpn(gen, data14);
                        self.nrpn_values[idx] = offset;
                        return CcEffect::NrpnGeneratorChanged(idx);
                    }
                }
            }
            c if c == CC_DATA_ENTRY_LSB => {
                if self.nrpn_active {
                    if let Some(idx) = self.nrpn_select {
                        let data14 = (self.data_entry_msb << 7) | value;
                        let gen = crate::gen::GenType::from_index(idx).unwrap();
                        let offset = crate::gen::gen_scale_nrpn(gen, data14);
                        self.nrpn_values[idx] = offset;
                        return CcEffect::NrpnGeneratorChanged(idx);
                    }
                }
            }
            c if c == CC_ALL_SOUND_OFF => return CcEffect::AllSoundOff,
            c if c == CC_ALL_CTRL_OFF => {
                self.init_ctrl(true);
                return CcEffect::AllControllersOff;
            }
            c if c == CC_ALL_NOTES_OFF => return CcEffect::AllNotesOff,
            _ => {}
        }
        CcEffect::ModulatorCc(ctrl)
    }

    /// Out-of-range accumulated NRPN selects are ignored, not remapped,
    /// per the open question in `spec.md` §9.
    fn resolve_nrpn_select(&mut self) {
        let select = self.nrpn_raw_select;
        if select >= 0 && (select as usize) < GEN_LAST {
            self.nrpn_select = Some(select as usize);
        } else {
            self.nrpn_select = None;
        }
    }
}

/// What a channel-level event implies the synth must additionally do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcEffect {
    None,
    ModulatorCc(u8),
    ReleaseSustained,
    NrpnGeneratorChanged(usize),
    AllSoundOff,
    AllControllersOff,
    AllNotesOff,
}
