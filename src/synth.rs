//! Synth Module
//!
//! Top-level synthesizer: owns a loaded `Bank`, one `Channel` per MIDI
//! channel, a `VoicePool`, and the reverb/chorus send effects
//! (`spec.md` §2 System Overview, §6 External Interfaces). Implements
//! note-on dispatch (§4.11) and the per-buffer render loop (§4.8
//! "Rendering one frame", §5 Concurrency & Resource Model).

use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::bank::{gen_amount, Bank, GenEntry};
use crate::channel::{Channel, CcEffect, PERCUSSION_BANK};
use crate::constants::{BUFSIZE, DEFAULT_POLYPHONY, DEFAULT_SAMPLE_RATE};
use crate::effects::{Chorus, Reverb};
use crate::error::{Result, SynthError};
use crate::gen::GenType;
use crate::modulator::merge_zone_modulators;
use crate::tuning::{apply_sysex, parse_sysex, TuningBank};
use crate::voice::{ModAddMode, VoicePool, PRESET_EXCLUDED_GENS};

bitflags! {
    /// Bit-set runtime flags, `spec.md` §6 Settings.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SynthFlags: u32 {
        const REVERB_ACTIVE = 1 << 0;
        const CHORUS_ACTIVE = 1 << 1;
        const DRUM_CHANNEL_10_ACTIVE = 1 << 2;
        const VERBOSE = 1 << 3;
        const DUMP_EVENTS = 1 << 4;
    }
}

impl Default for SynthFlags {
    fn default() -> Self {
        SynthFlags::REVERB_ACTIVE | SynthFlags::CHORUS_ACTIVE | SynthFlags::DRUM_CHANNEL_10_ACTIVE
    }
}

/// Configuration bag passed to `Synth::new` (`spec.md` §6 Settings).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub polyphony: usize,
    pub midi_channels: usize,
    pub sample_rate: f64,
    pub gain: f64,
    pub min_note_length_ms: f64,
    pub flags: SynthFlags,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            polyphony: DEFAULT_POLYPHONY,
            midi_channels: 16,
            sample_rate: DEFAULT_SAMPLE_RATE,
            gain: 1.0,
            min_note_length_ms: 10.0,
            flags: SynthFlags::default(),
        }
    }
}

impl Settings {
    /// Clamps/validates user-supplied settings per `spec.md` §6's bounds.
    fn validate(&self) -> Result<()> {
        if !(16..=4096).contains(&self.polyphony) {
            return Err(SynthError::BadArgument(format!(
                "polyphony {} out of range [16, 4096]",
                self.polyphony
            )));
        }
        if self.midi_channels == 0 || self.midi_channels % 16 != 0 {
            return Err(SynthError::BadArgument(format!(
                "midiChannels {} must be a positive multiple of 16",
                self.midi_channels
            )));
        }
        if self.sample_rate != DEFAULT_SAMPLE_RATE {
            return Err(SynthError::UnsupportedBankFeature(format!(
                "sample rate {} unsupported, only {} is",
                self.sample_rate, DEFAULT_SAMPLE_RATE
            )));
        }
        if !(0.0..=10.0).contains(&self.gain) {
            return Err(SynthError::BadArgument(format!(
                "gain {} out of range [0, 10]",
                self.gain
            )));
        }
        Ok(())
    }
}

/// The top-level synthesizer (`spec.md` §2, §6 `synthNew`).
pub struct Synth {
    settings: Settings,
    bank: Option<Arc<Bank>>,
    channels: Vec<Channel>,
    voices: VoicePool,
    tunings: TuningBank,
    reverb: Reverb,
    chorus: Chorus,
    min_note_length_ticks: u64,

    scratch_l: Vec<f64>,
    scratch_r: Vec<f64>,
    scratch_reverb: Vec<f64>,
    scratch_chorus: Vec<f64>,

    /// Carries over partial-buffer input so `render_frame` can accept any
    /// `N`, not just multiples of `BUFSIZE` (`spec.md` §6 `synthRenderFrame`).
    pending_left: Vec<f64>,
    pending_right: Vec<f64>,
}

impl Synth {
    pub fn new(settings: Settings) -> Result<Synth> {
        settings.validate()?;
        let min_note_length_ticks =
            (settings.min_note_length_ms / 1000.0 * settings.sample_rate) as u64;
        let channels = (0..settings.midi_channels).map(Channel::new).collect();
        let voices = VoicePool::new(settings.polyphony);
        let reverb = Reverb::new(settings.sample_rate);
        let chorus = Chorus::new(settings.sample_rate);

        Ok(Synth {
            scratch_l: vec![0.0; BUFSIZE],
            scratch_r: vec![0.0; BUFSIZE],
            scratch_reverb: vec![0.0; BUFSIZE],
            scratch_chorus: vec![0.0; BUFSIZE],
            settings,
            bank: None,
            channels,
            voices,
            tunings: TuningBank::new(),
            reverb,
            chorus,
            min_note_length_ticks,
            pending_left: Vec::new(),
            pending_right: Vec::new(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// `synthLoadBank`: parses the SF2/SF3 bytes and installs the result,
    /// replacing any previously loaded bank (`spec.md` §6).
    pub fn load_bank(&mut self, data: &[u8]) -> Result<()> {
        let bank = Bank::load(data)?;
        self.bank = Some(Arc::new(bank));
        for ch in &mut self.channels {
            ch.preset_resolved = false;
        }
        Ok(())
    }

    fn channel_mut(&mut self, chan: usize) -> Result<&mut Channel> {
        self.channels
            .get_mut(chan)
            .ok_or_else(|| SynthError::BadArgument(format!("channel {chan} out of range")))
    }

    fn drum_channel_active(&self) -> bool {
        self.settings.flags.contains(SynthFlags::DRUM_CHANNEL_10_ACTIVE)
    }

    /// `synthNoteOn`: velocity 0 is rerouted to note-off (`spec.md` §4.11).
    pub fn note_on(&mut self, chan: usize, key: u8, vel: u8) -> Result<()> {
        if key > 127 {
            return Err(SynthError::BadArgument(format!("key {key} out of range")));
        }
        if vel > 127 {
            return Err(SynthError::BadArgument(format!("velocity {vel} out of range")));
        }
        if vel == 0 {
            self.note_off(chan, key)?;
            return Ok(());
        }
        self.channel_mut(chan)?;

        let Some(bank) = self.bank.clone() else {
            log::warn!("channel {chan} has no preset loaded");
            return Err(SynthError::BankNotLoaded(chan));
        };

        let (preset_bank, preset_program, sustain_down) = {
            let ch = &self.channels[chan];
            let drum_active = self.drum_channel_active();
            let bank_idx = if ch.is_percussion(drum_active) {
                PERCUSSION_BANK
            } else {
                ch.bank
            };
            (bank_idx, ch.program, ch.sustained())
        };
        let Some(preset) = bank.find_preset(preset_bank, preset_program) else {
            log::warn!("channel {chan} has no preset loaded");
            return Err(SynthError::BankNotLoaded(chan));
        };

        let min_len = self.min_note_length_ticks;
        let release_sentinel_note_id = u64::MAX;
        self.voices
            .release_same_key(chan, key, release_sentinel_note_id, min_len, sustain_down);

        let preset_global = bank.preset_global(preset);
        let preset_global_gens = preset_global
            .map(|z| bank.zone_gens(z, &bank.preset_gens))
            .unwrap_or(&[]);
        let preset_global_mods = preset_global
            .map(|z| bank.zone_mods(z, &bank.preset_mods))
            .unwrap_or(&[]);

        for pz in bank.preset_zones(preset) {
            if !pz.in_range(key, vel) {
                continue;
            }
            let Some(inst_idx) = pz.link else { continue };
            let Some(inst) = bank.instrument(inst_idx) else {
                continue;
            };

            let inst_global = bank.inst_global(inst);
            let inst_global_gens = inst_global
                .map(|z| bank.zone_gens(z, &bank.inst_gens))
                .unwrap_or(&[]);
            let inst_global_mods = inst_global
                .map(|z| bank.zone_mods(z, &bank.inst_mods))
                .unwrap_or(&[]);

            for iz in bank.inst_zones(inst) {
                let Some(sample_idx) = iz.link else { continue };
                let Some(sample) = bank.sample(sample_idx) else {
                    continue;
                };
                if sample.is_rom() {
                    continue;
                }
                if !iz.in_range(key, vel) {
                    continue;
                }

                let (idx, note_id) = self.voices.allocate();
                let sample_rate = self.settings.sample_rate;
                let gain = self.settings.gain;
                {
                    let channel_ref = &self.channels[chan];
                    let voice = self.voices.get_mut(idx);
                    voice.configure(sample.clone(), channel_ref, key, vel, note_id, sample_rate, gain);
                }

                let voice = self.voices.get_mut(idx);
                Self::apply_instrument_gens(voice, inst_global_gens, bank.zone_gens(iz, &bank.inst_gens));
                let inst_mods = merge_zone_modulators(
                    inst_global_mods,
                    bank.zone_mods(iz, &bank.inst_mods),
                );
                for m in &inst_mods {
                    voice.add_modulator(*m, ModAddMode::Overwrite);
                }

                Self::apply_preset_gens(voice, preset_global_gens, bank.zone_gens(pz, &bank.preset_gens));
                let preset_mods = merge_zone_modulators(
                    preset_global_mods,
                    bank.zone_mods(pz, &bank.preset_mods),
                );
                for m in &preset_mods {
                    if m.amount != 0.0 {
                        voice.add_modulator(*m, ModAddMode::Add);
                    }
                }

                let exclusive_class = voice.start();
                if exclusive_class != 0 {
                    self.voices.kill_exclusive_class(chan, exclusive_class, note_id);
                }
            }
        }

        Ok(())
    }

    /// Instrument-level generators: local zone supersedes the instrument's
    /// global zone (`spec.md` §4.11).
    fn apply_instrument_gens(
        voice: &mut crate::voice::Voice,
        global: &[GenEntry],
        local: &[GenEntry],
    ) {
        for g in GenType::ALL {
            if let Some(amount) = gen_amount(local, g) {
                voice.set_local_gen(g, amount);
            } else if let Some(amount) = gen_amount(global, g) {
                voice.set_local_gen(g, amount);
            }
        }
    }

    /// Preset-level generators: ADD onto the instrument-derived value,
    /// excluding generators whose range meaning is instrument-only
    /// (`spec.md` §4.11).
    fn apply_preset_gens(voice: &mut crate::voice::Voice, global: &[GenEntry], local: &[GenEntry]) {
        for g in GenType::ALL {
            if PRESET_EXCLUDED_GENS.contains(&g) {
                continue;
            }
            if let Some(amount) = gen_amount(local, g) {
                voice.add_preset_gen(g, amount);
            } else if let Some(amount) = gen_amount(global, g) {
                voice.add_preset_gen(g, amount);
            }
        }
    }

    /// `synthNoteOff`.
    pub fn note_off(&mut self, chan: usize, key: u8) -> Result<()> {
        let ch = self.channel_mut(chan)?;
        let sustain_down = ch.sustained();
        let min_len = self.min_note_length_ticks;
        for voice in self.voices.iter_mut() {
            if voice.channel() == chan && voice.key() == key && !voice.is_finished() {
                voice.note_off(min_len, sustain_down);
            }
        }
        Ok(())
    }

    /// `synthCC`: updates channel state, then re-evaluates affected
    /// voices' modulators as `Channel::cc`'s returned effect demands
    /// (`spec.md` §4.8 Modulation).
    pub fn cc(&mut self, chan: usize, ctrl: u8, value: i32) -> Result<()> {
        if ctrl > 127 {
            return Err(SynthError::BadArgument(format!("CC number {ctrl} out of range")));
        }
        let drum_active = self.drum_channel_active();
        let ch = self.channel_mut(chan)?;
        let effect = ch.cc(ctrl, value, drum_active);

        match effect {
            CcEffect::None => {}
            CcEffect::ModulatorCc(ctrl) => {
                for voice in self.voices.iter_mut() {
                    if voice.channel() == chan {
                        voice.modulate(&self.channels[chan], true, ctrl);
                    }
                }
            }
            CcEffect::ReleaseSustained => {
                let min_len = self.min_note_length_ticks;
                for voice in self.voices.iter_mut() {
                    if voice.channel() == chan {
                        voice.note_off(min_len, false);
                    }
                }
            }
            CcEffect::NrpnGeneratorChanged(_) => {
                // Offsets apply to future voices via `genInit`; no live
                // voice needs retroactive adjustment.
            }
            CcEffect::AllSoundOff => {
                for voice in self.voices.iter_mut() {
                    if voice.channel() == chan {
                        voice.force_off();
                    }
                }
            }
            CcEffect::AllControllersOff => {
                for voice in self.voices.iter_mut() {
                    if voice.channel() == chan {
                        voice.modulate_all(&self.channels[chan]);
                    }
                }
            }
            CcEffect::AllNotesOff => {
                let min_len = self.min_note_length_ticks;
                for voice in self.voices.iter_mut() {
                    if voice.channel() == chan {
                        voice.note_off(min_len, false);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn channel_pressure(&mut self, chan: usize, value: i32) -> Result<()> {
        self.channel_mut(chan)?.set_channel_pressure(value);
        for voice in self.voices.iter_mut() {
            if voice.channel() == chan {
                voice.modulate(&self.channels[chan], false, 13);
            }
        }
        Ok(())
    }

    pub fn pitch_bend(&mut self, chan: usize, value14: i32) -> Result<()> {
        self.channel_mut(chan)?.set_pitch_bend(value14);
        for voice in self.voices.iter_mut() {
            if voice.channel() == chan {
                voice.modulate(&self.channels[chan], false, 14);
            }
        }
        Ok(())
    }

    pub fn pitch_wheel_sens(&mut self, chan: usize, semitones: i32) -> Result<()> {
        self.channel_mut(chan)?.set_pitch_wheel_sens(semitones);
        for voice in self.voices.iter_mut() {
            if voice.channel() == chan {
                voice.modulate(&self.channels[chan], false, 16);
            }
        }
        Ok(())
    }

    pub fn program_change(&mut self, chan: usize, program: u32) -> Result<()> {
        let ch = self.channel_mut(chan)?;
        ch.program = program;
        ch.preset_resolved = false;
        Ok(())
    }

    pub fn bank_select(&mut self, chan: usize, bank: u32) -> Result<()> {
        let ch = self.channel_mut(chan)?;
        ch.bank = bank;
        ch.preset_resolved = false;
        Ok(())
    }

    /// `synthSysex`: MIDI tuning SysEx subset (`spec.md` §6). Malformed or
    /// out-of-range messages are logged and ignored, not propagated.
    pub fn sysex(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(msg) = parse_sysex(bytes) else {
            return Err(SynthError::BadArgument("unrecognized sysex message".into()));
        };
        apply_sysex(&mut self.tunings, &msg)
    }

    /// `synthRenderFrame`: renders `left.len()` samples, buffering any
    /// remainder across calls so `N` need not be a multiple of `BUFSIZE`
    /// (`spec.md` §6).
    pub fn render_frame(&mut self, left: &mut [f64], right: &mut [f64]) -> Result<()> {
        if left.len() != right.len() {
            return Err(SynthError::BadArgument(
                "left/right output buffers must be the same length".into(),
            ));
        }

        let mut written = 0;
        while written < left.len() {
            while self.pending_left.len() < BUFSIZE {
                self.render_one_buffer();
            }
            let take = (left.len() - written).min(self.pending_left.len());
            left[written..written + take].copy_from_slice(&self.pending_left[..take]);
            right[written..written + take].copy_from_slice(&self.pending_right[..take]);
            self.pending_left.drain(..take);
            self.pending_right.drain(..take);
            written += take;
        }
        Ok(())
    }

    /// Renders exactly one `BUFSIZE`-sample buffer across every active
    /// voice, mixes in the reverb/chorus sends, and appends the result to
    /// the pending output queue. The reverb/chorus pass runs strictly
    /// after every voice pass, per `spec.md` §5's ordering guarantee.
    fn render_one_buffer(&mut self) {
        self.scratch_l.iter_mut().for_each(|s| *s = 0.0);
        self.scratch_r.iter_mut().for_each(|s| *s = 0.0);
        self.scratch_reverb.iter_mut().for_each(|s| *s = 0.0);
        self.scratch_chorus.iter_mut().for_each(|s| *s = 0.0);

        let reverb_on = self.settings.flags.contains(SynthFlags::REVERB_ACTIVE);
        let chorus_on = self.settings.flags.contains(SynthFlags::CHORUS_ACTIVE);

        for idx in 0..self.voices.len() {
            let voice = self.voices.get_mut(idx);
            if voice.is_finished() {
                continue;
            }
            let chan = voice.channel();
            let interp_method = self
                .channels
                .get(chan)
                .map(|c| c.interp_method)
                .unwrap_or_default();
            voice.render(
                &mut self.scratch_l,
                &mut self.scratch_r,
                reverb_on.then_some(&mut self.scratch_reverb[..]),
                chorus_on.then_some(&mut self.scratch_chorus[..]),
                interp_method,
            );
        }

        if reverb_on {
            self.reverb
                .process_block_mix(&self.scratch_reverb, &mut self.scratch_l, &mut self.scratch_r);
        }
        if chorus_on {
            self.chorus
                .process_block_mix(&self.scratch_chorus, &mut self.scratch_l, &mut self.scratch_r);
        }

        self.pending_left.extend_from_slice(&self.scratch_l);
        self.pending_right.extend_from_slice(&self.scratch_r);
    }
}
