//! Voice Module
//!
//! One playing note's full per-sample DSP chain: phase accumulator, volume
//! and modulation envelopes, mod/vib LFOs, biquad filter, and mix gains
//! (`spec.md` §3 Voice, §4.8). A `VoicePool` owns a fixed-capacity array of
//! these and implements the priority-based stealing scheme from §6.
//!
//! Every `Envelope::tick()` / `Lfo::advance_buffer()` call here corresponds
//! to one `render()` call, i.e. one `BUFSIZE`-sample buffer — not one
//! sample — so envelope section `count` and LFO `incr` are both expressed
//! in buffers, matching the "advance one step" per-buffer phrasing in
//! `spec.md` §4.8 and the buffer-sized LFO increment in §4.5.

use crate::channel::Channel;
use crate::constants::{BUFSIZE, DEFAULT_SAMPLE_RATE};
use crate::envelope::{remap_attack_to_release, EnvStage, Envelope};
use crate::filter::Filter;
use crate::gen::{GenArray, GenFlags, GenType};
use crate::interp::{self, Region};
use crate::lfo::Lfo;
use crate::modulator::{default_modulators, mod_has_source, ModContext, Modulator};
use crate::phase::Phase;
use crate::sample::SampleRef;
use crate::tables::{atten2amp, cb2amp, clamp_filter_cents, ct2hz, pan_gains};

/// Noise-floor amplitude below which a voice is culled early rather than
/// rendered to inaudible silence (`spec.md` §4.8 step 4).
const NOISE_FLOOR_AMP: f64 = 2.0 / 32768.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceStatus {
    Clean,
    On,
    Sustained,
    Off,
}

/// `GEN_SAMPLEMODE` values (SF2.01 §8.1.3); 2 is reserved/unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleMode {
    NoLoop,
    Loop,
    LoopUntilRelease,
}

impl SampleMode {
    fn from_gen(v: i32) -> Self {
        match v {
            1 => SampleMode::Loop,
            3 => SampleMode::LoopUntilRelease,
            _ => SampleMode::NoLoop,
        }
    }
}

/// Whether a merged modulator replaces or accumulates onto an identical
/// existing one (`spec.md` §4.8 step 5, §4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModAddMode {
    Overwrite,
    Add,
}

/// Generators whose zone-level meaning is defined only at the instrument
/// level; preset-zone generators of these types are never added onto a
/// voice (`spec.md` §4.11 note-on dispatch).
pub const PRESET_EXCLUDED_GENS: [GenType; 13] = [
    GenType::StartAddrOfs,
    GenType::EndAddrOfs,
    GenType::StartLoopAddrOfs,
    GenType::EndLoopAddrOfs,
    GenType::StartAddrCoarseOfs,
    GenType::EndAddrCoarseOfs,
    GenType::StartLoopAddrCoarseOfs,
    GenType::EndLoopAddrCoarseOfs,
    GenType::KeyRange,
    GenType::VelRange,
    GenType::SampleMode,
    GenType::ExclusiveClass,
    GenType::OverrideRootKey,
];

/// Builds the effective modulator list for one owner (global zone's
/// modulators followed by the local zone's), with local entries replacing
/// any identical global one (`spec.md` §4.11: "identical-to-earlier entries
/// nulled").
pub fn merge_zone_modulators(global: &[Modulator], local: &[Modulator]) -> Vec<Modulator> {
    let mut merged: Vec<Modulator> = global.to_vec();
    for m in local {
        if let Some(existing) = merged.iter_mut().find(|e| e.identical(m)) {
            *existing = *m;
        } else {
            merged.push(*m);
        }
    }
    merged
}

/// Converts a timecent duration to a count of whole `BUFSIZE` buffers,
/// rounded up (`spec.md` §4.4).
fn tc_to_buf_count(tc: f64, sample_rate: f64) -> u32 {
    let seconds = 2f64.powf(tc / 1200.0);
    let samples = seconds * sample_rate;
    ((samples / BUFSIZE as f64).ceil().max(1.0)) as u32
}

/// Converts a timecent duration to a raw sample count, for LFO delay
/// (`spec.md` §4.5), which compares directly against the voice's
/// per-sample `ticks` counter rather than a buffer count.
fn tc_to_sample_count(tc: f64, sample_rate: f64) -> u32 {
    let seconds = 2f64.powf(tc / 1200.0);
    (seconds * sample_rate).round().max(0.0) as u32
}

/// One instance of a sample playing through one DSP chain.
pub struct Voice {
    status: VoiceStatus,
    released: bool,
    channel: usize,
    key: u8,
    velocity: u8,
    note_id: u64,
    exclusive_class: i32,

    sample: Option<SampleRef>,
    start: u32,
    end: u32,
    loop_start: u32,
    loop_end: u32,
    root_pitch_hz: f64,
    nominal_pitch_cents: f64,

    phase: Phase,

    volenv: Envelope,
    modenv: Envelope,
    modlfo: Lfo,
    viblfo: Lfo,
    filter: Filter,

    amp: f64,
    amp_left: f64,
    amp_right: f64,
    amp_reverb: f64,
    amp_chorus: f64,
    min_attenuation_cb: f64,

    gens: GenArray,
    mods: Vec<Modulator>,

    has_looped: bool,
    ticks: u64,
    pending_release: Option<(u64, bool)>,

    sample_rate: f64,
    synth_gain: f64,

    scratch: [f64; BUFSIZE],
}

impl Voice {
    pub fn new() -> Self {
        Voice {
            status: VoiceStatus::Clean,
            released: false,
            channel: 0,
            key: 0,
            velocity: 0,
            note_id: 0,
            exclusive_class: 0,
            sample: None,
            start: 0,
            end: 0,
            loop_start: 0,
            loop_end: 0,
            root_pitch_hz: 440.0,
            nominal_pitch_cents: 0.0,
            phase: Phase::default(),
            volenv: Envelope::new(),
            modenv: Envelope::new(),
            modlfo: Lfo::new(),
            viblfo: Lfo::new(),
            filter: Filter::new(),
            amp: 0.0,
            amp_left: 0.0,
            amp_right: 0.0,
            amp_reverb: 0.0,
            amp_chorus: 0.0,
            min_attenuation_cb: 0.0,
            gens: GenArray::set_defaults(),
            mods: Vec::new(),
            has_looped: false,
            ticks: 0,
            pending_release: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            synth_gain: 1.0,
            scratch: [0.0; BUFSIZE],
        }
    }

    pub fn status(&self) -> VoiceStatus {
        self.status
    }

    pub fn is_finished(&self) -> bool {
        self.status == VoiceStatus::Off
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn note_id(&self) -> u64 {
        self.note_id
    }

    pub fn exclusive_class(&self) -> i32 {
        self.exclusive_class
    }

    /// `allocVoice` steps 3-4: resets every part of the voice and installs
    /// channel-derived generator defaults plus the nine SF2.01 default
    /// modulators. The caller still has to merge in zone generators/
    /// modulators and call `start()`.
    #[allow(clippy::too_many_arguments)]
    pub fn configure(
        &mut self,
        sample: SampleRef,
        channel: &Channel,
        key: u8,
        velocity: u8,
        note_id: u64,
        sample_rate: f64,
        synth_gain: f64,
    ) {
        self.status = VoiceStatus::On;
        self.released = false;
        self.channel = channel.index;
        self.key = key;
        self.velocity = velocity;
        self.note_id = note_id;
        self.exclusive_class = 0;
        self.sample = Some(sample);
        self.sample_rate = sample_rate;
        self.synth_gain = synth_gain;

        self.volenv = Envelope::new();
        self.modenv = Envelope::new();
        self.modlfo = Lfo::new();
        self.viblfo = Lfo::new();
        self.filter = Filter::new();

        self.gens = GenArray::init_from_channel(channel);
        self.mods = default_modulators();

        self.amp = 0.0;
        self.has_looped = false;
        self.ticks = 0;
        self.pending_release = None;
        self.phase = Phase::default();
    }

    /// Sets a zone's locally-defined generator value (`iz.gen[g].val = `,
    /// `pz.gen[g].val = ` in the global-zone fallback branch of `spec.md`
    /// §4.11).
    pub fn set_local_gen(&mut self, g: GenType, amount: i16) {
        let gen = self.gens.get_mut(g);
        gen.val = amount as f64;
        gen.flags = GenFlags::Set;
    }

    /// Adds a preset-zone generator onto the existing (instrument-derived)
    /// value, per `spec.md` §4.11's "Preset-level generators: ADD".
    pub fn add_preset_gen(&mut self, g: GenType, amount: i16) {
        let gen = self.gens.get_mut(g);
        gen.val += amount as f64;
        if gen.flags == GenFlags::Unused {
            gen.flags = GenFlags::Set;
        }
    }

    pub fn add_modulator(&mut self, m: Modulator, mode: ModAddMode) {
        if let Some(existing) = self.mods.iter_mut().find(|e| e.identical(&m)) {
            match mode {
                ModAddMode::Overwrite => existing.amount = m.amount,
                ModAddMode::Add => existing.amount += m.amount,
            }
        } else {
            self.mods.push(m);
        }
    }

    /// `voiceStart`: finalizes every derived field from the now-complete
    /// generator/modulator set and returns the generator's exclusive class
    /// (0 if none) so the caller can run the exclusive-class kill scan.
    pub fn start(&mut self) -> i32 {
        self.min_attenuation_cb = self.compute_min_attenuation_cb();
        for g in GenType::ALL {
            self.update_param(g);
        }
        self.exclusive_class = self.gens.effective(GenType::ExclusiveClass) as i32;
        self.phase = Phase::from_index(self.start);
        self.has_looped = false;
        self.ticks = 0;
        self.amp = 0.0;
        self.exclusive_class
    }

    fn compute_min_attenuation_cb(&self) -> f64 {
        let gen = self.gens.get(GenType::Attenuation);
        let base = gen.val * 0.4 + gen.nrpn;
        let reach: f64 = self
            .mods
            .iter()
            .filter(|m| m.dest.index() == GenType::Attenuation.index())
            .map(|m| m.amount.abs())
            .sum();
        (base - reach).max(0.0)
    }

    fn effective_attenuation_cb(&self) -> f64 {
        let gen = self.gens.get(GenType::Attenuation);
        match gen.flags {
            GenFlags::AbsNrpn => gen.nrpn,
            _ => gen.val * 0.4 + gen.modv + gen.nrpn,
        }
    }

    /// `voiceUpdateParam`: derives real-time voice fields from a single
    /// generator's current effective value.
    pub fn update_param(&mut self, g: GenType) {
        match g {
            GenType::StartAddrOfs
            | GenType::EndAddrOfs
            | GenType::StartLoopAddrOfs
            | GenType::EndLoopAddrOfs
            | GenType::StartAddrCoarseOfs
            | GenType::EndAddrCoarseOfs
            | GenType::StartLoopAddrCoarseOfs
            | GenType::EndLoopAddrCoarseOfs => self.refresh_sample_bounds(),

            GenType::VolEnvDelay
            | GenType::VolEnvAttack
            | GenType::VolEnvHold
            | GenType::VolEnvDecay
            | GenType::VolEnvSustain
            | GenType::VolEnvRelease
            | GenType::KeyToVolEnvHold
            | GenType::KeyToVolEnvDecay => self.refresh_volenv(),

            GenType::ModEnvDelay
            | GenType::ModEnvAttack
            | GenType::ModEnvHold
            | GenType::ModEnvDecay
            | GenType::ModEnvSustain
            | GenType::ModEnvRelease
            | GenType::KeyToModEnvHold
            | GenType::KeyToModEnvDecay => self.refresh_modenv(),

            GenType::ModLfoDelay | GenType::ModLfoFreq => self.refresh_modlfo(),
            GenType::VibLfoDelay | GenType::VibLfoFreq => self.refresh_viblfo(),

            GenType::FilterQ => self.filter.set_q(self.gens.effective(GenType::FilterQ)),

            GenType::Pan | GenType::ReverbSend | GenType::ChorusSend => self.refresh_mix_gains(),

            GenType::CoarseTune
            | GenType::FineTune
            | GenType::ScaleTune
            | GenType::OverrideRootKey
            | GenType::KeyNum => self.refresh_pitch_basis(),

            _ => {}
        }
    }

    fn refresh_sample_bounds(&mut self) {
        let Some(sample) = &self.sample else {
            return;
        };
        let fine = |g: GenType| self.gens.effective(g) as i64;
        let coarse = |g: GenType| self.gens.effective(g) as i64 * 32768;
        let len = sample.data.len() as i64;

        let start = (sample.start as i64 + fine(GenType::StartAddrOfs)
            + coarse(GenType::StartAddrCoarseOfs))
        .clamp(0, (len - 1).max(0)) as u32;
        let end = (sample.end as i64 + fine(GenType::EndAddrOfs)
            + coarse(GenType::EndAddrCoarseOfs))
        .clamp(start as i64, (len - 1).max(0)) as u32;
        let loop_start = (sample.loop_start as i64 + fine(GenType::StartLoopAddrOfs)
            + coarse(GenType::StartLoopAddrCoarseOfs))
        .clamp(start as i64, end as i64) as u32;
        let loop_end = (sample.loop_end as i64 + fine(GenType::EndLoopAddrOfs)
            + coarse(GenType::EndLoopAddrCoarseOfs))
        .clamp(loop_start as i64 + 2, end as i64 + 1) as u32;

        self.start = start;
        self.end = end;
        self.loop_start = loop_start;
        self.loop_end = loop_end;
    }

    /// Root pitch (Hz at which `phaseIncr=1` reproduces the original pitch)
    /// plus the key/tune-derived nominal pitch, both in absolute cents
    /// (`spec.md` §3 Voice, GLOSSARY "Absolute cent"). Pitch-wheel and
    /// envelope/LFO pitch modulation are added fresh every `render()` call
    /// via the `Pitch` pseudo-generator instead of being cached here.
    fn refresh_pitch_basis(&mut self) {
        let Some(sample) = &self.sample else {
            return;
        };
        let override_root = self.gens.effective(GenType::OverrideRootKey);
        let root_key = if override_root >= 0.0 {
            override_root
        } else {
            sample.original_key as f64
        };
        self.root_pitch_hz = ct2hz(root_key * 100.0 - sample.pitch_correction as f64);

        let pitch_key = if self.gens.get(GenType::KeyNum).flags != GenFlags::Unused {
            self.gens.effective(GenType::KeyNum)
        } else {
            self.key as f64
        };
        let scale = self.gens.effective(GenType::ScaleTune) / 100.0;
        let key_cents = root_key * 100.0 + (pitch_key - root_key) * 100.0 * scale;
        self.nominal_pitch_cents = key_cents
            + self.gens.effective(GenType::CoarseTune) * 100.0
            + self.gens.effective(GenType::FineTune);
    }

    fn refresh_volenv(&mut self) {
        let key = self.key as f64;
        let delay = self.gens.effective(GenType::VolEnvDelay);
        let attack = self.gens.effective(GenType::VolEnvAttack);
        let hold = self.gens.effective(GenType::VolEnvHold)
            + self.gens.effective(GenType::KeyToVolEnvHold) * (60.0 - key);
        let decay = self.gens.effective(GenType::VolEnvDecay)
            + self.gens.effective(GenType::KeyToVolEnvDecay) * (60.0 - key);
        let sustain_cb = self.gens.effective(GenType::VolEnvSustain).clamp(0.0, 1000.0);
        // -7200 cents floor avoids an audible click on an extremely short
        // release (`spec.md` §4.4).
        let release = self.gens.effective(GenType::VolEnvRelease).max(-7200.0);

        self.volenv.set_delay(tc_to_buf_count(delay, self.sample_rate));
        self.volenv.set_attack(tc_to_buf_count(attack, self.sample_rate));
        self.volenv.set_hold(tc_to_buf_count(hold, self.sample_rate));
        self.volenv.set_decay(
            tc_to_buf_count(decay, self.sample_rate),
            (1.0 - sustain_cb / 1000.0).clamp(0.0, 1.0),
        );
        self.volenv
            .set_release(tc_to_buf_count(release, self.sample_rate), 1.0);
    }

    fn refresh_modenv(&mut self) {
        let key = self.key as f64;
        let delay = self.gens.effective(GenType::ModEnvDelay);
        let attack = self.gens.effective(GenType::ModEnvAttack);
        let hold = self.gens.effective(GenType::ModEnvHold)
            + self.gens.effective(GenType::KeyToModEnvHold) * (60.0 - key);
        let decay = self.gens.effective(GenType::ModEnvDecay)
            + self.gens.effective(GenType::KeyToModEnvDecay) * (60.0 - key);
        let sustain_permille = self.gens.effective(GenType::ModEnvSustain).clamp(0.0, 1000.0);
        let release = self.gens.effective(GenType::ModEnvRelease);

        self.modenv.set_delay(tc_to_buf_count(delay, self.sample_rate));
        self.modenv.set_attack(tc_to_buf_count(attack, self.sample_rate));
        self.modenv.set_hold(tc_to_buf_count(hold, self.sample_rate));
        self.modenv.set_decay(
            tc_to_buf_count(decay, self.sample_rate),
            (1.0 - sustain_permille / 1000.0).clamp(0.0, 1.0),
        );
        self.modenv
            .set_release(tc_to_buf_count(release, self.sample_rate), 2.0);
    }

    fn refresh_modlfo(&mut self) {
        self.modlfo.set_delay_samples(tc_to_sample_count(
            self.gens.effective(GenType::ModLfoDelay),
            self.sample_rate,
        ));
        self.modlfo
            .set_freq_cents(self.gens.effective(GenType::ModLfoFreq), self.sample_rate);
    }

    fn refresh_viblfo(&mut self) {
        self.viblfo.set_delay_samples(tc_to_sample_count(
            self.gens.effective(GenType::VibLfoDelay),
            self.sample_rate,
        ));
        self.viblfo
            .set_freq_cents(self.gens.effective(GenType::VibLfoFreq), self.sample_rate);
    }

    fn refresh_mix_gains(&mut self) {
        let pan = (self.gens.effective(GenType::Pan) / 500.0).clamp(-1.0, 1.0);
        let (l, r) = pan_gains((pan + 1.0) / 2.0);
        self.amp_left = l * self.synth_gain;
        self.amp_right = r * self.synth_gain;
        self.amp_reverb =
            (self.gens.effective(GenType::ReverbSend) / 1000.0).clamp(0.0, 1.0) * self.synth_gain;
        self.amp_chorus =
            (self.gens.effective(GenType::ChorusSend) / 1000.0).clamp(0.0, 1.0) * self.synth_gain;
    }

    /// `voiceModulate`: re-sums every modulator targeting a generator whose
    /// source matches `(is_cc, ctrl)`, for every such destination generator
    /// (`spec.md` §4.8 Modulation).
    pub fn modulate(&mut self, channel: &Channel, is_cc: bool, ctrl: u8) {
        let ctx = ModContext {
            channel,
            velocity: self.voice_velocity(),
            key: self.voice_key(),
        };
        let mut touched = [false; crate::gen::GEN_LAST];
        for m in &self.mods {
            if mod_has_source(m, is_cc, ctrl) {
                touched[m.dest.index()] = true;
            }
        }
        for (i, hit) in touched.iter().enumerate() {
            if *hit {
                let g = GenType::from_index(i).unwrap();
                let sum: f64 = self
                    .mods
                    .iter()
                    .filter(|m| m.dest.index() == i)
                    .map(|m| m.evaluate(&ctx))
                    .sum();
                self.gens.get_mut(g).modv = sum;
                self.update_param(g);
            }
        }
    }

    /// `voiceModulateAll`, used for CC 121 all-controllers-off.
    pub fn modulate_all(&mut self, channel: &Channel) {
        let ctx = ModContext {
            channel,
            velocity: self.voice_velocity(),
            key: self.voice_key(),
        };
        let mut sums = [0.0f64; crate::gen::GEN_LAST];
        for m in &self.mods {
            sums[m.dest.index()] += m.evaluate(&ctx);
        }
        for (i, sum) in sums.into_iter().enumerate() {
            self.gens.get_mut(GenType::from_index(i).unwrap()).modv = sum;
        }
        for g in GenType::ALL {
            self.update_param(g);
        }
    }

    fn voice_velocity(&self) -> u8 {
        let v = self.gens.effective(GenType::Velocity);
        if v >= 0.0 {
            v as u8
        } else {
            self.velocity
        }
    }

    fn voice_key(&self) -> u8 {
        if self.gens.get(GenType::KeyNum).flags != GenFlags::Unused {
            self.gens.effective(GenType::KeyNum) as u8
        } else {
            self.key
        }
    }

    /// Defers release until `min_note_length_ticks` has elapsed since
    /// `start()`, otherwise releases (or sustains) immediately
    /// (`spec.md` §4.8 Note-off).
    pub fn note_off(&mut self, min_note_length_ticks: u64, sustain_pedal_down: bool) {
        if self.ticks < min_note_length_ticks {
            self.pending_release = Some((min_note_length_ticks, sustain_pedal_down));
        } else {
            self.release_now(sustain_pedal_down);
        }
    }

    fn release_now(&mut self, sustain_pedal_down: bool) {
        if sustain_pedal_down {
            self.status = VoiceStatus::Sustained;
            return;
        }
        let mod_lfo_to_vol = self.gens.effective(GenType::ModLfoToVol);
        let modlfo_to_vol_db = self.modlfo.value() * -mod_lfo_to_vol;
        let remapped = remap_attack_to_release(self.volenv.value(), modlfo_to_vol_db);
        self.volenv.force_release(Some(remapped));
        self.modenv.force_release(None);
        self.released = true;
    }

    /// Exclusive-class kill: clears the generator, forces both envelopes
    /// into a ~200-timecent release (`spec.md` §4.8 Exclusive class).
    pub fn kill_exclusive(&mut self) {
        self.gens.get_mut(GenType::ExclusiveClass).val = 0.0;
        self.exclusive_class = 0;
        let count = tc_to_buf_count(-200.0, self.sample_rate);
        self.volenv.force_quick_release(count, 1.0);
        self.modenv.force_quick_release(count, 2.0);
        self.released = true;
    }

    /// Immediately silences the voice without running its release section,
    /// used when the voice-pool stealing scan needs the slot back now.
    pub fn force_off(&mut self) {
        self.status = VoiceStatus::Off;
    }

    fn is_looping(&self) -> bool {
        match SampleMode::from_gen(self.gens.effective(GenType::SampleMode) as i32) {
            SampleMode::Loop => true,
            SampleMode::LoopUntilRelease => self.volenv.stage() < EnvStage::Release,
            SampleMode::NoLoop => false,
        }
    }

    /// Renders one `BUFSIZE`-sample buffer, mixing into `left`/`right` and,
    /// if the sends are non-zero, `reverb`/`chorus` (`spec.md` §4.8
    /// Rendering one frame).
    pub fn render(
        &mut self,
        left: &mut [f64],
        right: &mut [f64],
        mut reverb: Option<&mut [f64]>,
        mut chorus: Option<&mut [f64]>,
        interp_method: crate::channel::InterpMethod,
    ) {
        if let Some((required, sustain)) = self.pending_release {
            if self.ticks >= required {
                self.pending_release = None;
                self.release_now(sustain);
            }
        }

        let vol = self.volenv.tick();
        if self.volenv.is_finished() {
            self.status = VoiceStatus::Off;
            return;
        }
        let modenv_val = self.modenv.tick();
        let modlfo_val = self.modlfo.advance_buffer(self.ticks);
        let viblfo_val = self.viblfo.advance_buffer(self.ticks);

        let attenuation_cb = self.effective_attenuation_cb();
        let mod_lfo_to_vol = self.gens.effective(GenType::ModLfoToVol);
        let target_amp = if self.volenv.stage() == EnvStage::Attack {
            atten2amp(attenuation_cb) * cb2amp(modlfo_val * -mod_lfo_to_vol) * vol
        } else {
            atten2amp(attenuation_cb) * cb2amp(960.0 * (1.0 - vol) + modlfo_val * -mod_lfo_to_vol)
        };

        if atten2amp(self.min_attenuation_cb) * vol < NOISE_FLOOR_AMP {
            self.status = VoiceStatus::Off;
            return;
        }

        let amp_incr = (target_amp - self.amp) / BUFSIZE as f64;
        if self.amp == 0.0 && amp_incr == 0.0 {
            self.ticks += BUFSIZE as u64;
            return;
        }

        let mod_lfo_to_pitch = self.gens.effective(GenType::ModLfoToPitch);
        let vib_lfo_to_pitch = self.gens.effective(GenType::VibLfoToPitch);
        let mod_env_to_pitch = self.gens.effective(GenType::ModEnvToPitch);
        let pitch_cents = self.nominal_pitch_cents
            + self.gens.effective(GenType::Pitch)
            + modlfo_val * mod_lfo_to_pitch
            + viblfo_val * vib_lfo_to_pitch
            + modenv_val * mod_env_to_pitch;
        let incr = Phase::incr_from_ratio(ct2hz(pitch_cents) / self.root_pitch_hz).max(1);

        let mod_lfo_to_fc = self.gens.effective(GenType::ModLfoToFilterFc);
        let mod_env_to_fc = self.gens.effective(GenType::ModEnvToFilterFc);
        let base_fc = clamp_filter_cents(self.gens.effective(GenType::FilterFc));
        self.filter.update_frequency(
            base_fc + modlfo_val * mod_lfo_to_fc + modenv_val * mod_env_to_fc,
            self.sample_rate,
        );

        let region = Region {
            start: self.start,
            end: self.end,
            loop_start: self.loop_start,
            loop_end: self.loop_end,
            looping: self.is_looping(),
        };

        let mut amp = self.amp;
        let written = {
            let data = &self.sample.as_ref().unwrap().data;
            interp::render(
                interp_method,
                data,
                region,
                &mut self.phase,
                incr,
                &mut amp,
                amp_incr,
                &mut self.has_looped,
                &mut self.scratch,
            )
        };
        self.amp = amp;

        self.filter.process_block(&mut self.scratch[..written]);

        for i in 0..written {
            let s = self.scratch[i];
            left[i] += s * self.amp_left;
            right[i] += s * self.amp_right;
            if let Some(r) = reverb.as_deref_mut() {
                r[i] += s * self.amp_reverb;
            }
            if let Some(c) = chorus.as_deref_mut() {
                c[i] += s * self.amp_chorus;
            }
        }

        if written < BUFSIZE {
            self.status = VoiceStatus::Off;
        }
        self.ticks += BUFSIZE as u64;
    }
}

impl Default for Voice {
    fn default() -> Self {
        Voice::new()
    }
}

fn voice_priority(v: &Voice, current_note_id: u64) -> f64 {
    let mut base = 10_000.0;
    if v.released {
        base -= 2_000.0;
    }
    if v.status == VoiceStatus::Sustained {
        base -= 1_000.0;
    }
    base -= (current_note_id as i64 - v.note_id as i64) as f64;
    if v.volenv.stage() != EnvStage::Attack {
        base += v.volenv.value() * 1_000.0;
    }
    base
}

/// A fixed-capacity array of voices with stable indices
/// (`spec.md` §9 Design Notes "Voice pool").
pub struct VoicePool {
    voices: Vec<Voice>,
    next_note_id: u64,
}

impl VoicePool {
    pub fn new(polyphony: usize) -> Self {
        VoicePool {
            voices: (0..polyphony).map(|_| Voice::new()).collect(),
            next_note_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Voice {
        &mut self.voices[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Voice> {
        self.voices.iter_mut()
    }

    /// `allocVoice` steps 1-2: reuses a clean/off slot if one exists, else
    /// steals the minimum-priority active voice (`spec.md` §4.8, §6 Voice
    /// stealing priority). Returns the slot index and a fresh, monotonic
    /// note-ID.
    pub fn allocate(&mut self) -> (usize, u64) {
        let note_id = self.next_note_id;
        self.next_note_id += 1;

        if let Some(idx) = self
            .voices
            .iter()
            .position(|v| matches!(v.status, VoiceStatus::Clean | VoiceStatus::Off))
        {
            return (idx, note_id);
        }

        let victim = self
            .voices
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                voice_priority(a, note_id)
                    .partial_cmp(&voice_priority(b, note_id))
                    .unwrap()
            })
            .map(|(i, _)| i)
            .expect("polyphony is never zero");
        self.voices[victim].force_off();
        (victim, note_id)
    }

    /// Releases every voice on `channel` sharing the non-zero exclusive
    /// `class` other than `keep_note_id` (`spec.md` §4.8 Exclusive class).
    pub fn kill_exclusive_class(&mut self, channel: usize, class: i32, keep_note_id: u64) {
        if class == 0 {
            return;
        }
        for v in &mut self.voices {
            if v.channel == channel
                && v.exclusive_class == class
                && v.note_id != keep_note_id
                && !v.is_finished()
            {
                v.kill_exclusive();
            }
        }
    }

    /// Releases every voice on `channel` at `key` other than `keep_note_id`
    /// (`spec.md` §4.11: "release any voice on the same channel and key
    /// whose note-ID differs from the new note-ID").
    pub fn release_same_key(
        &mut self,
        channel: usize,
        key: u8,
        keep_note_id: u64,
        min_note_length_ticks: u64,
        sustain_pedal_down: bool,
    ) {
        for v in &mut self.voices {
            if v.channel == channel
                && v.key == key
                && v.note_id != keep_note_id
                && !v.is_finished()
            {
                v.note_off(min_note_length_ticks, sustain_pedal_down);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::sample::{Sample, SampleTypeFlags};
    use std::sync::Arc;

    fn looping_sample() -> SampleRef {
        let data: Vec<i16> = (0..200)
            .map(|i| ((i as f64 * 0.1).sin() * 10000.0) as i16)
            .collect();
        Arc::new(Sample {
            name: "test".into(),
            data,
            start: 0,
            end: 199,
            loop_start: 10,
            loop_end: 190,
            original_key: 69,
            pitch_correction: 0,
            sample_rate: 44100,
            sample_type: SampleTypeFlags::MONO,
            loop_amplitude_bound: 1.0,
        })
    }

    #[test]
    fn new_voice_is_clean() {
        let v = Voice::new();
        assert_eq!(v.status(), VoiceStatus::Clean);
    }

    #[test]
    fn pool_allocates_clean_slots_before_stealing() {
        let mut pool = VoicePool::new(4);
        let (idx, id) = pool.allocate();
        assert_eq!(idx, 0);
        assert_eq!(id, 0);
    }

    #[test]
    fn pool_steals_when_full() {
        let mut pool = VoicePool::new(2);
        let channel = Channel::new(0);
        let sample = looping_sample();
        for i in 0..2 {
            let (idx, id) = pool.allocate();
            pool.get_mut(idx)
                .configure(sample.clone(), &channel, 60, 100, id, 44100.0, 1.0);
            pool.get_mut(idx).set_local_gen(GenType::SampleMode, 1);
            pool.get_mut(idx).start();
            let _ = i;
        }
        // both voices now On; a third allocation must steal one of them.
        let (idx, id) = pool.allocate();
        assert_eq!(id, 2);
        assert!(idx == 0 || idx == 1);
    }

    #[test]
    fn exclusive_class_kill_forces_release_without_turning_voice_off() {
        let mut pool = VoicePool::new(2);
        let channel = Channel::new(0);
        let sample = looping_sample();

        let (idx_a, id_a) = pool.allocate();
        pool.get_mut(idx_a)
            .configure(sample.clone(), &channel, 38, 100, id_a, 44100.0, 1.0);
        pool.get_mut(idx_a).set_local_gen(GenType::SampleMode, 1);
        pool.get_mut(idx_a).set_local_gen(GenType::ExclusiveClass, 1);
        pool.get_mut(idx_a).start();

        let (idx_b, id_b) = pool.allocate();
        pool.get_mut(idx_b)
            .configure(sample, &channel, 46, 100, id_b, 44100.0, 1.0);
        pool.get_mut(idx_b).set_local_gen(GenType::SampleMode, 1);
        pool.get_mut(idx_b).set_local_gen(GenType::ExclusiveClass, 1);
        pool.get_mut(idx_b).start();

        pool.kill_exclusive_class(0, 1, id_b);

        assert_eq!(pool.get_mut(idx_a).volenv.stage(), EnvStage::Release);
        assert!(!pool.get_mut(idx_a).is_finished());
    }

    #[test]
    fn note_off_defers_when_shorter_than_min_note_length() {
        let mut v = Voice::new();
        let channel = Channel::new(0);
        v.configure(looping_sample(), &channel, 60, 100, 0, 44100.0, 1.0);
        v.set_local_gen(GenType::SampleMode, 1);
        v.start();
        v.ticks = 10;
        v.note_off(1000, false);
        assert_eq!(v.volenv.stage(), EnvStage::Delay);
        assert!(v.pending_release.is_some());
    }

    #[test]
    fn note_off_releases_immediately_past_min_note_length() {
        let mut v = Voice::new();
        let channel = Channel::new(0);
        v.configure(looping_sample(), &channel, 60, 100, 0, 44100.0, 1.0);
        v.set_local_gen(GenType::SampleMode, 1);
        v.start();
        v.ticks = 2000;
        v.note_off(10, false);
        assert_eq!(v.volenv.stage(), EnvStage::Release);
    }

    #[test]
    fn merge_zone_modulators_local_replaces_identical_global() {
        let defaults = default_modulators();
        let mut replaced = defaults[0];
        replaced.amount = 42.0;
        let merged = merge_zone_modulators(&defaults, &[replaced]);
        assert_eq!(merged.len(), defaults.len());
        assert_eq!(merged[0].amount, 42.0);
    }

    #[test]
    fn merge_zone_modulators_appends_novel_local_entries() {
        let defaults = default_modulators();
        let novel = Modulator {
            src1: crate::modulator::ModSource::Cc(7),
            xform1: crate::modulator::Transform::new(false, false, crate::modulator::Curve::Linear),
            src2: crate::modulator::ModSource::None,
            xform2: crate::modulator::Transform::new(false, false, crate::modulator::Curve::Linear),
            dest: GenType::Pan,
            amount: 10.0,
        };
        let merged = merge_zone_modulators(&defaults, &[novel]);
        assert_eq!(merged.len(), defaults.len() + 1);
    }

    #[test]
    fn render_produces_finite_audio_after_attack_ramps_up() {
        let mut v = Voice::new();
        let channel = Channel::new(0);
        v.configure(looping_sample(), &channel, 69, 100, 0, 44100.0, 1.0);
        v.set_local_gen(GenType::SampleMode, 1);
        v.start();

        let mut left = [0.0; BUFSIZE];
        let mut right = [0.0; BUFSIZE];
        let mut peak = 0.0f64;
        for _ in 0..8 {
            left = [0.0; BUFSIZE];
            right = [0.0; BUFSIZE];
            v.render(&mut left, &mut right, None, None, crate::channel::InterpMethod::Linear);
            for &s in left.iter().chain(right.iter()) {
                assert!(s.is_finite());
                peak = peak.max(s.abs());
            }
        }
        assert!(peak > 0.0);
        assert!(!v.is_finished());
    }
}
