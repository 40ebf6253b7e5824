//! Envelope Module
//!
//! 6-stage DAHDSR envelope generator (`spec.md` §4.4): delay, attack, hold,
//! decay, sustain, release, plus a terminal finished stage. Both the volume
//! and modulation envelopes on a voice are instances of this same state
//! machine with different per-section coefficients.

/// One envelope section: per-sample update is `v' = coeff*v + incr`,
/// clamped to `[min, max]`; `count` is the number of samples this section
/// runs before forcing an advance regardless of the clamp.
#[derive(Debug, Clone, Copy)]
pub struct EnvSection {
    pub count: u32,
    pub coeff: f64,
    pub incr: f64,
    pub min: f64,
    pub max: f64,
}

impl EnvSection {
    const ZERO: EnvSection = EnvSection {
        count: 0,
        coeff: 0.0,
        incr: 0.0,
        min: -1.0,
        max: 1.0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(usize)]
pub enum EnvStage {
    Delay = 0,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
    Finished,
}

const NUM_STAGES: usize = 7;

/// A DAHDSR envelope generator, shared shape for the volume and modulation
/// envelopes.
#[derive(Debug, Clone)]
pub struct Envelope {
    sections: [EnvSection; NUM_STAGES],
    stage: EnvStage,
    count: u32,
    val: f64,
}

impl Envelope {
    pub fn new() -> Self {
        let mut sections = [EnvSection::ZERO; NUM_STAGES];
        // Sustain holds forever at whatever value decay left it at.
        sections[EnvStage::Sustain as usize] = EnvSection {
            count: u32::MAX,
            coeff: 1.0,
            incr: 0.0,
            min: -1.0,
            max: 2.0,
        };
        sections[EnvStage::Finished as usize] = EnvSection {
            count: u32::MAX,
            coeff: 0.0,
            incr: 0.0,
            min: -1.0,
            max: 1.0,
        };
        Envelope {
            sections,
            stage: EnvStage::Delay,
            count: 0,
            val: 0.0,
        }
    }

    pub fn set_delay(&mut self, count: u32) {
        self.sections[EnvStage::Delay as usize] = EnvSection {
            count,
            coeff: 0.0,
            incr: 0.0,
            min: -1.0,
            max: 1.0,
        };
    }

    pub fn set_attack(&mut self, count: u32) {
        let incr = if count > 0 { 1.0 / count as f64 } else { 0.0 };
        self.sections[EnvStage::Attack as usize] = EnvSection {
            count,
            coeff: 1.0,
            incr,
            min: -1.0,
            max: 1.0,
        };
    }

    pub fn set_hold(&mut self, count: u32) {
        self.sections[EnvStage::Hold as usize] = EnvSection {
            count,
            coeff: 1.0,
            incr: 0.0,
            min: -1.0,
            max: 2.0,
        };
    }

    /// `min` is the decay floor: `1 - sustain/1000` for the volume
    /// envelope, clamped to `[0,1]` by the caller.
    pub fn set_decay(&mut self, count: u32, min: f64) {
        let incr = if count > 0 { -1.0 / count as f64 } else { 0.0 };
        self.sections[EnvStage::Decay as usize] = EnvSection {
            count,
            coeff: 1.0,
            incr,
            min,
            max: 2.0,
        };
    }

    /// `max` is `1.0` for the volume envelope release, `2.0` for the
    /// modulation envelope release, matching the asymmetric clamp in
    /// the reference voice update.
    pub fn set_release(&mut self, count: u32, max: f64) {
        let incr = if count > 0 { -1.0 / count as f64 } else { 0.0 };
        self.sections[EnvStage::Release as usize] = EnvSection {
            count,
            coeff: 1.0,
            incr,
            min: 0.0,
            max,
        };
    }

    #[inline]
    pub fn stage(&self) -> EnvStage {
        self.stage
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.val
    }

    pub fn is_finished(&self) -> bool {
        self.stage == EnvStage::Finished
    }

    /// Advances the envelope by one sample and returns the new value.
    pub fn tick(&mut self) -> f64 {
        let mut section = self.sections[self.stage as usize];

        while self.count >= section.count {
            if self.stage == EnvStage::Decay {
                self.val = section.min * section.coeff;
            }
            self.advance_stage();
            section = self.sections[self.stage as usize];
        }

        let x = section.coeff * self.val + section.incr;
        if x < section.min {
            self.val = section.min;
            self.advance_stage();
        } else if x > section.max {
            self.val = section.max;
            self.advance_stage();
        } else {
            self.val = x;
            self.count += 1;
        }

        self.val
    }

    fn advance_stage(&mut self) {
        self.stage = match self.stage {
            EnvStage::Delay => EnvStage::Attack,
            EnvStage::Attack => EnvStage::Hold,
            EnvStage::Hold => EnvStage::Decay,
            EnvStage::Decay => EnvStage::Sustain,
            EnvStage::Sustain => EnvStage::Release,
            EnvStage::Release => EnvStage::Finished,
            EnvStage::Finished => EnvStage::Finished,
        };
        self.count = 0;
    }

    /// Forces the envelope directly into its release section, as on
    /// note-off (`spec.md` §4.8 Note-off). `new_val`, when given,
    /// overrides the carried-over value — used by the volume envelope to
    /// remap its linear attack value into the release section's
    /// logarithmic scale (`spec.md` §4.4).
    pub fn force_release(&mut self, new_val: Option<f64>) {
        if let Some(v) = new_val {
            self.val = v;
        }
        self.stage = EnvStage::Release;
        self.count = 0;
    }

    /// Forces this envelope's release section to complete within a few
    /// buffers, used when an exclusive-class voice must be silenced
    /// quickly (`spec.md` §4.8 Exclusive class: "release times to -200
    /// timecents").
    pub fn force_quick_release(&mut self, count: u32, max: f64) {
        self.set_release(count, max);
        self.stage = EnvStage::Release;
        self.count = 0;
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Envelope::new()
    }
}

/// Remaps a volume envelope's linear attack-section value into an
/// equivalent release-section value, so note-off during attack doesn't
/// click (`spec.md` §4.4 Note-off transition; `original_source/src/voice.c`
/// `voiceNoteoff`). `modlfo_to_vol_db` is `modlfoVal * -modlfoToVol` at the
/// moment of note-off.
pub fn remap_attack_to_release(linear_val: f64, modlfo_to_vol_db: f64) -> f64 {
    if linear_val <= 0.0 {
        return 0.0;
    }
    let amp = linear_val * 10f64.powf(modlfo_to_vol_db / -200.0);
    let env_value = -((-200.0 * amp.log10() - modlfo_to_vol_db) / 960.0 - 1.0);
    env_value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_holds_zero_then_enters_attack() {
        let mut env = Envelope::new();
        env.set_delay(3);
        env.set_attack(10);
        for _ in 0..3 {
            assert_eq!(env.tick(), 0.0);
            assert_eq!(env.stage(), EnvStage::Delay);
        }
        env.tick();
        assert_eq!(env.stage(), EnvStage::Attack);
    }

    #[test]
    fn attack_ramps_linearly_to_one() {
        let mut env = Envelope::new();
        env.set_attack(4);
        let mut last = 0.0;
        for _ in 0..4 {
            last = env.tick();
        }
        assert!((last - 1.0).abs() < 1e-9);
        // the clamp-to-max happened on the 4th tick; the stage transition
        // itself is picked up at the start of the following tick.
        env.tick();
        assert_eq!(env.stage(), EnvStage::Hold);
    }

    #[test]
    fn decay_ends_exactly_at_sustain_floor() {
        let mut env = Envelope::new();
        env.set_attack(1);
        env.set_hold(0);
        env.set_decay(10, 0.25);
        let mut v = 0.0;
        for _ in 0..20 {
            v = env.tick();
        }
        assert!((v - 0.25).abs() < 1e-9);
        assert_eq!(env.stage(), EnvStage::Sustain);
    }

    #[test]
    fn sustain_holds_value_until_released() {
        let mut env = Envelope::new();
        env.set_attack(1);
        env.set_hold(0);
        env.set_decay(1, 0.5);
        for _ in 0..4 {
            env.tick();
        }
        assert_eq!(env.stage(), EnvStage::Sustain);
        let v0 = env.tick();
        let v1 = env.tick();
        assert_eq!(v0, v1);
    }

    #[test]
    fn release_reaches_zero_and_finishes() {
        let mut env = Envelope::new();
        env.force_release(Some(1.0));
        env.set_release(5, 1.0);
        let mut last = 1.0;
        for _ in 0..10 {
            last = env.tick();
            if env.is_finished() {
                break;
            }
        }
        assert!(env.is_finished());
        assert_eq!(last, 0.0);
    }

    #[test]
    fn remap_full_amplitude_attack_to_release_is_near_one() {
        let v = remap_attack_to_release(1.0, 0.0);
        assert!((v - 1.0).abs() < 1e-6);
    }

    #[test]
    fn remap_silent_attack_to_release_is_zero() {
        assert_eq!(remap_attack_to_release(0.0, 0.0), 0.0);
    }
}
