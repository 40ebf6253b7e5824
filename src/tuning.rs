//! Tuning Module
//!
//! Per-key pitch tables bound to a Channel, and MIDI Tuning SysEx message
//! handling (`spec.md` §4 Tuning, §6 `synthSysex`, glossary "Absolute
//! cent"). By default key `k` sounds at `k * 100` absolute cents; a bound
//! `Tuning` overrides individual keys.

use crate::error::SynthError;
use std::collections::HashMap;

/// A micro-tuning table: one pitch (in absolute cents) per MIDI key.
#[derive(Debug, Clone)]
pub struct Tuning {
    pub name: String,
    pub bank: u32,
    pub program: u32,
    pub pitch: [f64; 128],
}

impl Tuning {
    pub fn new(name: impl Into<String>, bank: u32, program: u32) -> Self {
        let mut pitch = [0.0; 128];
        for (i, p) in pitch.iter_mut().enumerate() {
            *p = i as f64 * 100.0;
        }
        Tuning {
            name: name.into(),
            bank,
            program,
            pitch,
        }
    }

    pub fn set_key(&mut self, key: u8, cents: f64) {
        if (key as usize) < 128 {
            self.pitch[key as usize] = cents;
        }
    }

    pub fn set_octave(&mut self, pitch_deriv: &[f64; 12]) {
        for (i, p) in self.pitch.iter_mut().enumerate() {
            *p = i as f64 * 100.0 + pitch_deriv[i % 12];
        }
    }

    pub fn set_all(&mut self, pitch: [f64; 128]) {
        self.pitch = pitch;
    }

    #[inline]
    pub fn key_cents(&self, key: u8) -> f64 {
        self.pitch[key as usize & 0x7f]
    }
}

/// A bank of named tunings addressable by (bank, program), mirroring
/// `original_source/src/tuning.c`'s bank/program keying.
#[derive(Debug, Clone, Default)]
pub struct TuningBank {
    tunings: HashMap<(u32, u32), Tuning>,
}

impl TuningBank {
    pub fn new() -> Self {
        TuningBank::default()
    }

    pub fn get(&self, bank: u32, program: u32) -> Option<&Tuning> {
        self.tunings.get(&(bank, program))
    }

    pub fn get_or_create(&mut self, bank: u32, program: u32) -> &mut Tuning {
        self.tunings
            .entry((bank, program))
            .or_insert_with(|| Tuning::new(format!("bank{bank}-prog{program}"), bank, program))
    }
}

/// The MIDI Tuning SysEx subset `spec.md` §6 requires.
#[derive(Debug, Clone)]
pub enum TuningSysex {
    /// Bulk dump request / reply for a (bank, program) tuning.
    BulkDump {
        bank: u32,
        program: u32,
        name: String,
        pitches: Vec<f64>,
    },
    /// Single-note tuning change within a (bank, program) tuning.
    SingleNote {
        bank: u32,
        program: u32,
        changes: Vec<(u8, f64)>,
    },
    /// Realtime 1-byte-resolution octave tuning (coarse, semitone steps).
    OctaveTune1Byte { channel_mask: u16, steps: [i8; 12] },
    /// Realtime 2-byte-resolution octave tuning (fine, cent steps).
    OctaveTune2Byte { channel_mask: u16, cents: [f64; 12] },
}

fn cents_from_14bit(coarse_key: u8, msb: u8, lsb: u8) -> f64 {
    let frac14 = (((msb & 0x7f) as u32) << 7) | (lsb & 0x7f) as u32;
    coarse_key as f64 * 100.0 + (frac14 as f64 / 16384.0) * 100.0
}

/// Decodes a MIDI Tuning Standard universal SysEx message into the subset
/// `TuningSysex` models (`spec.md` §6 `synthSysex`). `bytes` is the raw
/// message including the `F0`/`F7` framing. Returns `None` for anything
/// that isn't one of the four recognized sub-IDs rather than erroring,
/// since unsupported universal SysEx is conventionally ignored, not
/// rejected.
pub fn parse_sysex(bytes: &[u8]) -> Option<TuningSysex> {
    if bytes.len() < 6 || bytes[0] != 0xF0 || *bytes.last()? != 0xF7 {
        return None;
    }
    let universal_id = bytes[1];
    let sub_id1 = bytes[3];
    let sub_id2 = bytes[4];
    if sub_id1 != 0x08 {
        return None;
    }
    let payload = &bytes[5..bytes.len() - 1];

    match (universal_id, sub_id2) {
        (0x7E, 0x01) => parse_bulk_dump(payload),
        (0x7F, 0x02) => parse_single_note(payload),
        (0x7F, 0x08) => parse_octave_1byte(payload),
        (0x7F, 0x09) => parse_octave_2byte(payload),
        _ => None,
    }
}

/// Bulk dump reply: `tt` program byte, 16-byte ASCII name, then 128 3-byte
/// `(key, msb, lsb)` pitch entries. No bank number exists on the wire, so
/// every sysex-sourced tuning lands in bank 0 (`spec.md` §9 open question).
fn parse_bulk_dump(payload: &[u8]) -> Option<TuningSysex> {
    if payload.len() < 1 + 16 + 128 * 3 {
        return None;
    }
    let program = payload[0] as u32;
    let name = String::from_utf8_lossy(&payload[1..17])
        .trim_end()
        .to_string();
    let mut pitches = Vec::with_capacity(128);
    let mut off = 17;
    for _ in 0..128 {
        pitches.push(cents_from_14bit(payload[off], payload[off + 1], payload[off + 2]));
        off += 3;
    }
    Some(TuningSysex::BulkDump {
        bank: 0,
        program,
        name,
        pitches,
    })
}

/// Single-note tune change: `tt` program byte, change count, then that many
/// 4-byte `(key, coarse, msb, lsb)` entries.
fn parse_single_note(payload: &[u8]) -> Option<TuningSysex> {
    if payload.len() < 2 {
        return None;
    }
    let program = payload[0] as u32;
    let count = payload[1] as usize;
    let mut changes = Vec::with_capacity(count);
    let mut off = 2;
    for _ in 0..count {
        if off + 4 > payload.len() {
            break;
        }
        let key = payload[off];
        changes.push((key, cents_from_14bit(payload[off + 1], payload[off + 2], payload[off + 3])));
        off += 4;
    }
    Some(TuningSysex::SingleNote {
        bank: 0,
        program,
        changes,
    })
}

/// Realtime 1-byte octave tune: 2-byte channel bitmap, then 12 semitone
/// steps offset by 64 (so `0x40` is "no change").
fn parse_octave_1byte(payload: &[u8]) -> Option<TuningSysex> {
    if payload.len() < 2 + 12 {
        return None;
    }
    let channel_mask = ((payload[0] as u16) << 7) | payload[1] as u16;
    let mut steps = [0i8; 12];
    for (i, s) in steps.iter_mut().enumerate() {
        *s = payload[2 + i] as i8 - 64;
    }
    Some(TuningSysex::OctaveTune1Byte { channel_mask, steps })
}

/// Realtime 2-byte octave tune: 2-byte channel bitmap, then 12 signed
/// 14-bit cent offsets centered on `0x2000` (+-100 cents full scale).
fn parse_octave_2byte(payload: &[u8]) -> Option<TuningSysex> {
    if payload.len() < 2 + 24 {
        return None;
    }
    let channel_mask = ((payload[0] as u16) << 7) | payload[1] as u16;
    let mut cents = [0.0f64; 12];
    for (i, c) in cents.iter_mut().enumerate() {
        let msb = payload[2 + i * 2] as i32;
        let lsb = payload[2 + i * 2 + 1] as i32;
        let raw = ((msb << 7) | lsb) - 8192;
        *c = raw as f64 * (100.0 / 8192.0);
    }
    Some(TuningSysex::OctaveTune2Byte { channel_mask, cents })
}

/// Parses and applies a MIDI Tuning SysEx message. `spec.md` §7:
/// out-of-range bank/program is logged and the message is ignored rather
/// than erroring hard — this returns `Ok(())` even when the update is a
/// no-op, reserving `Err` for malformed messages the caller cannot parse
/// at all.
pub fn apply_sysex(
    bank_table: &mut TuningBank,
    msg: &TuningSysex,
) -> Result<(), SynthError> {
    match msg {
        TuningSysex::BulkDump {
            bank,
            program,
            name,
            pitches,
        } => {
            if *bank > 127 || *program > 127 {
                log::warn!("tuning bulk dump references out-of-range bank/program, ignoring");
                return Ok(());
            }
            let t = bank_table.get_or_create(*bank, *program);
            t.name = name.clone();
            for (i, p) in pitches.iter().enumerate().take(128) {
                t.pitch[i] = *p;
            }
        }
        TuningSysex::SingleNote {
            bank,
            program,
            changes,
        } => {
            if *bank > 127 || *program > 127 {
                log::warn!("single-note tuning references out-of-range bank/program, ignoring");
                return Ok(());
            }
            let t = bank_table.get_or_create(*bank, *program);
            for (key, cents) in changes {
                t.set_key(*key, *cents);
            }
        }
        TuningSysex::OctaveTune1Byte { steps, .. } => {
            let deriv: [f64; 12] = std::array::from_fn(|i| steps[i] as f64 * 100.0);
            // Applies to every bank/program tuning currently registered,
            // matching the "realtime, channel-wide" semantics of this
            // SysEx universal realtime message.
            for t in bank_table.tunings.values_mut() {
                t.set_octave(&deriv);
            }
        }
        TuningSysex::OctaveTune2Byte { cents, .. } => {
            for t in bank_table.tunings.values_mut() {
                t.set_octave(cents);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tuning_is_100_cents_per_key() {
        let t = Tuning::new("default", 0, 0);
        assert_eq!(t.key_cents(60), 6000.0);
    }

    #[test]
    fn out_of_range_bank_is_ignored_not_errored() {
        let mut bank = TuningBank::new();
        let msg = TuningSysex::BulkDump {
            bank: 200,
            program: 0,
            name: "x".into(),
            pitches: vec![0.0; 128],
        };
        assert!(apply_sysex(&mut bank, &msg).is_ok());
        assert!(bank.get(200, 0).is_none());
    }

    #[test]
    fn single_note_change_only_touches_named_key() {
        let mut bank = TuningBank::new();
        let msg = TuningSysex::SingleNote {
            bank: 0,
            program: 0,
            changes: vec![(69, 6900.5)],
        };
        apply_sysex(&mut bank, &msg).unwrap();
        let t = bank.get(0, 0).unwrap();
        assert_eq!(t.key_cents(69), 6900.5);
        assert_eq!(t.key_cents(68), 6800.0);
    }

    #[test]
    fn parse_rejects_non_sysex_bytes() {
        assert!(parse_sysex(&[0x90, 60, 100]).is_none());
    }

    #[test]
    fn parse_rejects_unrecognized_sub_id2() {
        let mut msg = vec![0xF0, 0x7F, 0x7F, 0x08, 0xFF];
        msg.push(0xF7);
        assert!(parse_sysex(&msg).is_none());
    }

    #[test]
    fn parse_single_note_round_trips_key_and_cents() {
        let mut msg = vec![0xF0, 0x7F, 0x7F, 0x08, 0x02];
        msg.push(0); // program
        msg.push(1); // one change
        msg.push(69); // key
        msg.push(69); // coarse key = 69 -> 6900 cents
        msg.push(0); // msb
        msg.push(0); // lsb
        msg.push(0); // checksum (ignored)
        msg.push(0xF7);
        let parsed = parse_sysex(&msg).unwrap();
        match parsed {
            TuningSysex::SingleNote { bank, program, changes } => {
                assert_eq!(bank, 0);
                assert_eq!(program, 0);
                assert_eq!(changes, vec![(69, 6900.0)]);
            }
            _ => panic!("expected SingleNote"),
        }
    }

    #[test]
    fn parse_octave_1byte_centers_on_64() {
        let mut msg = vec![0xF0, 0x7F, 0x7F, 0x08, 0x08, 0, 0];
        msg.extend(std::iter::repeat(64u8).take(12));
        msg.push(0xF7);
        let parsed = parse_sysex(&msg).unwrap();
        match parsed {
            TuningSysex::OctaveTune1Byte { steps, .. } => {
                assert_eq!(steps, [0i8; 12]);
            }
            _ => panic!("expected OctaveTune1Byte"),
        }
    }
}
