//! RIFF / SF2 Parser
//!
//! Reads the RIFF container (`spec.md` §6 Bank file format): a top-level
//! "sfbk" form wrapping `LIST` chunks "INFO", "sdta" (raw PCM), and "pdta"
//! (the HYDRA preset tables). Grounded on the chunk layout and record
//! sizes `fluid_defsfont.c` uses (`RIFF_`/`LIST_` four-character codes,
//! the `phdr`/`pbag`/`pmod`/`pgen`/`inst`/`ibag`/`imod`/`igen`/`shdr`
//! sub-chunk ids and their fixed record sizes).

use std::io::{Cursor, Read};
use std::ops::Range;

use byteorder::{LittleEndian, ReadBytesExt};

use super::{bad_format, sf3, Bank, GenEntry, Instrument, Preset, Zone};
use crate::error::Result;
use crate::gen::GenType;
use crate::modulator::{Curve, ModSource, Modulator, Transform};
use crate::sample::{Sample, SampleTypeFlags};

const PHDR_SIZE: usize = 38;
const PBAG_SIZE: usize = 4;
const PMOD_SIZE: usize = 10;
const PGEN_SIZE: usize = 4;
const INST_SIZE: usize = 22;
const IBAG_SIZE: usize = 4;
const IMOD_SIZE: usize = 10;
const IGEN_SIZE: usize = 4;
const SHDR_SIZE: usize = 46;

struct RawPreset {
    name: String,
    program: u32,
    bank: u32,
    bag_ndx: u16,
}

struct RawBag {
    gen_ndx: u16,
    mod_ndx: u16,
}

struct RawMod {
    src_oper: u16,
    dest_oper: u16,
    amount: i16,
    amt_src_oper: u16,
    transform: u16,
}

struct RawGen {
    oper: u16,
    amount: i16,
}

struct RawInst {
    name: String,
    bag_ndx: u16,
}

struct RawSample {
    name: String,
    start: u32,
    end: u32,
    loop_start: u32,
    loop_end: u32,
    sample_rate: u32,
    orig_pitch: u8,
    pitch_correction: i8,
    sample_type: u16,
}

struct Hydra {
    phdr: Vec<RawPreset>,
    pbag: Vec<RawBag>,
    pmod: Vec<RawMod>,
    pgen: Vec<RawGen>,
    inst: Vec<RawInst>,
    ibag: Vec<RawBag>,
    imod: Vec<RawMod>,
    igen: Vec<RawGen>,
    shdr: Vec<RawSample>,
}

fn read_tag(cur: &mut Cursor<&[u8]>) -> Result<[u8; 4]> {
    let mut tag = [0u8; 4];
    cur.read_exact(&mut tag)
        .map_err(|_| bad_format("unexpected end of file reading chunk id"))?;
    Ok(tag)
}

fn read_cstr20(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

pub fn parse(data: &[u8]) -> Result<Bank> {
    let mut cur = Cursor::new(data);

    let riff_tag = read_tag(&mut cur)?;
    if &riff_tag != b"RIFF" {
        return Err(bad_format("missing RIFF chunk id"));
    }
    let _riff_size = cur
        .read_u32::<LittleEndian>()
        .map_err(|_| bad_format("truncated RIFF size"))?;
    let form = read_tag(&mut cur)?;
    if &form != b"sfbk" {
        return Err(bad_format("not a SoundFont (form type != sfbk)"));
    }

    let mut smpl: Vec<u8> = Vec::new();
    let mut hydra: Option<Hydra> = None;

    loop {
        let mut id = [0u8; 4];
        match cur.read_exact(&mut id) {
            Ok(()) => {}
            Err(_) => break,
        }
        let size = cur
            .read_u32::<LittleEndian>()
            .map_err(|_| bad_format("truncated chunk size"))? as usize;
        let pos = cur.position() as usize;
        let end = pos
            .checked_add(size)
            .filter(|&e| e <= data.len())
            .ok_or_else(|| bad_format("chunk size exceeds file length"))?;
        let payload = &data[pos..end];

        if &id == b"LIST" {
            let list_type = &payload[..4.min(payload.len())];
            let body = &payload[4.min(payload.len())..];
            match list_type {
                b"sdta" => smpl = parse_sdta(body)?,
                b"pdta" => hydra = Some(parse_pdta(body)?),
                b"INFO" => { /* informational metadata, not needed to render */ }
                _ => {}
            }
        }

        cur.set_position(end as u64);
        if end >= data.len() {
            break;
        }
    }

    let hydra = hydra.ok_or_else(|| bad_format("missing pdta chunk"))?;
    build_bank(hydra, smpl)
}

fn parse_sdta(body: &[u8]) -> Result<Vec<u8>> {
    let mut cur = Cursor::new(body);
    let mut smpl = Vec::new();
    loop {
        let mut id = [0u8; 4];
        if cur.read_exact(&mut id).is_err() {
            break;
        }
        let size = cur
            .read_u32::<LittleEndian>()
            .map_err(|_| bad_format("truncated sdta sub-chunk size"))? as usize;
        let pos = cur.position() as usize;
        let end = (pos + size).min(body.len());
        if &id == b"smpl" {
            smpl = body[pos..end].to_vec();
        }
        // sm24 (24-bit low-byte extension) carries no additional precision
        // this implementation uses; skip it.
        let padded_end = end + (size & 1);
        cur.set_position(padded_end.min(body.len()) as u64);
    }
    Ok(smpl)
}

fn parse_pdta(body: &[u8]) -> Result<Hydra> {
    let mut cur = Cursor::new(body);
    let mut phdr = Vec::new();
    let mut pbag = Vec::new();
    let mut pmod = Vec::new();
    let mut pgen = Vec::new();
    let mut inst = Vec::new();
    let mut ibag = Vec::new();
    let mut imod = Vec::new();
    let mut igen = Vec::new();
    let mut shdr = Vec::new();

    loop {
        let mut id = [0u8; 4];
        if cur.read_exact(&mut id).is_err() {
            break;
        }
        let size = cur
            .read_u32::<LittleEndian>()
            .map_err(|_| bad_format("truncated pdta sub-chunk size"))? as usize;
        let pos = cur.position() as usize;
        let end = (pos + size).min(body.len());
        let chunk = &body[pos..end];

        match &id {
            b"phdr" => phdr = parse_phdr(chunk)?,
            b"pbag" => pbag = parse_bag(chunk, PBAG_SIZE)?,
            b"pmod" => pmod = parse_mod(chunk, PMOD_SIZE)?,
            b"pgen" => pgen = parse_gen(chunk, PGEN_SIZE)?,
            b"inst" => inst = parse_inst(chunk)?,
            b"ibag" => ibag = parse_bag(chunk, IBAG_SIZE)?,
            b"imod" => imod = parse_mod(chunk, IMOD_SIZE)?,
            b"igen" => igen = parse_gen(chunk, IGEN_SIZE)?,
            b"shdr" => shdr = parse_shdr(chunk)?,
            _ => {}
        }

        let padded_end = end + (size & 1);
        cur.set_position(padded_end.min(body.len()) as u64);
        if padded_end >= body.len() {
            break;
        }
    }

    Ok(Hydra {
        phdr,
        pbag,
        pmod,
        pgen,
        inst,
        ibag,
        imod,
        igen,
        shdr,
    })
}

fn parse_phdr(chunk: &[u8]) -> Result<Vec<RawPreset>> {
    if chunk.len() % PHDR_SIZE != 0 || chunk.len() < PHDR_SIZE {
        return Err(bad_format("phdr chunk size not a multiple of 38"));
    }
    let mut out = Vec::with_capacity(chunk.len() / PHDR_SIZE);
    for rec in chunk.chunks_exact(PHDR_SIZE) {
        let mut c = Cursor::new(rec);
        let mut name = [0u8; 20];
        c.read_exact(&mut name).unwrap();
        let program = c.read_u16::<LittleEndian>().unwrap() as u32;
        let bank = c.read_u16::<LittleEndian>().unwrap() as u32;
        let bag_ndx = c.read_u16::<LittleEndian>().unwrap();
        out.push(RawPreset {
            name: read_cstr20(&name),
            program,
            bank,
            bag_ndx,
        });
    }
    Ok(out)
}

fn parse_bag(chunk: &[u8], rec_size: usize) -> Result<Vec<RawBag>> {
    if chunk.len() % rec_size != 0 {
        return Err(bad_format("bag chunk size mismatch"));
    }
    let mut out = Vec::with_capacity(chunk.len() / rec_size);
    for rec in chunk.chunks_exact(rec_size) {
        let mut c = Cursor::new(rec);
        let gen_ndx = c.read_u16::<LittleEndian>().unwrap();
        let mod_ndx = c.read_u16::<LittleEndian>().unwrap();
        out.push(RawBag { gen_ndx, mod_ndx });
    }
    Ok(out)
}

fn parse_mod(chunk: &[u8], rec_size: usize) -> Result<Vec<RawMod>> {
    if chunk.len() % rec_size != 0 {
        return Err(bad_format("modulator chunk size mismatch"));
    }
    let mut out = Vec::with_capacity(chunk.len() / rec_size);
    for rec in chunk.chunks_exact(rec_size) {
        let mut c = Cursor::new(rec);
        let src_oper = c.read_u16::<LittleEndian>().unwrap();
        let dest_oper = c.read_u16::<LittleEndian>().unwrap();
        let amount = c.read_i16::<LittleEndian>().unwrap();
        let amt_src_oper = c.read_u16::<LittleEndian>().unwrap();
        let transform = c.read_u16::<LittleEndian>().unwrap();
        out.push(RawMod {
            src_oper,
            dest_oper,
            amount,
            amt_src_oper,
            transform,
        });
    }
    Ok(out)
}

fn parse_gen(chunk: &[u8], rec_size: usize) -> Result<Vec<RawGen>> {
    if chunk.len() % rec_size != 0 {
        return Err(bad_format("generator chunk size mismatch"));
    }
    let mut out = Vec::with_capacity(chunk.len() / rec_size);
    for rec in chunk.chunks_exact(rec_size) {
        let mut c = Cursor::new(rec);
        let oper = c.read_u16::<LittleEndian>().unwrap();
        let amount = c.read_i16::<LittleEndian>().unwrap();
        out.push(RawGen { oper, amount });
    }
    Ok(out)
}

fn parse_inst(chunk: &[u8]) -> Result<Vec<RawInst>> {
    if chunk.len() % INST_SIZE != 0 || chunk.len() < INST_SIZE {
        return Err(bad_format("inst chunk size not a multiple of 22"));
    }
    let mut out = Vec::with_capacity(chunk.len() / INST_SIZE);
    for rec in chunk.chunks_exact(INST_SIZE) {
        let mut c = Cursor::new(rec);
        let mut name = [0u8; 20];
        c.read_exact(&mut name).unwrap();
        let bag_ndx = c.read_u16::<LittleEndian>().unwrap();
        out.push(RawInst {
            name: read_cstr20(&name),
            bag_ndx,
        });
    }
    Ok(out)
}

fn parse_shdr(chunk: &[u8]) -> Result<Vec<RawSample>> {
    if chunk.len() % SHDR_SIZE != 0 || chunk.len() < SHDR_SIZE {
        return Err(bad_format("shdr chunk size not a multiple of 46"));
    }
    let mut out = Vec::with_capacity(chunk.len() / SHDR_SIZE);
    for rec in chunk.chunks_exact(SHDR_SIZE) {
        let mut c = Cursor::new(rec);
        let mut name = [0u8; 20];
        c.read_exact(&mut name).unwrap();
        let start = c.read_u32::<LittleEndian>().unwrap();
        let end = c.read_u32::<LittleEndian>().unwrap();
        let loop_start = c.read_u32::<LittleEndian>().unwrap();
        let loop_end = c.read_u32::<LittleEndian>().unwrap();
        let sample_rate = c.read_u32::<LittleEndian>().unwrap();
        let orig_pitch = c.read_u8().unwrap();
        let pitch_correction = c.read_i8().unwrap();
        let _sample_link = c.read_u16::<LittleEndian>().unwrap();
        let sample_type = c.read_u16::<LittleEndian>().unwrap();
        out.push(RawSample {
            name: read_cstr20(&name),
            start,
            end,
            loop_start,
            loop_end,
            sample_rate,
            orig_pitch,
            pitch_correction,
            sample_type,
        });
    }
    Ok(out)
}

/// Decodes a 10-byte modulator source/amount-source operator into its
/// `ModSource` and `Transform` halves (`spec.md` §6 SoundFont modulator
/// binary layout).
fn decode_source(oper: u16) -> (ModSource, Transform) {
    let index = (oper & 0x7f) as u8;
    let is_cc = oper & 0x80 != 0;
    let negative = oper & 0x100 != 0;
    let bipolar = oper & 0x200 != 0;
    let curve_bits = (oper >> 10) & 0x3f;
    let curve = match curve_bits {
        0 => Curve::Linear,
        1 => Curve::Concave,
        2 => Curve::Convex,
        3 => Curve::Switch,
        _ => Curve::Linear,
    };

    let src = if is_cc {
        ModSource::Cc(index)
    } else {
        match index {
            0 => ModSource::None,
            2 => ModSource::NoteOnVelocity,
            3 => ModSource::NoteOnKey,
            10 => ModSource::PolyPressure,
            13 => ModSource::ChannelPressure,
            14 => ModSource::PitchWheel,
            16 => ModSource::PitchWheelSensitivity,
            _ => ModSource::None,
        }
    };

    (
        src,
        Transform {
            bipolar,
            negative,
            curve,
        },
    )
}

fn decode_modulator(raw: &RawMod) -> Option<Modulator> {
    if raw.transform != 0 {
        return None;
    }
    let dest = GenType::from_index(raw.dest_oper as usize)?;
    let (src1, xform1) = decode_source(raw.src_oper);
    let (src2, xform2) = decode_source(raw.amt_src_oper);
    Some(Modulator {
        src1,
        xform1,
        src2,
        xform2,
        dest,
        amount: raw.amount as f64,
    })
}

struct ZoneBuildResult {
    zones: Vec<Zone>,
    gens: Vec<GenEntry>,
    mods: Vec<Modulator>,
}

/// Builds every zone of every owner (preset or instrument) from a bag
/// list plus the gen/mod pools the bags index into. `link_gen` is
/// `GenType::Instrument` for preset zones, `GenType::SampleId` for
/// instrument zones: the generator whose presence marks a zone as
/// non-global and whose amount is the link index.
fn build_zones(
    bags: &[RawBag],
    gens: &[RawGen],
    mods: &[RawMod],
    link_gen: GenType,
) -> Result<ZoneBuildResult> {
    if bags.len() < 2 {
        return Err(bad_format("bag chunk needs at least one real + one terminal record"));
    }

    let mut zones = Vec::new();
    let mut out_gens = Vec::new();
    let mut out_mods = Vec::new();

    for pair in bags.windows(2) {
        let (lo, hi) = (&pair[0], &pair[1]);
        let gen_range = lo.gen_ndx as usize..hi.gen_ndx as usize;
        let mod_range = lo.mod_ndx as usize..hi.mod_ndx as usize;

        let gen_slice = gens
            .get(gen_range.clone())
            .ok_or_else(|| bad_format("generator index range out of bounds"))?;
        let mod_slice = mods
            .get(mod_range.clone())
            .ok_or_else(|| bad_format("modulator index range out of bounds"))?;

        let mut keylo = 0u8;
        let mut keyhi = 127u8;
        let mut vello = 0u8;
        let mut velhi = 127u8;
        let mut link = None;
        let gens_start = out_gens.len();

        for g in gen_slice {
            let Some(gt) = GenType::from_index(g.oper as usize) else {
                continue;
            };
            if gt == GenType::KeyRange {
                let bytes = (g.amount as u16).to_le_bytes();
                keylo = bytes[0];
                keyhi = bytes[1];
                continue;
            }
            if gt == GenType::VelRange {
                let bytes = (g.amount as u16).to_le_bytes();
                vello = bytes[0];
                velhi = bytes[1];
                continue;
            }
            if gt == link_gen {
                link = Some(g.amount as u16 as usize);
                continue;
            }
            out_gens.push(GenEntry {
                gen: gt,
                amount: g.amount,
            });
        }
        let gens_range = gens_start..out_gens.len();

        let mods_start = out_mods.len();
        for m in mod_slice {
            if let Some(decoded) = decode_modulator(m) {
                out_mods.push(decoded);
            }
        }
        let mods_range = mods_start..out_mods.len();

        zones.push(Zone {
            keylo,
            keyhi,
            vello,
            velhi,
            gens: gens_range,
            mods: mods_range,
            link,
        });
    }

    Ok(ZoneBuildResult {
        zones,
        gens: out_gens,
        mods: out_mods,
    })
}

fn build_bank(hydra: Hydra, smpl_bytes: Vec<u8>) -> Result<Bank> {
    let inst_built = build_zones(&hydra.ibag, &hydra.igen, &hydra.imod, GenType::SampleId)?;
    let preset_built = build_zones(&hydra.pbag, &hydra.pgen, &hydra.pmod, GenType::Instrument)?;

    // Samples: decode SF3/OggVorbis payloads, validate ROM/minimum-length.
    let mut samples = Vec::with_capacity(hydra.shdr.len().saturating_sub(1));
    if hydra.shdr.len() < 1 {
        return Err(bad_format("shdr chunk has no terminal record"));
    }
    for raw in &hydra.shdr[..hydra.shdr.len() - 1] {
        let flags = SampleTypeFlags::from_bits_truncate(raw.sample_type);
        if flags.is_rom() {
            log::warn!("ignoring ROM sample {}: no ROM fallback available", raw.name);
            samples.push(build_disabled_sample(raw));
            continue;
        }
        if raw.end < raw.start || raw.end - raw.start < 8 {
            log::warn!("ignoring sample {}: too few sample data points", raw.name);
            samples.push(build_disabled_sample(raw));
            continue;
        }

        let pcm = if flags.is_ogg_vorbis() {
            let start = raw.start as usize;
            let end = (raw.end as usize + 1).min(smpl_bytes.len());
            let ogg = smpl_bytes
                .get(start..end)
                .ok_or_else(|| bad_format("OggVorbis sample range out of bounds"))?;
            sf3::decode_vorbis(ogg)?
        } else {
            read_pcm_i16_le(&smpl_bytes, raw.start, raw.end)?
        };

        let (loop_start, loop_end, start, end) = if flags.is_ogg_vorbis() {
            // After decode, sample indices are relative to the decoded
            // PCM, not the compressed byte range: re-origin at zero.
            let len = pcm.len() as u32;
            let ls = raw.loop_start.saturating_sub(raw.start).min(len);
            let le = raw.loop_end.saturating_sub(raw.start).min(len);
            (ls, le, 0, len.saturating_sub(1))
        } else {
            (
                raw.loop_start.saturating_sub(raw.start),
                raw.loop_end.saturating_sub(raw.start),
                0,
                raw.end - raw.start,
            )
        };

        let loop_amplitude_bound = Sample::compute_loop_amplitude_bound(&pcm, loop_start, loop_end);
        samples.push(std::sync::Arc::new(Sample {
            name: raw.name.clone(),
            data: pcm,
            start,
            end,
            loop_start,
            loop_end,
            original_key: raw.orig_pitch,
            pitch_correction: raw.pitch_correction,
            sample_rate: raw.sample_rate,
            sample_type: flags,
            loop_amplitude_bound,
        }));
    }

    // Instruments: slice inst_built.zones per inst bag range, recording
    // the global zone (if any) separately from the iterable zone range.
    let mut instruments = Vec::with_capacity(hydra.inst.len().saturating_sub(1));
    if hydra.inst.len() < 1 {
        return Err(bad_format("inst chunk has no terminal record"));
    }
    for pair in hydra.inst.windows(2) {
        let (lo, hi) = (&pair[0], &pair[1]);
        let zrange = lo.bag_ndx as usize..hi.bag_ndx as usize;
        let (global, zones) = split_global_zone(zrange, &inst_built.zones);
        instruments.push(Instrument {
            name: lo.name.clone(),
            global,
            zones,
        });
    }

    let mut presets = Vec::with_capacity(hydra.phdr.len().saturating_sub(1));
    if hydra.phdr.len() < 1 {
        return Err(bad_format("phdr chunk has no terminal record"));
    }
    for pair in hydra.phdr.windows(2) {
        let (lo, hi) = (&pair[0], &pair[1]);
        let zrange = lo.bag_ndx as usize..hi.bag_ndx as usize;
        let (global, zones) = split_global_zone(zrange, &preset_built.zones);
        presets.push(Preset {
            name: lo.name.clone(),
            bank: lo.bank,
            program: lo.program,
            global,
            zones,
        });
    }
    presets.sort_by_key(|p| (p.bank, p.program));

    Ok(Bank {
        presets,
        instruments,
        samples,
        preset_zones: preset_built.zones,
        preset_gens: preset_built.gens,
        preset_mods: preset_built.mods,
        inst_zones: inst_built.zones,
        inst_gens: inst_built.gens,
        inst_mods: inst_built.mods,
    })
}

/// Splits a zone-index range into `(global_zone, remaining_zones)`. Per
/// `spec.md` §3, the global zone — if present — is always the first zone
/// of its owner and is the only zone allowed to lack a link generator.
fn split_global_zone(zrange: Range<usize>, zones: &[Zone]) -> (Option<usize>, Range<usize>) {
    let is_global_first = zrange
        .clone()
        .next()
        .and_then(|i| zones.get(i))
        .map(|z| z.link.is_none())
        .unwrap_or(false);
    if is_global_first {
        (Some(zrange.start), zrange.start + 1..zrange.end)
    } else {
        (None, zrange)
    }
}

fn build_disabled_sample(raw: &RawSample) -> std::sync::Arc<Sample> {
    std::sync::Arc::new(Sample {
        name: raw.name.clone(),
        data: Vec::new(),
        start: 0,
        end: 0,
        loop_start: 0,
        loop_end: 0,
        original_key: raw.orig_pitch,
        pitch_correction: raw.pitch_correction,
        sample_rate: raw.sample_rate,
        sample_type: SampleTypeFlags::from_bits_truncate(raw.sample_type),
        loop_amplitude_bound: 0.0,
    })
}

fn read_pcm_i16_le(smpl: &[u8], start: u32, end: u32) -> Result<Vec<i16>> {
    let start_b = (start as usize) * 2;
    let end_b = (end as usize + 1) * 2;
    let slice = smpl
        .get(start_b..end_b.min(smpl.len()))
        .ok_or_else(|| bad_format("sample data range out of bounds"))?;
    let mut out = Vec::with_capacity(slice.len() / 2);
    let mut c = Cursor::new(slice);
    while let Ok(v) = c.read_i16::<LittleEndian>() {
        out.push(v);
    }
    Ok(out)
}
