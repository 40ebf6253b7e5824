//! SF3 Sample Decoding
//!
//! SF3 banks store sample data as OggVorbis rather than raw PCM
//! (`spec.md` §6 Bank file format). `fluid_defsfont.c` links `stb_vorbis`
//! directly for this; this crate reaches for `lewton`, the Vorbis decoder
//! already in the dependency stack.

use std::io::Cursor;

use lewton::inside_ogg::OggStreamReader;

use super::{bad_format, unsupported};
use crate::error::Result;

/// Fully decodes an in-memory OggVorbis stream to interleaved 16-bit PCM.
/// Floor-0-coded streams (unsupported by `lewton`) and any other codec
/// feature outside the Vorbis-I baseline surface as
/// `UnsupportedBankFeature`; a malformed container surfaces as
/// `BadBankFormat`.
pub fn decode_vorbis(data: &[u8]) -> Result<Vec<i16>> {
    let mut reader = OggStreamReader::new(Cursor::new(data))
        .map_err(|e| bad_format(format!("invalid OggVorbis sample container: {e}")))?;

    let mut out = Vec::new();
    loop {
        match reader.read_dec_packet_itl() {
            Ok(Some(packet)) => out.extend_from_slice(&packet),
            Ok(None) => break,
            Err(e) => {
                return Err(unsupported(format!(
                    "OggVorbis sample uses an unsupported codec feature: {e}"
                )))
            }
        }
    }
    Ok(out)
}
