//! sfsynth - Real-time MIDI Software Synthesizer Core
//!
//! This crate renders PCM audio from SoundFont (SF2/SF3) instrument banks
//! in response to a MIDI-like event stream.
//!
//! # Architecture
//!
//! - **Bank**: the loaded SoundFont — presets, instruments, samples, and
//!   their generator/modulator zones.
//! - **Channel**: per-MIDI-channel controller and program-select state.
//! - **Voice/VoicePool**: one playing note's DSP chain, and the
//!   fixed-capacity pool of them with priority-based stealing.
//! - **Envelope/LFO/Filter**: the per-voice modulation and shaping blocks.
//! - **Effects**: the shared reverb and chorus send buses.
//! - **Synth**: ties the above together behind the external API.
//!
//! # Example
//!
//! ```no_run
//! use sfsynth::{Settings, Synth};
//!
//! let mut synth = Synth::new(Settings::default()).unwrap();
//! synth.load_bank(&std::fs::read("soundfont.sf2").unwrap()).unwrap();
//! synth.note_on(0, 60, 100).unwrap();
//!
//! let mut left = vec![0.0; 512];
//! let mut right = vec![0.0; 512];
//! synth.render_frame(&mut left, &mut right).unwrap();
//! ```

pub mod bank;
pub mod channel;
pub mod constants;
pub mod effects;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod gen;
pub mod interp;
pub mod lfo;
pub mod modulator;
pub mod phase;
pub mod sample;
pub mod synth;
pub mod tables;
pub mod tuning;
pub mod voice;

pub use bank::Bank;
pub use channel::Channel;
pub use effects::{Chorus, Reverb};
pub use envelope::Envelope;
pub use error::{Result, SynthError};
pub use filter::Filter;
pub use lfo::Lfo;
pub use synth::{Settings, Synth, SynthFlags};
pub use tuning::{Tuning, TuningBank};
pub use voice::{Voice, VoicePool};
