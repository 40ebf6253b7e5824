//! Effects Module
//!
//! The two send effects every voice can route into (`spec.md` §4.9,
//! §4.10): a Freeverb-style reverb and a windowed-sinc chorus. Both are
//! owned by `Synth` and mixed in once per render buffer, after every
//! voice has rendered into its reverb/chorus send buffers.

pub mod chorus;
pub mod reverb;

pub use chorus::Chorus;
pub use reverb::Reverb;
