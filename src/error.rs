//! Error Handling
//!
//! Error kinds per `spec.md` §7. Errors returned at the API boundary are
//! `SynthError`; failures inside the render path never propagate — they
//! degrade the affected voice and are logged once (see `voice.rs`,
//! `synth.rs`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("bad bank format: {0}")]
    BadBankFormat(String),

    #[error("unsupported bank feature: {0}")]
    UnsupportedBankFeature(String),

    #[error("voice pool exhausted, note dropped")]
    VoiceExhausted,

    #[error("channel {0} has no preset loaded")]
    BankNotLoaded(usize),

    #[error("tuning error: {0}")]
    TuningError(String),
}

pub type Result<T> = std::result::Result<T, SynthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_descriptive() {
        let e = SynthError::BadArgument("channel 99 out of range".into());
        assert!(e.to_string().contains("channel 99"));
    }
}
