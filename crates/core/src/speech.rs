//! Speech synthesis trait.
//!
//! Speaking is fire-and-forget from the core's perspective: errors are
//! logged by the caller and never abort orchestration.

use async_trait::async_trait;

use crate::error::SpeechError;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    /// Speak the given text.
    async fn speak(&self, text: &str) -> std::result::Result<(), SpeechError>;
}

/// A synthesizer that says nothing. Used when voice output is disabled.
#[derive(Debug, Default)]
pub struct SilentVoice;

#[async_trait]
impl SpeechSynthesizer for SilentVoice {
    fn name(&self) -> &str {
        "silent"
    }

    async fn speak(&self, _text: &str) -> std::result::Result<(), SpeechError> {
        Ok(())
    }
}
