//! Reasoning engine implementations for Hearth.
//!
//! All engines implement `hearth_core::ReasoningEngine`. [`from_config`]
//! picks the engine named in the `[reasoning]` section.

pub mod ollama;

pub use ollama::OllamaEngine;

use hearth_config::ReasoningConfig;
use hearth_core::error::EngineError;
use hearth_core::reasoning::ReasoningEngine;
use std::sync::Arc;

/// Build the configured reasoning engine.
pub fn from_config(config: &ReasoningConfig) -> Result<Arc<dyn ReasoningEngine>, EngineError> {
    match config.engine.as_str() {
        "ollama" => Ok(Arc::new(
            OllamaEngine::new(&config.base_url).with_timeout(config.timeout()),
        )),
        other => Err(EngineError::NotConfigured(format!(
            "unknown reasoning engine '{other}'"
        ))),
    }
}
