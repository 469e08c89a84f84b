//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. Local models
//! use varied tokenizers, so this only needs to be stable, not exact.

use hearth_core::device::DeviceState;
use hearth_core::event::Event;
use hearth_core::portfolio::PortfolioEntry;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// One rendered portfolio line, as it appears in the prompt.
pub fn render_entry(entry: &PortfolioEntry) -> String {
    if entry.needs_confirmation {
        format!("- {}: {} (unconfirmed)\n", entry.key, entry.value_text())
    } else {
        format!("- {}: {}\n", entry.key, entry.value_text())
    }
}

pub fn render_device_state(state: &DeviceState) -> String {
    format!("- {} {}: {}\n", state.device, state.capability, state.state)
}

pub fn render_event(event: &Event) -> String {
    format!("- {}\n", event.describe())
}
