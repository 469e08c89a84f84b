//! Portfolio store implementations for Hearth.
//!
//! Both backends share the same last-write-wins ledger; the file backend
//! additionally appends every accepted write to a JSONL journal and replays
//! it on open.

pub mod file_backend;
pub mod in_memory;
mod ledger;

pub use file_backend::{FilePortfolio, JournalRecord};
pub use in_memory::InMemoryPortfolio;

use hearth_config::PortfolioConfig;
use hearth_core::error::PortfolioError;
use hearth_core::portfolio::PortfolioStore;
use std::sync::Arc;

/// Open the store selected by configuration.
pub fn open(config: &PortfolioConfig) -> Result<Arc<dyn PortfolioStore>, PortfolioError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(
            InMemoryPortfolio::new().with_low_trust_threshold(config.low_trust_threshold),
        )),
        "file" => Ok(Arc::new(
            FilePortfolio::open(config.journal_path())?
                .with_low_trust_threshold(config.low_trust_threshold),
        )),
        other => Err(PortfolioError::Storage(format!(
            "unknown portfolio backend '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_selects_backend() {
        let config = PortfolioConfig {
            backend: "memory".into(),
            ..Default::default()
        };
        assert_eq!(open(&config).unwrap().name(), "in_memory");

        let dir = tempfile::tempdir().unwrap();
        let config = PortfolioConfig {
            backend: "file".into(),
            path: Some(dir.path().join("p.jsonl").display().to_string()),
            ..Default::default()
        };
        assert_eq!(open(&config).unwrap().name(), "file");

        let config = PortfolioConfig {
            backend: "redis".into(),
            ..Default::default()
        };
        assert!(open(&config).is_err());
    }
}
