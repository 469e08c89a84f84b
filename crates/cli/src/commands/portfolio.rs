//! `hearth portfolio`: inspect and correct the user model.

use chrono::Utc;
use hearth_config::AppConfig;
use hearth_core::ids::EventId;
use hearth_core::portfolio::{PortfolioEntry, PortfolioStore, UpsertMode};
use std::sync::Arc;

fn open() -> Result<Arc<dyn PortfolioStore>, Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    Ok(hearth_portfolio::open(&config.portfolio)?)
}

fn print_entry(entry: &PortfolioEntry) {
    let flag = if entry.needs_confirmation { " ⚠️ confirm" } else { "" };
    println!(
        "  {:<44} {:<24} {:.2}  {}{flag}",
        entry.key,
        entry.value_text(),
        entry.confidence,
        entry.updated_at.format("%Y-%m-%d %H:%M")
    );
}

/// Parse user input as JSON, falling back to a plain string.
pub fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

pub async fn list(scope: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let store = open()?;
    let entries = store.get_prefix(scope.unwrap_or("")).await?;

    if entries.is_empty() {
        println!("📒 Nothing known yet.");
        return Ok(());
    }

    println!("📒 Portfolio ({} entries):", entries.len());
    println!("{:-<96}", "");
    for entry in &entries {
        print_entry(entry);
    }
    Ok(())
}

pub async fn history(key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open()?;
    let current = store.get(key).await?;
    let history = store.history(key).await?;

    let Some(current) = current else {
        println!("❌ No entry for '{key}'.");
        return Ok(());
    };

    println!("📒 {key}");
    print_entry(&current);
    for entry in history.iter().rev() {
        print_entry(entry);
    }
    Ok(())
}

pub async fn pending() -> Result<(), Box<dyn std::error::Error>> {
    let store = open()?;
    let entries = store.pending_confirmations().await?;
    if entries.is_empty() {
        println!("✅ Nothing to confirm.");
        return Ok(());
    }
    println!("⚠️  {} entries need confirmation:", entries.len());
    for entry in &entries {
        print_entry(entry);
    }
    println!("\n   Confirm or correct with: hearth portfolio set <key> <value>");
    Ok(())
}

pub async fn set(key: &str, value: &str, confidence: f32) -> Result<(), Box<dyn std::error::Error>> {
    let store = open()?;
    let entry = PortfolioEntry::new(key, parse_value(value), Utc::now(), EventId::new())
        .with_confidence(confidence);
    let outcome = store.upsert(entry, UpsertMode::Force).await?;

    match outcome.superseded {
        Some(previous) => println!(
            "✅ {key}: {} → {}",
            previous.value_text(),
            outcome.stored.value_text()
        ),
        None => println!("✅ {key} = {}", outcome.stored.value_text()),
    }
    Ok(())
}
