//! `hearth status`: configuration summary and engine health.

use hearth_config::AppConfig;
use hearth_providers::OllamaEngine;
use std::time::Duration;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("🏠 Hearth Status");
    println!("================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Engine:       {} at {}", config.reasoning.engine, config.reasoning.base_url);
    println!("  Model:        {}", config.reasoning.model);
    println!("  Timeout:      {}ms x {} attempts", config.reasoning.timeout_ms, config.reasoning.max_attempts);
    println!("  Portfolio:    {} ({})", config.portfolio.backend, config.portfolio.journal_path().display());
    println!("  Devices:      {}", config.devices.len());
    println!("  Routines:     {}", config.routines.iter().filter(|r| r.enabled).count());
    println!("  Voice:        {}", if config.voice.enabled { "enabled" } else { "disabled" });

    let config_path = AppConfig::config_path();
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file, run `hearth init` first");
    }

    if config.reasoning.engine != "ollama" {
        println!("  ⚠️  Unknown engine '{}'", config.reasoning.engine);
        return Ok(());
    }

    let engine = OllamaEngine::new(&config.reasoning.base_url).with_timeout(Duration::from_secs(5));
    match engine.list_models().await {
        Ok(models) if models.iter().any(|m| m == &config.reasoning.model) => {
            println!("  ✅ Engine reachable, model '{}' installed", config.reasoning.model);
        }
        Ok(models) => {
            println!(
                "  ⚠️  Engine reachable but model '{}' is missing ({} installed)",
                config.reasoning.model,
                models.len()
            );
            println!("     Run: ollama pull {}", config.reasoning.model);
        }
        Err(e) => println!("  ❌ Engine unreachable: {e}"),
    }

    Ok(())
}
