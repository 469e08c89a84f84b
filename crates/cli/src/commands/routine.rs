//! `hearth routine`: manage scheduled routines.

use hearth_config::{AppConfig, RoutineConfig};
use hearth_ingress::CronExpr;

pub async fn list() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if config.routines.is_empty() {
        println!("📋 No routines configured.");
        println!();
        println!("   Add one with:");
        println!("   hearth routine add bedtime \"30 22 * * *\" \"Dim the lights and close the curtains\"");
        return Ok(());
    }

    println!("📋 Routines ({}):", config.routines.len());
    println!("{:-<72}", "");
    for (i, routine) in config.routines.iter().enumerate() {
        let status = if routine.enabled { "✅" } else { "⏸️ " };
        println!(
            "  {i:>2}. {status} {:<20} {:<16} {}",
            routine.name, routine.schedule, routine.prompt
        );
    }

    Ok(())
}

pub async fn add(name: &str, schedule: &str, prompt: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if config.routines.iter().any(|r| r.name == name) {
        println!("❌ Routine '{name}' already exists. Remove it first or use a different name.");
        return Ok(());
    }

    if let Err(reason) = CronExpr::parse(schedule) {
        println!("❌ Invalid cron expression: {reason}");
        println!("   Example: \"*/30 * * * *\" = every 30 minutes");
        return Ok(());
    }

    config.routines.push(RoutineConfig {
        name: name.to_string(),
        schedule: schedule.to_string(),
        prompt: prompt.to_string(),
        enabled: true,
    });

    config.save()?;
    println!("✅ Routine '{name}' added with schedule: {schedule}");
    Ok(())
}

pub async fn remove(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let before = config.routines.len();
    config.routines.retain(|r| r.name != name);

    if config.routines.len() == before {
        println!("❌ Routine '{name}' not found.");
    } else {
        config.save()?;
        println!("🗑️  Routine '{name}' removed.");
    }

    Ok(())
}

pub async fn set_enabled(name: &str, enabled: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let Some(routine) = config.routines.iter_mut().find(|r| r.name == name) else {
        println!("❌ Routine '{name}' not found.");
        return Ok(());
    };
    routine.enabled = enabled;
    config.save()?;

    if enabled {
        println!("▶️  Routine '{name}' resumed.");
    } else {
        println!("⏸️  Routine '{name}' paused.");
    }
    Ok(())
}
