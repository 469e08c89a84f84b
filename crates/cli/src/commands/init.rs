//! `hearth init`: first-time setup.

use hearth_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = AppConfig::config_path();
    let cards_dir = config_dir.join("cards");

    println!("🏠 Hearth: First-Time Setup");
    println!("===========================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if !cards_dir.exists() {
        std::fs::create_dir_all(&cards_dir)?;
        println!("✅ Created prompt card directory: {}", cards_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete it and re-run init.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config.toml at: {}", config_path.display());
        println!("\n📝 Next steps:");
        println!("   1. Start Ollama and pull a model: ollama pull gpt-oss:20b");
        println!("   2. Describe your devices under [[devices]] in config.toml");
        println!("   3. Run: hearth chat");
    }

    Ok(())
}
