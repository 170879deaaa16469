//! `crabwire onboard` — first-time setup.

use crabwire_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("🦀 crabwire — First-Time Setup");
    println!("==============================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
    } else {
        let mut config_toml = AppConfig::default_toml();
        config_toml.push_str(concat!(
            "\n# Add a provider and its API key, for example:\n",
            "#\n",
            "# [[providers]]\n",
            "# id = \"deepseek\"\n",
            "# api_key = \"sk-...\"\n",
            "#\n",
            "# Keys can also come from the environment:\n",
            "#   CRABWIRE_DEEPSEEK_API_KEY, CRABWIRE_QWEN_API_KEY, ...\n",
        ));
        std::fs::write(&config_path, config_toml)?;
        println!("✅ Created config.toml at: {}", config_path.display());
        println!("\n📝 Next steps:");
        println!("   1. Edit {} and add a provider API key", config_path.display());
        println!("   2. Run: crabwire chat");
        println!("   3. Start chatting!\n");
    }

    println!("🎉 Setup complete! Run `crabwire chat` to start chatting.\n");

    Ok(())
}
