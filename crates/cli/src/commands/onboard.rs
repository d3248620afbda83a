//! `kestrel onboard` — First-time setup.

use std::path::Path;

use kestrel_config::AppConfig;

pub fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    let config = AppConfig::default();

    println!("Kestrel — First-Time Setup");
    println!("==========================\n");

    if let Some(dir) = config_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    for (label, dir) in [
        ("Data", &config.paths.data_dir),
        ("Modules", &config.paths.module_dir),
        ("Workspace", &config.paths.workspace_dir),
    ] {
        if dir.exists() {
            println!("  {label} directory exists: {}", dir.display());
        } else {
            std::fs::create_dir_all(dir)?;
            println!("  Created {} directory: {}", label.to_lowercase(), dir.display());
        }
    }

    if config_path.exists() {
        println!("\n  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or delete it and re-run onboard.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("  Created config.toml at: {}", config_path.display());
        println!("\n  Next steps:");
        println!("   1. Point [backend].api_url at your OpenAI-compatible server");
        println!("   2. Add a few [study].seed_topics");
        println!("   3. Run: kestrel chat\n");
    }

    Ok(())
}
