//! `kestrel tools` — List the tool manifest.

use std::path::Path;

use crate::runtime::load_config;

pub fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let registry = kestrel_tools::default_registry(&config);

    println!("Tools ({} registered)", registry.len());
    println!("=====");
    print!("{}", registry.describe_all());

    let (primary, secondaries) = registry.ui_manifest();
    let panels: Vec<String> = primary.iter().chain(&secondaries).map(|d| d.name.clone()).collect();
    if !panels.is_empty() {
        println!("\nUI extensions: {}", panels.join(", "));
    }
    Ok(())
}
