//! `kestrel status` — Show configuration, study progress and UI panels.

use std::path::Path;

use chrono::Local;
use kestrel_agent::StudyJournal;
use kestrel_config::AppConfig;

use crate::runtime::{load_config, open_graph, open_topics, ui_snapshot};

pub fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let graph = open_graph(&config)?;
    let topics = open_topics(&config)?;
    let journal = StudyJournal::new(config.paths.reports_dir());

    println!("Kestrel Status");
    println!("==============");
    println!("  Config dir:     {}", AppConfig::config_dir().display());
    println!("  Data dir:       {}", config.paths.data_dir.display());
    println!("  Backend:        {}", config.backend.api_url);
    println!(
        "  Profiles:       normal {} ({} ctx), extended {} ({} ctx)",
        config.profiles.normal.model,
        config.profiles.normal.context_size,
        config.profiles.extended.model,
        config.profiles.extended.context_size
    );
    println!("  Idle threshold: {}s", config.study.idle_threshold_secs);
    println!("  Graph:          {} nodes, {} edges", graph.node_count(), graph.edge_count());
    println!("  Topics:         {}", topics.len());

    let today = Local::now().date_naive();
    println!(
        "  Today's report: {} ({} entries)",
        journal.report_path(today).display(),
        journal.entry_count(today)
    );

    let registry = kestrel_tools::default_registry(&config);
    let (primary, secondaries) = registry.ui_manifest();
    let snapshot = ui_snapshot(&topics, &graph, false);
    for descriptor in primary.iter().chain(&secondaries) {
        println!();
        print!("{}", descriptor.build().render(&snapshot));
    }

    let config_file = AppConfig::config_dir().join("config.toml");
    if config_path.is_none() && !config_file.exists() {
        println!("\n  No config file — run `kestrel onboard` first");
    }
    Ok(())
}
