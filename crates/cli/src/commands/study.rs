//! `kestrel study` — Run the study loop in the foreground.

use std::path::Path;
use std::sync::Arc;

use crate::runtime::{load_config, Runtime};

pub async fn run(config_path: Option<&Path>, iterations: Option<u64>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let runtime = Runtime::start(config).await?;

    let activity = Arc::clone(runtime.orchestrator.activity());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            activity.request_stop();
        }
    });

    println!("  Studying{} — Ctrl+C to stop", match iterations {
        Some(n) => format!(" for {n} iterations"),
        None => String::new(),
    });

    let Some(outcome) = runtime.scheduler.run(iterations).await else {
        anyhow::bail!("A study session is already running");
    };
    runtime.orchestrator.flush().await;

    println!();
    println!("  Iterations: {}", outcome.iterations);
    println!("  Closures:   {}", outcome.closures);
    println!("  Deadlocks:  {}", outcome.deadlocks);
    if outcome.interrupted {
        println!("  (interrupted)");
    }
    for (topic, weight) in runtime.topics.top(5) {
        println!("  {weight:>6.2}  {topic}");
    }
    println!("  Report: {}", runtime.journal.today_path().display());
    Ok(())
}
