//! `kestrel chat` / `kestrel ask` — Foreground conversation.
//!
//! While `chat` is open an [`IdleMonitor`] watches the activity tracker and
//! starts the study loop once the user has been quiet long enough. Any typed
//! line interrupts a running study session before its turn is generated.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kestrel_agent::{IdleMonitor, TurnMode, TurnReport};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::info;

use crate::runtime::{load_config, Runtime};

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let runtime = Runtime::start(config).await?;
    let orchestrator = Arc::clone(&runtime.orchestrator);
    let activity = Arc::clone(orchestrator.activity());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = IdleMonitor::from_config(Arc::clone(&runtime.scheduler), &runtime.config).spawn(shutdown_rx);

    println!();
    println!("  Kestrel — Interactive Mode");
    println!("  Backend:  {}", runtime.config.backend.api_url);
    println!("  Tools:    {}", orchestrator.tools().names().join(", "));
    println!("  Graph:    {} nodes", orchestrator.graph().node_count());
    println!(
        "  Studies on its own after {}s idle. /study forces it, an empty line stops it, /quit exits.",
        runtime.config.study.idle_threshold_secs
    );
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        match input {
            "/quit" | "/exit" => break,
            "/study" => {
                let scheduler = Arc::clone(&runtime.scheduler);
                tokio::spawn(async move {
                    if scheduler.run(None).await.is_none() {
                        info!("Study already running");
                    }
                });
                println!("  [study started]");
            }
            "" => {
                activity.touch();
                if activity.is_study_active() {
                    activity.request_stop();
                    println!("  [study stopping]");
                }
            }
            _ => {
                let report = orchestrator.run_turn(input, TurnMode::Foreground, None).await;
                print_report(&report);
            }
        }
        prompt()?;
    }

    activity.request_stop();
    let _ = shutdown_tx.send(true);
    let _ = monitor.await;
    while activity.is_study_active() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    orchestrator.flush().await;

    println!("\n  Goodbye!\n");
    Ok(())
}

/// Run one foreground turn and print the result.
pub async fn ask(config_path: Option<&Path>, message: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let runtime = Runtime::start(config).await?;

    let report = runtime.orchestrator.run_turn(message, TurnMode::Foreground, None).await;
    print_report(&report);
    runtime.orchestrator.flush().await;
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

fn print_report(report: &TurnReport) {
    println!();
    for line in report.response.lines() {
        println!("  Kestrel > {line}");
    }
    for result in &report.tool_results {
        println!("  [{}]", result.describe());
    }
    if let Some(question) = &report.clarification {
        println!("  [needs clarification] {question}");
    }
    if let Some(error) = &report.final_error {
        eprintln!("  [gave up] {error}");
    }
    if report.committed + report.rejected > 0 {
        println!(
            "  [graph] {} relations committed, {} rejected",
            report.committed, report.rejected
        );
    }
    println!();
}
