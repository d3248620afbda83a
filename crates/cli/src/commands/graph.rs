//! `kestrel graph` — Inspect or edit the knowledge graph.

use std::path::Path;

use clap::Subcommand;
use kestrel_agent::BackendSummarizer;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::runtime::{load_config, open_graph, Runtime};

#[derive(Subcommand)]
pub enum GraphAction {
    /// Node, edge and summary counts plus the most important entities
    Stats,

    /// Print the reasoning chains leaving an entity
    Query {
        entity: String,
        #[arg(short, long, default_value_t = 2)]
        depth: usize,
    },

    /// Add a relation by hand
    Relate {
        subject: String,
        relation: String,
        object: String,
    },

    /// Regenerate community summaries through the backend
    Summarize,
}

pub async fn run(config_path: Option<&Path>, action: GraphAction) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    match action {
        GraphAction::Stats => {
            let graph = open_graph(&config)?;
            println!("  Nodes:     {}", graph.node_count());
            println!("  Edges:     {}", graph.edge_count());
            println!("  Summaries: {}", graph.summary_count());
            for (entity, importance) in graph.top_entities(10) {
                println!("  {importance:>6.2}  {entity}");
            }
        }
        GraphAction::Query { entity, depth } => {
            let graph = open_graph(&config)?;
            let chains = graph.query_logic_chain(&entity, depth);
            if chains.is_empty() {
                println!("  No chains from '{entity}'");
            }
            for chain in chains {
                println!("  {chain}");
            }
        }
        GraphAction::Relate { subject, relation, object } => {
            let graph = open_graph(&config)?;
            if graph.add_relation(&subject, &relation, &object)? {
                println!("  Added: {subject} --{relation}--> {object}");
            } else {
                anyhow::bail!("Rejected: conflicts with an existing relation between '{subject}' and '{object}'");
            }
        }
        GraphAction::Summarize => {
            let runtime = Runtime::start(config).await?;
            let graph = runtime.orchestrator.graph();
            let summarizer = BackendSummarizer::new(&runtime.orchestrator);
            let mut rng = StdRng::from_os_rng();
            let written = graph.update_community_summaries(&summarizer, &mut rng).await?;
            println!("  {written} community summaries written ({} total)", graph.summary_count());
        }
    }
    Ok(())
}
