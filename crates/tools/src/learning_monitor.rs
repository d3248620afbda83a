//! Learning monitor — UI extension showing study progress.

use std::sync::Arc;

use async_trait::async_trait;
use kestrel_core::error::ToolError;
use kestrel_core::tool::{Params, Tool, ToolKind};
use kestrel_core::ui::{UiConstructor, UiPanel, UiSnapshot};

const TOOL_NAME: &str = "learning_monitor";
/// Topics shown in the panel.
pub const MONITOR_TOPICS: usize = 6;
const BAR_WIDTH: usize = 20;
const BAR_SCALE: f64 = 10.0;

pub struct LearningMonitorTool;

struct LearningMonitorPanel;

impl UiPanel for LearningMonitorPanel {
    fn title(&self) -> &str {
        "Learning monitor"
    }

    fn render(&self, snapshot: &UiSnapshot) -> String {
        let state = if snapshot.study_active { "studying" } else { "idle" };
        let mut out = format!(
            "{} [{state}] graph: {} nodes / {} edges\n",
            self.title(),
            snapshot.graph_nodes,
            snapshot.graph_edges
        );
        if snapshot.top_topics.is_empty() {
            out.push_str("  (no topics yet)\n");
            return out;
        }
        let width = snapshot
            .top_topics
            .iter()
            .take(MONITOR_TOPICS)
            .map(|(t, _)| t.chars().count())
            .max()
            .unwrap_or(0);
        for (topic, weight) in snapshot.top_topics.iter().take(MONITOR_TOPICS) {
            let filled = ((weight / BAR_SCALE).clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize;
            out.push_str(&format!(
                "  {topic:<width$} {}{} {weight:.2}\n",
                "#".repeat(filled),
                ".".repeat(BAR_WIDTH - filled),
            ));
        }
        out
    }
}

#[async_trait]
impl Tool for LearningMonitorTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Panel showing the highest-weighted study topics and graph size."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::UiExtension
    }

    fn ui_constructor(&self) -> Option<UiConstructor> {
        Some(Arc::new(|| Box::new(LearningMonitorPanel) as Box<dyn UiPanel>))
    }

    async fn execute(&self, _params: Params) -> Result<String, ToolError> {
        Err(ToolError::InvalidArguments(format!(
            "`{TOOL_NAME}` is a display panel and takes no calls"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::tool::ToolRegistry;

    #[test]
    fn renders_top_six_topics() {
        let snapshot = UiSnapshot {
            top_topics: (0..8).map(|i| (format!("topic{i}"), 10.0 - i as f64)).collect(),
            graph_nodes: 12,
            graph_edges: 30,
            study_active: true,
        };
        let panel = LearningMonitorTool.ui_constructor().unwrap()();
        let text = panel.render(&snapshot);
        assert!(text.contains("[studying]"));
        assert!(text.contains("12 nodes / 30 edges"));
        assert!(text.contains("topic5"));
        assert!(!text.contains("topic6"));
        assert!(text.contains(&format!("topic0 {} 10.00", "#".repeat(BAR_WIDTH))));
    }

    #[test]
    fn empty_snapshot() {
        let text = LearningMonitorPanel.render(&UiSnapshot::default());
        assert!(text.contains("no topics yet"));
    }

    #[test]
    fn listed_in_manifest_not_in_prompt() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(LearningMonitorTool));
        let (primary, secondaries) = registry.ui_manifest();
        assert!(primary.is_none());
        assert_eq!(secondaries[0].name, TOOL_NAME);
        assert!(registry.describe_all().is_empty());
    }
}
