//! UI manifest types consumed by an external front-end.
//!
//! The core never draws anything. UI-extension tools hand out a constructor;
//! the front-end builds panels from it and feeds them snapshots.

use std::sync::Arc;

/// Read-only state a panel may render.
#[derive(Debug, Clone, Default)]
pub struct UiSnapshot {
    /// Topics ordered by descending weight.
    pub top_topics: Vec<(String, f64)>,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub study_active: bool,
}

/// A renderable panel built by a [`UiDescriptor`] constructor.
pub trait UiPanel: Send {
    fn title(&self) -> &str;

    /// Render the snapshot as plain text.
    fn render(&self, snapshot: &UiSnapshot) -> String;
}

pub type UiConstructor = Arc<dyn Fn() -> Box<dyn UiPanel> + Send + Sync>;

/// `{name, constructor}` pair advertised to the front-end.
#[derive(Clone)]
pub struct UiDescriptor {
    pub name: String,
    pub constructor: UiConstructor,
}

impl UiDescriptor {
    pub fn build(&self) -> Box<dyn UiPanel> {
        (self.constructor)()
    }
}

impl std::fmt::Debug for UiDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// `(primary, secondaries)` as returned by the tool registry.
pub type UiManifest = (Option<UiDescriptor>, Vec<UiDescriptor>);
