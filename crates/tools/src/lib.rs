//! Built-in tool implementations for Kestrel.
//!
//! Tools give the agent its reach: search and read the web, inspect its
//! own source, run scripts in a sandbox, and ask the user for help. The
//! learning monitor is a UI extension and is never called by the model.
//!
//! Command plugins described by `*.tool.json` manifests in the module
//! directory are discovered here and registered alongside the built-ins.

pub mod clarify;
pub mod code_inspector;
pub mod code_runner;
pub mod external;
pub mod learning_monitor;
pub mod web_browser;

use std::sync::Arc;
use std::time::Duration;

use kestrel_config::AppConfig;
use kestrel_core::tool::ToolRegistry;
use kestrel_security::DomainPolicy;
use tracing::warn;

pub use clarify::ClarifyTool;
pub use code_inspector::CodeInspectorTool;
pub use code_runner::CodeRunnerTool;
pub use external::{CommandTool, CommandToolManifest, load_command_tools_from_dir};
pub use learning_monitor::LearningMonitorTool;
pub use web_browser::WebBrowserTool;

/// Domain policy derived from the `[policy]` section.
pub fn domain_policy(config: &AppConfig) -> DomainPolicy {
    DomainPolicy::new(
        config.policy.blocked_domains.clone(),
        config.policy.preferred_domains.clone(),
    )
}

/// Registry with every built-in tool plus the plugins found in
/// `paths.module_dir`. A plugin may not shadow a built-in.
pub fn default_registry(config: &AppConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    let project_root = config
        .paths
        .project_root
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| ".".into());

    registry.register(Arc::new(ClarifyTool));
    registry.register(Arc::new(WebBrowserTool::new(
        domain_policy(config),
        &config.policy.search_url,
    )));
    registry.register(Arc::new(CodeInspectorTool::new(project_root)));
    registry.register(Arc::new(CodeRunnerTool::new(
        &config.paths.workspace_dir,
        &config.policy.interpreter,
        Duration::from_secs(config.policy.exec_timeout_secs),
    )));
    registry.register(Arc::new(LearningMonitorTool));

    for plugin in load_command_tools_from_dir(&config.paths.module_dir) {
        if registry.get(&plugin.manifest().name).is_some() {
            warn!(tool = %plugin.manifest().name, "Plugin name collides with a built-in, skipped");
            continue;
        }
        registry.register(Arc::new(plugin));
    }

    registry
}
