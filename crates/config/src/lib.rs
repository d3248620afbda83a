//! Configuration loading, validation, and management for Kestrel.
//!
//! Loads configuration from `~/.kestrel/config.toml` with environment
//! variable overrides. Validates all settings at startup; an invalid file is
//! fatal before any scheduler exists.

use kestrel_core::BackendProfile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.kestrel/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generation backend endpoint
    #[serde(default)]
    pub backend: BackendConfig,

    /// Normal and extended-context backend profiles
    #[serde(default)]
    pub profiles: ProfilesConfig,

    /// Idle detection and autonomous study
    #[serde(default)]
    pub study: StudyConfig,

    /// Turn loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Filesystem layout
    #[serde(default)]
    pub paths: PathsConfig,

    /// Dispatch policy
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Generation backend endpoint configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of an OpenAI-compatible server
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_url() -> String {
    "http://127.0.0.1:8080/v1".into()
}
fn default_request_timeout() -> u64 {
    300
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// The two profiles the scheduler swaps between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilesConfig {
    #[serde(default = "default_normal_profile")]
    pub normal: BackendProfile,

    #[serde(default = "default_extended_profile")]
    pub extended: BackendProfile,
}

fn default_normal_profile() -> BackendProfile {
    BackendProfile::default()
}

fn default_extended_profile() -> BackendProfile {
    BackendProfile {
        name: "extended".into(),
        context_size: 16384,
        max_tokens: 2048,
        temperature: 0.8,
        ..BackendProfile::default()
    }
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            normal: default_normal_profile(),
            extended: default_extended_profile(),
        }
    }
}

/// Idle detection and study loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyConfig {
    /// Seconds without user activity before self-study starts
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: u64,

    /// How often the idle monitor checks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Sleep between study iterations
    #[serde(default = "default_iteration_pause")]
    pub iteration_pause_secs: u64,

    /// Consecutive failed iterations that trigger deadlock recovery
    #[serde(default = "default_deadlock_threshold")]
    pub deadlock_threshold: u32,

    /// Topics to study before the graph has any
    #[serde(default)]
    pub seed_topics: Vec<String>,
}

fn default_idle_threshold() -> u64 {
    300
}
fn default_poll_interval() -> u64 {
    5
}
fn default_iteration_pause() -> u64 {
    30
}
fn default_deadlock_threshold() -> u32 {
    3
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            idle_threshold_secs: default_idle_threshold(),
            poll_interval_secs: default_poll_interval(),
            iteration_pause_secs: default_iteration_pause(),
            deadlock_threshold: default_deadlock_threshold(),
            seed_topics: Vec::new(),
        }
    }
}

/// Turn loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Regenerations allowed after a failed tool call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Vector memories recalled per turn
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    /// Radius of graph logic chains used for recall
    #[serde(default = "default_chain_depth")]
    pub chain_depth: usize,
}

fn default_max_retries() -> u32 {
    2
}
fn default_recall_limit() -> usize {
    2
}
fn default_chain_depth() -> usize {
    2
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            recall_limit: default_recall_limit(),
            chain_depth: default_chain_depth(),
        }
    }
}

/// Filesystem layout. A leading `~/` is expanded on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Graph, weights, visited set, memory and reports
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// External `*.tool.json` plugin manifests
    #[serde(default = "default_module_dir")]
    pub module_dir: PathBuf,

    /// Sandbox for code written by the model
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,

    /// Root the code inspector may read; defaults to the current directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_root: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    AppConfig::config_dir().join("data")
}
fn default_module_dir() -> PathBuf {
    AppConfig::config_dir().join("modules")
}
fn default_workspace_dir() -> PathBuf {
    AppConfig::config_dir().join("workspace")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            module_dir: default_module_dir(),
            workspace_dir: default_workspace_dir(),
            project_root: None,
        }
    }
}

impl PathsConfig {
    pub fn graph_path(&self) -> PathBuf {
        self.data_dir.join("graph.json")
    }

    pub fn topics_path(&self) -> PathBuf {
        self.data_dir.join("topics.json")
    }

    pub fn visited_path(&self) -> PathBuf {
        self.data_dir.join("visited.json")
    }

    pub fn memory_path(&self) -> PathBuf {
        self.data_dir.join("memory.jsonl")
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }
}

/// Cross-cutting dispatch policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Domains excluded from searches and refused for browsing
    #[serde(default = "default_blocked_domains")]
    pub blocked_domains: Vec<String>,

    /// Domains ranked first in search results
    #[serde(default = "default_preferred_domains")]
    pub preferred_domains: Vec<String>,

    /// Timeout for sandboxed code execution
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,

    /// Interpreter used by the code runner
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// HTML search endpoint queried by the web browser tool
    #[serde(default = "default_search_url")]
    pub search_url: String,
}

fn default_blocked_domains() -> Vec<String> {
    [
        "zhihu.com",
        "csdn.net",
        "baidu.com",
        "jianshu.com",
        "51cto.com",
        "jb51.net",
        "360.cn",
        "so.com",
        "xiaohongshu.com",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_preferred_domains() -> Vec<String> {
    [
        "arxiv.org",
        "openreview.net",
        "pytorch.org",
        "docs.python.org",
        "numpy.org",
        "distill.pub",
        "stanford.edu",
        "mit.edu",
        "berkeley.edu",
        "github.com",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_exec_timeout() -> u64 {
    15
}
fn default_interpreter() -> String {
    "python3".into()
}
fn default_search_url() -> String {
    "https://html.duckduckgo.com/html/".into()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            blocked_domains: default_blocked_domains(),
            preferred_domains: default_preferred_domains(),
            exec_timeout_secs: default_exec_timeout(),
            interpreter: default_interpreter(),
            search_url: default_search_url(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `KESTREL_CONFIG` or the default path
    /// (`~/.kestrel/config.toml`), then apply environment overrides:
    /// - `KESTREL_API_URL`, `KESTREL_API_KEY`
    /// - `KESTREL_MODEL` (both profiles)
    /// - `KESTREL_IDLE_THRESHOLD`
    /// - `KESTREL_DATA_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("KESTREL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.paths.data_dir = expand_home(&config.paths.data_dir);
        config.paths.module_dir = expand_home(&config.paths.module_dir);
        config.paths.workspace_dir = expand_home(&config.paths.workspace_dir);
        if config.profiles.normal.name.is_empty() {
            config.profiles.normal.name = "normal".into();
        }
        if config.profiles.extended.name.is_empty() {
            config.profiles.extended.name = "extended".into();
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("KESTREL_API_URL") {
            self.backend.api_url = url;
        }
        if let Some(key) = lookup("KESTREL_API_KEY") {
            self.backend.api_key = Some(key);
        }
        if let Some(model) = lookup("KESTREL_MODEL") {
            self.profiles.normal.model = model.clone();
            self.profiles.extended.model = model;
        }
        if let Some(secs) = lookup("KESTREL_IDLE_THRESHOLD").and_then(|s| s.parse().ok()) {
            self.study.idle_threshold_secs = secs;
        }
        if let Some(dir) = lookup("KESTREL_DATA_DIR") {
            self.paths.data_dir = expand_home(Path::new(&dir));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".kestrel")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.api_url.trim().is_empty() {
            return Err(ConfigError::ValidationError("backend.api_url must not be empty".into()));
        }

        for profile in [&self.profiles.normal, &self.profiles.extended] {
            if profile.context_size == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "profile '{}' has context_size 0",
                    profile.name
                )));
            }
            if !(0.0..=2.0).contains(&profile.temperature) {
                return Err(ConfigError::ValidationError(format!(
                    "profile '{}' temperature must be between 0.0 and 2.0",
                    profile.name
                )));
            }
        }

        if self.study.idle_threshold_secs == 0 {
            return Err(ConfigError::ValidationError("study.idle_threshold_secs must be > 0".into()));
        }
        if self.study.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError("study.poll_interval_secs must be > 0".into()));
        }
        if self.study.deadlock_threshold == 0 {
            return Err(ConfigError::ValidationError("study.deadlock_threshold must be > 0".into()));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs_home().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_retries, 2);
        assert_eq!(config.study.deadlock_threshold, 3);
        assert_eq!(config.profiles.extended.context_size, 16384);
        assert!(config.policy.blocked_domains.contains(&"csdn.net".to_string()));
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.backend.api_url, config.backend.api_url);
        assert_eq!(parsed.profiles.normal, config.profiles.normal);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.profiles.extended.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_idle_threshold_rejected() {
        let mut config = AppConfig::default();
        config.study.idle_threshold_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("idle_threshold_secs"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.study.idle_threshold_secs, 300);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[study]
idle_threshold_secs = 60

[profiles.extended]
model = "qwen2.5-14b"
context_size = 32768

[paths]
data_dir = "~/research/kestrel"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.study.idle_threshold_secs, 60);
        assert_eq!(config.study.poll_interval_secs, 5);
        assert_eq!(config.profiles.extended.model, "qwen2.5-14b");
        assert_eq!(config.profiles.extended.max_tokens, 1024);
        assert_eq!(config.profiles.normal.context_size, 8192);
        assert!(config.paths.data_dir.ends_with("research/kestrel"));
        assert!(!config.paths.data_dir.starts_with("~"));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[study\nidle = ").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn overrides_apply_from_lookup() {
        let mut config = AppConfig::default();
        config.apply_overrides(|key| match key {
            "KESTREL_MODEL" => Some("llama-3.1-8b".into()),
            "KESTREL_IDLE_THRESHOLD" => Some("45".into()),
            "KESTREL_API_KEY" => Some("sk-secret".into()),
            _ => None,
        });
        assert_eq!(config.profiles.normal.model, "llama-3.1-8b");
        assert_eq!(config.profiles.extended.model, "llama-3.1-8b");
        assert_eq!(config.study.idle_threshold_secs, 45);
        assert!(!format!("{config:?}").contains("sk-secret"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("idle_threshold_secs"));
        assert!(toml_str.contains("[profiles.extended]"));
    }
}
