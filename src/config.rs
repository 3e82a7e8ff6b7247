use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

// ── Protocol ──────────────────────────────────────────────────────────────────

/// How the generator endpoint is spoken to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// OpenAI-compatible chat completions; the reply is decoded locally
    #[default]
    Chat,
    /// A UI agent service speaking `{promptText, history}` → `{documentFragments}`
    Agent,
}

// ── Profile ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Generator endpoint. Base URL for `chat`, full URL for `agent`.
    pub endpoint: String,
    /// Model identifier (ignored by `agent`)
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub protocol: Protocol,
    /// Optional API key (sent as Bearer token)
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Whole-request timeout in seconds, generation included
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Accept `/action` submissions from the rendered UI. Default: true.
    #[serde(default = "default_enable_actions")]
    pub enable_actions: bool,
}

fn default_model() -> String {
    "qwen3:14b".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_enable_actions() -> bool {
    true
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: default_model(),
            protocol: Protocol::default(),
            api_key: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            enable_actions: default_enable_actions(),
        }
    }
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Which profile to use when none is specified
    #[serde(default = "default_profile_name")]
    pub default_profile: String,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

fn default_profile_name() -> String {
    "default".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            default_profile: default_profile_name(),
            profiles: HashMap::new(),
        }
    }
}

impl ConfigFile {
    /// Load from the standard location, or defaults if there is no file yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    /// Write a starter config file (only if it doesn't exist).
    pub fn write_default_if_missing() -> Result<PathBuf> {
        let path = config_path();
        write_default_at(&path)?;
        Ok(path)
    }

    pub fn resolve_profile(&self, name: Option<&str>) -> Option<&Profile> {
        let key = name.unwrap_or(&self.default_profile);
        self.profiles.get(key)
    }
}

fn write_default_at(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("Failed to write config file at {}", path.display()))
}

// ── Resolved runtime config (after merging file + CLI overrides) ──────────────

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub endpoint: String,
    pub model: String,
    pub protocol: Protocol,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub enable_actions: bool,
    /// Profile name that was resolved (for display)
    pub profile_name: String,
}

/// Values given on the command line or via environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides<'a> {
    pub profile: Option<&'a str>,
    pub endpoint: Option<&'a str>,
    pub model: Option<&'a str>,
    pub api_key: Option<&'a str>,
    pub protocol: Option<Protocol>,
}

impl ResolvedConfig {
    /// Priority: CLI args > env vars (handled by clap) > config file profile > built-in defaults
    pub fn resolve(file: &ConfigFile, overrides: &Overrides<'_>) -> Self {
        let profile_name = overrides
            .profile
            .unwrap_or(&file.default_profile)
            .to_string();

        let base = file
            .resolve_profile(overrides.profile)
            .cloned()
            .unwrap_or_default();

        Self {
            endpoint: overrides
                .endpoint
                .map(str::to_string)
                .unwrap_or(base.endpoint),
            model: overrides.model.map(str::to_string).unwrap_or(base.model),
            protocol: overrides.protocol.unwrap_or(base.protocol),
            api_key: overrides.api_key.map(str::to_string).or(base.api_key),
            max_tokens: base.max_tokens,
            timeout_secs: base.timeout_secs,
            enable_actions: base.enable_actions,
            profile_name,
        }
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────────

pub fn config_path() -> PathBuf {
    dirs_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("uiloom")
        .join("config.toml")
}

fn dirs_config_dir() -> Option<PathBuf> {
    // XDG_CONFIG_HOME or ~/.config on Linux/macOS
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
}

// ── Default config template written on first run ──────────────────────────────

const DEFAULT_CONFIG_TOML: &str = r#"# uiloom configuration
# Run `uiloom --init` to regenerate this file.

default_profile = "local"

# ── Local Ollama (default) ────────────────────────────────────────────────────
[profiles.local]
endpoint = "http://localhost:11434"
model    = "qwen3:14b"
protocol = "chat"
# api_key is not needed for Ollama

# ── OpenAI-compatible cloud endpoint ─────────────────────────────────────────
# [profiles.openrouter]
# endpoint     = "https://openrouter.ai/api"
# model        = "anthropic/claude-sonnet-4.5"
# api_key      = "sk-or-..."
# max_tokens   = 4096
# timeout_secs = 180

# ── UI agent service ──────────────────────────────────────────────────────────
# Posts {"promptText", "history"} and expects {"documentFragments"} back.
# The agent does its own schema validation and retries.
# [profiles.agent]
# endpoint = "http://localhost:10002/generate"
# protocol = "agent"

# ── Rendered-UI actions ───────────────────────────────────────────────────────
# enable_actions = true   # allow /action to submit button/form events as refinements
"#;
