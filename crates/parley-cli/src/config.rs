//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use parley_multiplex::{ProjectConfig, ToolServerSpec};
use parley_protocol::{PermissionMode, Persona};

/// Configuration for parley
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Program that bridges commands and envelopes to the assistant
    pub bridge_command: Option<String>,
    /// Extra arguments for the bridge program
    pub bridge_args: Vec<String>,
    /// Default model for new sessions
    pub model: Option<String>,
    /// Default permission mode
    pub permission_mode: Option<PermissionMode>,
    /// Path to a file whose contents seed the system prompt
    pub system_prompt_file: Option<String>,
    /// Speaker roster applied to every project
    pub personas: Vec<Persona>,
    /// External tool servers
    pub tool_servers: Vec<ToolServerSpec>,
    /// Override for the conversation data directory
    pub data_dir: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for PARLEY_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("PARLEY_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file, falling back to defaults on any problem
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    /// Directory holding conversation files
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return PathBuf::from(dir);
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
            .join("conversations")
    }

    /// Resolve the per-project launch configuration
    pub fn project_config(&self) -> ProjectConfig {
        let system_prompt = self.system_prompt_file.as_ref().and_then(|path| {
            match fs::read_to_string(path) {
                Ok(content) => Some(content),
                Err(e) => {
                    eprintln!("Warning: Failed to read system prompt file: {}", e);
                    None
                }
            }
        });
        ProjectConfig {
            model: self.model.clone().unwrap_or_else(|| "default".to_string()),
            permission_mode: self.permission_mode.unwrap_or_default(),
            personas: self.personas.clone(),
            tool_servers: self.tool_servers.clone(),
            system_prompt,
        }
    }
}

/// Example config shown by --init-config
pub fn example_config() -> &'static str {
    r##"# parley configuration

# Program that speaks the envelope protocol on stdio
# bridge_command = "assistant-bridge"
# bridge_args = []

# model = "default"
# permission_mode = "prompt"
# system_prompt_file = "~/.config/parley/prompt.md"

# [[personas]]
# name = "Architect"
# icon = "compass"
# color = "#4477ff"

# [[tool_servers]]
# name = "search"
# command = "search-server"
# args = ["--port", "0"]
"##
}
