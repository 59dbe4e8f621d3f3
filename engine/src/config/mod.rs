//! Configuration management
//!
//! This module handles loading, validation, and management of the Lexis configuration.
//! Configuration is stored in TOML format at ~/.lexis/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **search**: External search API endpoint and per-call timeout
//! - **research**: Research modes (round budget, quality threshold, wall clock)
//! - **memory**: History retrieval limits and read timeout
//! - **context**: Bounds applied when assembling the grounded context
//! - **classifier**: Optional rule set files replacing the embedded ones
//! - **requirements**: Optional document template file
//! - **llm**: Downstream model provider settings
//! - **streaming**: Response channel sizing
//!
//! # Examples
//!
//! ```no_run
//! use lexis_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Search endpoint: {}", config.search.base_url);
//! println!("Deep mode rounds: {}", config.research.deep.max_rounds);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classifier::ResearchMode;

/// Smallest character cap that leaves room for text before the "..." marker
const MIN_CHAR_CAP: usize = 4;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// External search API settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Research loop settings
    #[serde(default)]
    pub research: ResearchConfig,

    /// Conversation memory settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Context assembly bounds
    #[serde(default)]
    pub context: ContextConfig,

    /// Classifier rule set overrides
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Requirement template overrides
    #[serde(default)]
    pub requirements: RequirementsConfig,

    /// Downstream model configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Response streaming settings
    #[serde(default)]
    pub streaming: StreamingConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// External search API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Base URL; requests go to `{base_url}/search`
    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key, if the provider needs one
    #[serde(default = "default_search_api_key_env")]
    pub api_key_env: String,

    /// Hard timeout per search call in milliseconds
    #[serde(default = "default_search_timeout_ms")]
    pub timeout_ms: u64,

    /// Snippets longer than this are truncated during normalization
    #[serde(default = "default_search_snippet_chars")]
    pub max_snippet_chars: usize,
}

/// Research loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Mode used when a caller does not pick one
    #[serde(default)]
    pub default_mode: ResearchMode,

    /// Jurisdiction appended when verification reports it missing
    #[serde(default)]
    pub default_jurisdiction: Option<String>,

    /// Multi-round agent mode
    #[serde(default = "default_deep_mode")]
    pub deep: ModeConfig,

    /// Single-round mode for lightweight call sites
    #[serde(default = "default_lightweight_mode")]
    pub lightweight: ModeConfig,
}

/// Budget for one research mode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModeConfig {
    /// Maximum number of search rounds in one run
    pub max_rounds: u32,

    /// Verification confidence that ends the loop early; `None` accepts any evidence
    #[serde(default)]
    pub quality_threshold: Option<f64>,

    /// Wall-clock budget for the whole run
    pub max_duration_secs: u64,
}

impl ModeConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

/// Conversation memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Number of messages returned by relevant history lookups
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Upper bound on any memory read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Upper bound on any memory write; a write that trips it is dropped
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// How many recent messages are ranked for relevance
    #[serde(default = "default_candidate_window")]
    pub candidate_window: usize,
}

/// Context assembly configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Number of most recent history turns rendered
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Each history turn is cut to this many characters
    #[serde(default = "default_max_turn_chars")]
    pub max_turn_chars: usize,

    /// Each source snippet is cut to this many characters
    #[serde(default = "default_context_snippet_chars")]
    pub max_snippet_chars: usize,

    /// Hard cap on the whole assembled context
    #[serde(default = "default_context_max_chars")]
    pub max_chars: usize,
}

/// Classifier rule set overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Replaces the embedded deep-mode rule set (supports ~ expansion)
    #[serde(default)]
    pub deep_rules: Option<PathBuf>,

    /// Replaces the embedded lightweight rule set (supports ~ expansion)
    #[serde(default)]
    pub lightweight_rules: Option<PathBuf>,
}

/// Requirement template overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequirementsConfig {
    /// Replaces the embedded document templates (supports ~ expansion)
    #[serde(default)]
    pub templates: Option<PathBuf>,
}

/// Downstream model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Provider used for completions (ollama, openai)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Timeout for establishing a completion stream
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// OpenAI-compatible provider settings
    #[serde(default)]
    pub openai: OpenAIConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Base URL for the chat completions API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_openai_api_key_env")]
    pub api_key_env: String,
}

/// Response streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Bounded channel capacity between the model and the consumer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.lexis")
}

fn default_search_base_url() -> String {
    "http://localhost:8088".to_string()
}

fn default_search_api_key_env() -> String {
    "LEXIS_SEARCH_API_KEY".to_string()
}

fn default_search_timeout_ms() -> u64 {
    8000
}

fn default_search_snippet_chars() -> usize {
    500
}

fn default_deep_mode() -> ModeConfig {
    ModeConfig {
        max_rounds: 8,
        quality_threshold: Some(0.85),
        max_duration_secs: 90,
    }
}

fn default_lightweight_mode() -> ModeConfig {
    ModeConfig {
        max_rounds: 1,
        quality_threshold: None,
        max_duration_secs: 20,
    }
}

fn default_history_limit() -> usize {
    10
}

fn default_read_timeout_ms() -> u64 {
    2000
}

fn default_write_timeout_ms() -> u64 {
    2000
}

fn default_candidate_window() -> usize {
    50
}

fn default_history_turns() -> usize {
    5
}

fn default_max_turn_chars() -> usize {
    400
}

fn default_context_snippet_chars() -> usize {
    600
}

fn default_context_max_chars() -> usize {
    24_000
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_channel_capacity() -> usize {
    32
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: default_search_base_url(),
            api_key_env: default_search_api_key_env(),
            timeout_ms: default_search_timeout_ms(),
            max_snippet_chars: default_search_snippet_chars(),
        }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            default_mode: ResearchMode::default(),
            default_jurisdiction: None,
            deep: default_deep_mode(),
            lightweight: default_lightweight_mode(),
        }
    }
}

impl ResearchConfig {
    /// Budget for the given mode
    pub fn mode(&self, mode: ResearchMode) -> &ModeConfig {
        match mode {
            ResearchMode::Deep => &self.deep,
            ResearchMode::Lightweight => &self.lightweight,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            candidate_window: default_candidate_window(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            max_turn_chars: default_max_turn_chars(),
            max_snippet_chars: default_context_snippet_chars(),
            max_chars: default_context_max_chars(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            timeout_secs: default_llm_timeout_secs(),
            ollama: OllamaConfig::default(),
            openai: OpenAIConfig::default(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            api_key_env: default_openai_api_key_env(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    /// Load configuration from the default location (~/.lexis/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written, TOML parsing
    /// fails, or validation fails.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.lexis/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".lexis").join("config.toml"))
    }

    /// Create a default configuration
    fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            search: SearchConfig::default(),
            research: ResearchConfig::default(),
            memory: MemoryConfig::default(),
            context: ContextConfig::default(),
            classifier: ClassifierConfig::default(),
            requirements: RequirementsConfig::default(),
            llm: LLMConfig::default(),
            streaming: StreamingConfig::default(),
        }
    }

    /// Path of the SQLite database inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("lexis.db")
    }

    /// Validate and process configuration
    ///
    /// Checks value ranges and expands ~ in every configured path.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["ollama", "openai"];
        if !valid_providers.contains(&self.llm.provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid provider '{}'. Must be one of: {}",
                self.llm.provider,
                valid_providers.join(", ")
            )));
        }

        for (name, mode) in [
            ("deep", &self.research.deep),
            ("lightweight", &self.research.lightweight),
        ] {
            if mode.max_rounds == 0 {
                return Err(EngineError::Config(format!(
                    "research.{}.max_rounds must be at least 1",
                    name
                )));
            }
            if let Some(threshold) = mode.quality_threshold {
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(EngineError::Config(format!(
                        "research.{}.quality_threshold must be between 0.0 and 1.0",
                        name
                    )));
                }
            }
            if mode.max_duration_secs == 0 {
                return Err(EngineError::Config(format!(
                    "research.{}.max_duration_secs must be positive",
                    name
                )));
            }
        }

        if self.search.timeout_ms == 0 {
            return Err(EngineError::Config(
                "search.timeout_ms must be positive".to_string(),
            ));
        }
        if self.memory.read_timeout_ms == 0 {
            return Err(EngineError::Config(
                "memory.read_timeout_ms must be positive".to_string(),
            ));
        }
        if self.memory.write_timeout_ms == 0 {
            return Err(EngineError::Config(
                "memory.write_timeout_ms must be positive".to_string(),
            ));
        }
        if self.llm.timeout_secs == 0 {
            return Err(EngineError::Config(
                "llm.timeout_secs must be positive".to_string(),
            ));
        }
        for (name, cap) in [
            ("search.max_snippet_chars", self.search.max_snippet_chars),
            ("context.max_turn_chars", self.context.max_turn_chars),
            ("context.max_snippet_chars", self.context.max_snippet_chars),
            ("context.max_chars", self.context.max_chars),
        ] {
            if cap < MIN_CHAR_CAP {
                return Err(EngineError::Config(format!(
                    "{} must be at least {}",
                    name, MIN_CHAR_CAP
                )));
            }
        }
        if self.streaming.channel_capacity == 0 {
            return Err(EngineError::Config(
                "streaming.channel_capacity must be positive".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if let Some(path) = self.classifier.deep_rules.take() {
            self.classifier.deep_rules = Some(expand_path(&path)?);
        }
        if let Some(path) = self.classifier.lightweight_rules.take() {
            self.classifier.lightweight_rules = Some(expand_path(&path)?);
        }
        if let Some(path) = self.requirements.templates.take() {
            self.requirements.templates = Some(expand_path(&path)?);
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
