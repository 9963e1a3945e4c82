//! Configuration management

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming a TOML configuration file
pub const CONFIG_ENV: &str = "FRAMETRACE_CONFIG";

/// Non-empty value disables block tracing entirely
pub const DISABLED_ENV: &str = "FRAMETRACE_DISABLED";

/// Longest New/Modified var summary before it is cut
pub const MAX_SUMMARY_LENGTH: usize = 100;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub tracer: TracerConfig,
    pub history: HistoryConfig,
    pub source_cache: SourceCacheConfig,
}

/// Execution tracer options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// How many call levels below a target are traced (>= 1)
    pub depth: usize,
    /// Prepended to every rendered line
    pub prefix: String,
    /// Render at most this many hits of one line per frame
    #[serde(rename = "loop")]
    pub loop_limit: Option<u32>,
    /// Render the outermost inherited level as call/return only
    pub depth_expanded: bool,
    /// Truncate value reprs to this many characters (0 disables)
    pub max_variable_length: Option<usize>,
    /// Strip memory addresses and full paths for stable output
    pub normalize: bool,
    /// Prefix lines with the thread identity
    pub thread_info: bool,
    /// Trace only this file region instead of explicit targets
    pub observed: Option<ObservedScope>,
    /// Buffer a call graph instead of writing line-by-line text
    pub call_graph: Option<CallGraphConfig>,
    /// Dotted paths rendered alongside locals
    pub watch: Vec<String>,
    /// Dotted paths whose items are rendered one by one
    pub watch_explode: Vec<String>,
}

/// A file and an inclusive line range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedScope {
    pub file: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CallGraphConfig {
    /// Rewritten with the whole graph after every completed call
    pub output: Option<PathBuf>,
}

/// Variable history tracer options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Changes recorded in full per line before collapsing
    #[serde(rename = "loop")]
    pub loop_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceCacheConfig {
    /// Maximum number of source files kept in memory
    pub max_files: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            depth: 1,
            prefix: String::new(),
            loop_limit: None,
            depth_expanded: true,
            max_variable_length: Some(100),
            normalize: false,
            thread_info: false,
            observed: None,
            call_graph: None,
            watch: vec![],
            watch_explode: vec![],
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { loop_limit: 4 }
    }
}

impl Default for SourceCacheConfig {
    fn default() -> Self {
        Self { max_files: 256 }
    }
}

impl TracerConfig {
    /// Check invariants the tracer relies on
    pub fn validate(&self) -> Result<()> {
        if self.depth < 1 {
            return Err(Error::ConfigError {
                message: "depth must be at least 1".to_string(),
            });
        }
        if self.normalize && self.thread_info {
            return Err(Error::ConfigError {
                message: "normalize cannot be combined with thread_info".to_string(),
            });
        }
        if let Some(scope) = &self.observed {
            if scope.start_line > scope.end_line {
                return Err(Error::ConfigError {
                    message: format!(
                        "observed range {}-{} is inverted",
                        scope.start_line, scope.end_line
                    ),
                });
            }
            if !scope.file.exists() {
                return Err(Error::ConfigError {
                    message: format!("observed file {} does not exist", scope.file.display()),
                });
            }
        }
        Ok(())
    }

    /// Depth expansion is meaningless when nothing is rendered as text
    pub fn effective_depth_expanded(&self) -> bool {
        self.depth_expanded && self.call_graph.is_none()
    }

    pub fn effective_max_length(&self) -> Option<usize> {
        self.max_variable_length.filter(|&n| n > 0)
    }

    /// A zero loop threshold means unlimited
    pub fn effective_loop_limit(&self) -> Option<u32> {
        self.loop_limit.filter(|&n| n > 0)
    }
}

impl Config {
    /// Load from `FRAMETRACE_CONFIG` if set, defaults otherwise
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load_from(Path::new(&path)),
            None => Ok(Config::default()),
        }
    }

    /// Load from an explicit TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.tracer.validate()?;
        Ok(config)
    }

    /// Whether `FRAMETRACE_DISABLED` is set to a non-empty value
    pub fn disabled() -> bool {
        std::env::var(DISABLED_ENV).map_or(false, |v| !v.is_empty())
    }
}
