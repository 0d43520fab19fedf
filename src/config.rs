use std::env;
use std::path::PathBuf;

/// Default segment rotation threshold: 256 MiB.
pub const DEFAULT_ROTATION_THRESHOLD: u64 = 256 * 1024 * 1024;

/// Configuration for a graph-kernel instance
///
/// Holds the data directory layout plus the few knobs the storage core exposes:
/// log rotation threshold and index update mode.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path (default: `.graph-kernel/` in current directory)
    pub data_dir: PathBuf,

    /// Output format: "human" (default) or "json"
    pub output_format: String,

    /// Log level: "info", "debug", "warn", "error" (default: "info")
    pub log_level: String,

    /// Size in bytes after which the active log segment is rotated
    pub rotation_threshold: u64,

    /// Apply index updates directly on each applying thread instead of work-syncing them
    pub parallel_index_apply: bool,
}

impl Config {
    /// Create a new config with defaults
    pub fn new() -> Self {
        let data_dir = env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".graph-kernel");

        Config {
            data_dir,
            output_format: "human".to_string(),
            log_level: "info".to_string(),
            rotation_threshold: DEFAULT_ROTATION_THRESHOLD,
            parallel_index_apply: false,
        }
    }

    /// Create config with custom data directory
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Config {
            data_dir,
            ..Config::new()
        }
    }

    /// Get the data directory path
    pub fn get_data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Set data directory
    pub fn set_data_dir(&mut self, dir: PathBuf) {
        self.data_dir = dir;
    }

    /// Get output format
    pub fn get_output_format(&self) -> &str {
        &self.output_format
    }

    /// Set output format ("human" or "json")
    pub fn set_output_format(&mut self, format: String) {
        self.output_format = format;
    }

    /// Get log level
    pub fn get_log_level(&self) -> &str {
        &self.log_level
    }

    /// Set log level
    pub fn set_log_level(&mut self, level: String) {
        self.log_level = level;
    }

    pub fn set_rotation_threshold(&mut self, bytes: u64) {
        self.rotation_threshold = bytes;
    }

    pub fn set_parallel_index_apply(&mut self, parallel: bool) {
        self.parallel_index_apply = parallel;
    }

    /// Directory holding the transaction log segments
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("txlogs")
    }

    /// Record store snapshot path
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("stores.bin")
    }

    /// Load config from environment variables
    ///
    /// Environment variables:
    /// - `GRAPH_KERNEL_DATA_DIR`: override data directory
    /// - `GRAPH_KERNEL_OUTPUT_FORMAT`: "human" or "json"
    /// - `GRAPH_KERNEL_LOG_LEVEL`: log level
    /// - `GRAPH_KERNEL_ROTATION_THRESHOLD`: rotation threshold in bytes
    /// - `GRAPH_KERNEL_PARALLEL_INDEX_APPLY`: "true" to bypass index work-sync
    pub fn from_env() -> Self {
        let mut config = Config::new();

        if let Ok(dir) = env::var("GRAPH_KERNEL_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(format) = env::var("GRAPH_KERNEL_OUTPUT_FORMAT") {
            config.output_format = format;
        }

        if let Ok(level) = env::var("GRAPH_KERNEL_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(threshold) = env::var("GRAPH_KERNEL_ROTATION_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.rotation_threshold = threshold;
        }

        if let Ok(parallel) = env::var("GRAPH_KERNEL_PARALLEL_INDEX_APPLY") {
            config.parallel_index_apply = matches!(parallel.as_str(), "1" | "true" | "yes");
        }

        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}
