// Configuration management for halgraph

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::indexer::parser::ExtractionLimits;

/// Name of the per-project configuration file
pub const CONFIG_FILE_NAME: &str = ".halgraph.toml";

/// Top-level modules of the Python standard library. Imports rooted here are
/// treated as external rather than hallucinated.
pub const PYTHON_STDLIB_MODULES: &[&str] = &[
    "__future__", "abc", "argparse", "array", "ast", "asyncio", "atexit", "base64", "binascii",
    "bisect", "builtins", "bz2", "calendar", "cmath", "codecs", "collections", "concurrent",
    "configparser", "contextlib", "contextvars", "copy", "copyreg", "csv", "ctypes", "dataclasses",
    "datetime", "decimal", "difflib", "dis", "email", "enum", "errno", "fnmatch", "fractions",
    "functools", "gc", "getpass", "gettext", "glob", "gzip", "hashlib", "heapq", "hmac", "html",
    "http", "importlib", "inspect", "io", "ipaddress", "itertools", "json", "keyword", "locale",
    "logging", "lzma", "math", "mimetypes", "multiprocessing", "numbers", "operator", "os",
    "pathlib", "pickle", "platform", "pprint", "queue", "random", "re", "secrets", "select",
    "selectors", "shlex", "shutil", "signal", "socket", "sqlite3", "ssl", "stat", "statistics",
    "string", "struct", "subprocess", "sys", "sysconfig", "tarfile", "tempfile", "textwrap",
    "threading", "time", "timeit", "tkinter", "token", "tokenize", "traceback", "types", "typing",
    "unicodedata", "unittest", "urllib", "uuid", "warnings", "weakref", "xml", "zipfile", "zlib",
    "zoneinfo",
];

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub extraction: ExtractionConfig,
    pub validation: ValidationConfig,
    pub performance: PerformanceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    /// Wall-clock budget for one file, in milliseconds
    pub file_timeout_ms: u64,
    pub max_nesting_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Import roots reported as external instead of hallucinated
    pub external_allowlist: Vec<String>,
    pub max_inheritance_depth: usize,
    /// Subclass plus import count from which a class counts as well known
    pub well_known_threshold: usize,
    pub max_suggestion_distance: usize,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Extraction worker threads, 0 for one per CPU
    pub threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".halgraph/graph.db"),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            exclude: vec![
                ".git/".to_string(),
                ".venv/".to_string(),
                "venv/".to_string(),
                "__pycache__/".to_string(),
                "node_modules/".to_string(),
                ".tox/".to_string(),
                "build/".to_string(),
            ],
            include: vec![],
            file_timeout_ms: 5000,
            max_nesting_depth: 100,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            external_allowlist: PYTHON_STDLIB_MODULES.iter().map(|m| m.to_string()).collect(),
            max_inheritance_depth: 16,
            well_known_threshold: 3,
            max_suggestion_distance: 2,
            timeout_ms: 10_000,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { threads: 0 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl ExtractionConfig {
    pub fn limits(&self) -> ExtractionLimits {
        ExtractionLimits {
            max_nesting_depth: self.max_nesting_depth,
            file_timeout: Duration::from_millis(self.file_timeout_ms),
        }
    }

    /// Check if a file path should be extracted based on include/exclude patterns
    pub fn should_extract_file(&self, file_path: &str) -> bool {
        // Check exclude patterns first
        if self.exclude.iter().any(|p| matches_pattern(file_path, p)) {
            return false;
        }

        // If include patterns are specified, file must match at least one
        if !self.include.is_empty() {
            return self.include.iter().any(|p| matches_pattern(file_path, p));
        }

        true
    }
}

impl ValidationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether an absolute module path is rooted in an allow-listed package
    pub fn is_external(&self, module: &str) -> bool {
        let root = module.split('.').next().unwrap_or(module);
        self.external_allowlist.iter().any(|allowed| allowed == root || allowed == module)
    }
}

impl PerformanceConfig {
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.threads
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from project directory
    /// Looks for .halgraph.toml in the project root
    pub fn from_project_dir<P: AsRef<Path>>(project_dir: P) -> Self {
        let config_path = project_dir.as_ref().join(CONFIG_FILE_NAME);

        match Self::from_file(&config_path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", config_path.display());
                config
            }
            Err(e) => {
                tracing::debug!("Could not load config from {}: {}", config_path.display(), e);
                tracing::debug!("Using default configuration");
                Self::default()
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.db_path.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Database path cannot be empty"));
        }

        // Validate extraction settings
        if self.extraction.file_timeout_ms == 0 {
            return Err(anyhow::anyhow!("File timeout must be greater than 0"));
        }
        if self.extraction.max_nesting_depth == 0 {
            return Err(anyhow::anyhow!("Max nesting depth must be greater than 0"));
        }

        // Validate validation settings
        if self.validation.max_inheritance_depth == 0 {
            return Err(anyhow::anyhow!("Max inheritance depth must be greater than 0"));
        }
        if self.validation.timeout_ms == 0 {
            return Err(anyhow::anyhow!("Validation timeout must be greater than 0"));
        }

        // Validate logging
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level));
        }
        let valid_formats = ["compact", "pretty", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!("Invalid log format: {}", self.logging.format));
        }

        Ok(())
    }
}

/// Simple glob-style pattern matching against a `/` separated relative path
fn matches_pattern(file_path: &str, pattern: &str) -> bool {
    if let Some(dir) = pattern.strip_suffix('/') {
        // Directory pattern
        file_path.starts_with(pattern) || file_path.contains(&format!("/{}/", dir))
    } else if let Some(rest) = pattern.strip_prefix("**/") {
        // Recursive pattern like **/tests/**
        let inner = rest.trim_end_matches("/**");
        file_path.starts_with(&format!("{}/", inner))
            || file_path.contains(&format!("/{}/", inner))
            || file_path.ends_with(&format!("/{}", inner))
    } else if let Some(suffix) = pattern.strip_prefix('*') {
        // File pattern like *.pyi or *_test.py
        file_path.ends_with(suffix)
    } else {
        // Exact match or prefix
        file_path == pattern || file_path.starts_with(&format!("{}/", pattern.trim_end_matches('/')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.extraction.exclude.contains(&".git/".to_string()));
        assert_eq!(config.validation.max_suggestion_distance, 2);
        assert!(config.validation.is_external("os.path"));
        assert!(!config.validation.is_external("requests"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_should_extract_file() {
        let config = Config::default();

        // Should extract normal files
        assert!(config.extraction.should_extract_file("pkg/cache.py"));

        // Should exclude specified patterns
        assert!(!config.extraction.should_extract_file(".venv/lib/site.py"));
        assert!(!config.extraction.should_extract_file("pkg/__pycache__/cache.py"));
    }

    #[test]
    fn test_include_patterns() {
        let mut config = Config::default();
        config.extraction.include = vec!["src/".to_string()];

        assert!(config.extraction.should_extract_file("src/app.py"));
        assert!(!config.extraction.should_extract_file("scripts/run.py"));
    }

    #[test]
    fn test_pattern_matching() {
        // Directory patterns
        assert!(matches_pattern("build/lib/file.py", "build/"));
        assert!(matches_pattern("pkg/build/file.py", "build/"));
        assert!(!matches_pattern("pkg/builder.py", "build/"));

        // Extension patterns
        assert!(matches_pattern("pkg/stub.pyi", "*.pyi"));
        assert!(!matches_pattern("pkg/stub.py", "*.pyi"));

        // Recursive patterns
        assert!(matches_pattern("src/tests/test_app.py", "**/tests/**"));
        assert!(matches_pattern("tests/test_app.py", "**/tests/**"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[validation]\nwell_known_threshold = 5\n").unwrap();
        assert_eq!(config.validation.well_known_threshold, 5);
        assert_eq!(config.validation.max_inheritance_depth, 16);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        config.extraction.file_timeout_ms = 0;
        assert!(config.validate().is_err());
        config.extraction.file_timeout_ms = 5000;

        config.validation.max_inheritance_depth = 0;
        assert!(config.validate().is_err());
        config.validation.max_inheritance_depth = 16;

        // Test invalid log level
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "info".to_string();

        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }
}
