//! JIT Configuration
//!
//! Knobs for the mid-end phases. Configuration can be built programmatically,
//! parsed from TOML, or overridden from environment variables.
//!
//! # Environment Variables
//!
//! All environment variables use the `JITMORPH_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `JITMORPH_OPT_LEVEL` | `minopts` or `full` | `full` |
//! | `JITMORPH_PROFILE` | Profile-driven block weights ("true"/"false") | false |
//! | `JITMORPH_CHECK_FLOW_GRAPH` | Validate the flow graph after each phase | true in debug builds |
//! | `JITMORPH_UTF8_UNROLL_LIMIT` | Max UTF-8 bytes the literal read unrolls | 128 |
//! | `JITMORPH_LOG` | Tracing filter (off/error/warn/info/debug/trace) | warn |
//!
//! # Example
//!
//! ```rust
//! use jitmorph::config::{JitConfig, OptLevel};
//!
//! let config = JitConfig::from_toml_str(
//!     r#"
//!     opt_level = "minopts"
//!
//!     [expansion]
//!     utf8_unroll_limit = 64
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.opt_level, OptLevel::MinOpts);
//! assert_eq!(config.expansion.utf8_unroll_limit, 64);
//!
//! let config = JitConfig::builder().profile_enabled(true).build().unwrap();
//! assert!(config.profile_enabled);
//! ```

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Largest accepted `utf8_unroll_limit`.
pub const MAX_UTF8_UNROLL_LIMIT: u32 = 1024;

/// Optimization level of the compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptLevel {
    /// Minimal optimizations (tier 0, debuggable code).
    MinOpts,
    /// Full optimizations.
    #[default]
    Full,
}

impl OptLevel {
    /// Parse an optimization level from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "minopts" | "min" | "tier0" | "0" => Some(OptLevel::MinOpts),
            "full" | "opt" | "tier1" | "1" => Some(OptLevel::Full),
            _ => None,
        }
    }

    /// Whether optimizations are enabled.
    pub fn opts_enabled(self) -> bool {
        self == OptLevel::Full
    }
}

/// Log level for phase tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// No logging.
    Off,
    /// Error messages only.
    Error,
    /// Warnings and errors (default).
    #[default]
    Warn,
    /// Phase summaries.
    Info,
    /// Expansion decisions.
    Debug,
    /// Tree dumps.
    Trace,
}

impl LogLevel {
    /// Parse a log level from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "none" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to a filter directive.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Escape analysis configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LocalMorphConfig {
    /// Treat a local passed as a hidden return buffer as defined by the call
    /// instead of address-exposed.
    /// Default: true.
    pub retbuf_non_exposing: bool,
}

impl Default for LocalMorphConfig {
    fn default() -> Self {
        Self {
            retbuf_non_exposing: true,
        }
    }
}

/// Helper expansion configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    /// Expand static base / class init helpers.
    pub static_init: bool,
    /// Expand generic dictionary lookups.
    pub runtime_lookup: bool,
    /// Expand thread static base helpers.
    pub thread_local: bool,
    /// Unroll UTF-16 literal to UTF-8 reads.
    pub read_utf8: bool,
    /// Skip calls in rarely run blocks (not applied to runtime lookups).
    pub skip_rarely_run: bool,
    /// Percent of runtime lookups expected to hit a filled slot.
    /// Default: 80.
    pub lookup_null_check_hit_percent: u32,
    /// Percent of runtime lookups expected to pass the size check.
    /// Default: 80.
    pub lookup_size_check_hit_percent: u32,
    /// Maximum UTF-8 length of an unrolled literal read.
    /// Default: 128.
    pub utf8_unroll_limit: u32,
    /// Widest store the unrolled literal read may use, in bytes.
    /// Default: 16 (SSE/NEON).
    pub max_simd_bytes: u32,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            static_init: true,
            runtime_lookup: true,
            thread_local: true,
            read_utf8: true,
            skip_rarely_run: true,
            lookup_null_check_hit_percent: 80,
            lookup_size_check_hit_percent: 80,
            utf8_unroll_limit: 128,
            max_simd_bytes: 16,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `JITMORPH_LOG` is not set.
    /// Default: Warn.
    pub level: LogLevel,
    /// Include the phase span in each line.
    /// Default: true.
    pub show_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            show_spans: true,
        }
    }
}

/// Complete compiler configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    /// Optimization level.
    pub opt_level: OptLevel,
    /// Whether block weights come from profile data and must be kept
    /// consistent after flow graph changes.
    pub profile_enabled: bool,
    /// Validate the flow graph after each phase.
    pub check_flow_graph: bool,
    /// Escape analysis knobs.
    pub local_morph: LocalMorphConfig,
    /// Helper expansion knobs.
    pub expansion: ExpansionConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::Full,
            profile_enabled: false,
            check_flow_graph: cfg!(debug_assertions),
            local_morph: LocalMorphConfig::default(),
            expansion: ExpansionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl JitConfig {
    /// Create a new builder for JitConfig.
    pub fn builder() -> JitConfigBuilder {
        JitConfigBuilder::new()
    }

    /// Parse configuration from TOML text; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: JitConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load configuration from environment variables over the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `JITMORPH_*` environment variables.
    ///
    /// Variables that are unset or fail to parse leave the field unchanged.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| env::var(name).ok());
    }

    /// Override fields from a variable lookup function.
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup("JITMORPH_OPT_LEVEL").and_then(|v| OptLevel::from_str(&v)) {
            self.opt_level = level;
        }

        if let Some(val) = lookup("JITMORPH_PROFILE").and_then(|v| parse_bool(&v)) {
            self.profile_enabled = val;
        }

        if let Some(val) = lookup("JITMORPH_CHECK_FLOW_GRAPH").and_then(|v| parse_bool(&v)) {
            self.check_flow_graph = val;
        }

        if let Some(val) = lookup("JITMORPH_UTF8_UNROLL_LIMIT").and_then(|v| v.parse::<u32>().ok()) {
            if val <= MAX_UTF8_UNROLL_LIMIT {
                self.expansion.utf8_unroll_limit = val;
            }
        }

        if let Some(level) = lookup("JITMORPH_LOG").and_then(|v| LogLevel::from_str(&v)) {
            self.logging.level = level;
        }
    }

    /// Validate the configuration and return the first error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.expansion;
        for (field, value) in [
            ("expansion.lookup_null_check_hit_percent", e.lookup_null_check_hit_percent),
            ("expansion.lookup_size_check_hit_percent", e.lookup_size_check_hit_percent),
        ] {
            if value > 100 {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    message: "must be a percentage (0-100)".into(),
                });
            }
        }

        if e.utf8_unroll_limit > MAX_UTF8_UNROLL_LIMIT {
            return Err(ConfigError::InvalidValue {
                field: "expansion.utf8_unroll_limit".into(),
                message: format!("must be at most {}", MAX_UTF8_UNROLL_LIMIT),
            });
        }

        if !matches!(e.max_simd_bytes, 8 | 16 | 32) {
            return Err(ConfigError::InvalidValue {
                field: "expansion.max_simd_bytes".into(),
                message: "must be 8, 16 or 32".into(),
            });
        }

        Ok(())
    }
}

/// Builder for JitConfig.
#[derive(Debug, Clone, Default)]
pub struct JitConfigBuilder {
    config: JitConfig,
}

impl JitConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the optimization level.
    pub fn opt_level(mut self, level: OptLevel) -> Self {
        self.config.opt_level = level;
        self
    }

    /// Enable or disable profile-driven weights.
    pub fn profile_enabled(mut self, enabled: bool) -> Self {
        self.config.profile_enabled = enabled;
        self
    }

    /// Enable or disable post-phase flow graph validation.
    pub fn check_flow_graph(mut self, enabled: bool) -> Self {
        self.config.check_flow_graph = enabled;
        self
    }

    /// Set hidden return buffer handling.
    pub fn retbuf_non_exposing(mut self, enabled: bool) -> Self {
        self.config.local_morph.retbuf_non_exposing = enabled;
        self
    }

    /// Replace the whole expansion configuration.
    pub fn expansion(mut self, expansion: ExpansionConfig) -> Self {
        self.config.expansion = expansion;
        self
    }

    /// Set the UTF-8 unroll limit.
    pub fn utf8_unroll_limit(mut self, limit: u32) -> Self {
        self.config.expansion.utf8_unroll_limit = limit;
        self
    }

    /// Skip or expand calls in rarely run blocks.
    pub fn skip_rarely_run(mut self, skip: bool) -> Self {
        self.config.expansion.skip_rarely_run = skip;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Build the configuration, validating it.
    pub fn build(self) -> Result<JitConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build without validation.
    pub fn build_unchecked(self) -> JitConfig {
        self.config
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
