//! Error types for the mid-end phases.
//!
//! Internal consistency failures abort the compilation of the current method
//! with a [`JitError`]. Declined optimizations are not errors: the phases
//! report them through `Ok(None)` and a `debug!` trace.

use std::path::PathBuf;

use thiserror::Error;

use crate::ir::{BlockId, EhRegionId, NodeId, SigHandle, StmtId};

/// Result alias for phase operations.
pub type JitResult<T> = Result<T, JitError>;

/// Internal consistency failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JitError {
    /// The escape analyzer finished a statement with values left on its stack.
    #[error("{depth} value(s) left on the analysis stack after {stmt}")]
    UnconsumedValue { stmt: StmtId, depth: usize },

    /// The flow graph violates a structural invariant.
    #[error("inconsistent flow graph at {block}: {detail}")]
    InconsistentCfg { block: BlockId, detail: String },

    /// A phase met an operator it cannot handle in this position.
    #[error("unsupported operator {oper} at {node}")]
    UnsupportedOperator { node: NodeId, oper: &'static str },

    /// A block created by an expansion ended up in the wrong EH region.
    #[error("{block} is in EH region {found:?}, expected {expected:?}")]
    EhRegionMismatch {
        block: BlockId,
        expected: Option<EhRegionId>,
        found: Option<EhRegionId>,
    },

    /// A runtime lookup candidate has no recipe registered for its signature.
    #[error("no runtime lookup recipe for signature {signature:#x}")]
    MissingLookupRecipe { signature: u64 },

    /// Post-phase validation found errors.
    #[error("flow graph validation failed:\n{}", .0.join("\n"))]
    Validation(Vec<String>),
}

impl JitError {
    /// Missing recipe for a signature handle.
    pub fn missing_recipe(signature: SigHandle) -> Self {
        JitError::MissingLookupRecipe {
            signature: signature.0,
        }
    }
}

/// Errors while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration text is not valid TOML for [`JitConfig`](crate::config::JitConfig).
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of its allowed range.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = JitError::UnconsumedValue {
            stmt: StmtId::new(3),
            depth: 2,
        };
        assert_eq!(
            err.to_string(),
            "2 value(s) left on the analysis stack after STMT03"
        );

        let err = JitError::missing_recipe(SigHandle(0x40));
        assert_eq!(err.to_string(), "no runtime lookup recipe for signature 0x40");
    }

    #[test]
    fn test_validation_error_lists_all() {
        let err = JitError::Validation(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "flow graph validation failed:\na\nb");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            field: "expansion.utf8_unroll_limit".into(),
            message: "must be at most 1024".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration for 'expansion.utf8_unroll_limit': must be at most 1024"
        );
    }
}
