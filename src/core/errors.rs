//! RQS-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, RqsError>;

/// Top-level error type for the re-query simulator.
#[derive(Debug, Error)]
pub enum RqsError {
    #[error("[RQS-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[RQS-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[RQS-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[RQS-1101] invalid replacement policy {name:?}: {details}")]
    InvalidPolicy { name: String, details: String },

    #[error("[RQS-1102] invalid scoring method {name:?}")]
    InvalidScoring { name: String },

    #[error("[RQS-2001] invalid evidence store {context}: {details}")]
    InvalidStore { context: String, details: String },

    #[error("[RQS-2002] no evidence available for {item}")]
    DataUnavailable { item: String },

    #[error("[RQS-2003] degenerate numeric state in {context}: {details}")]
    NumericDegenerate {
        context: &'static str,
        details: String,
    },

    #[error("[RQS-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[RQS-2102] result merge conflict: {details}")]
    MergeConflict { details: String },

    #[error("[RQS-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[RQS-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[RQS-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl RqsError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "RQS-1001",
            Self::MissingConfig { .. } => "RQS-1002",
            Self::ConfigParse { .. } => "RQS-1003",
            Self::InvalidPolicy { .. } => "RQS-1101",
            Self::InvalidScoring { .. } => "RQS-1102",
            Self::InvalidStore { .. } => "RQS-2001",
            Self::DataUnavailable { .. } => "RQS-2002",
            Self::NumericDegenerate { .. } => "RQS-2003",
            Self::Serialization { .. } => "RQS-2101",
            Self::MergeConflict { .. } => "RQS-2102",
            Self::Io { .. } => "RQS-3002",
            Self::ChannelClosed { .. } => "RQS-3003",
            Self::Runtime { .. } => "RQS-3900",
        }
    }

    /// Whether the failure only invalidates the trial that raised it.
    ///
    /// Trial-local failures are recorded as dropped trials; everything else
    /// aborts the invocation.
    #[must_use]
    pub const fn is_trial_local(&self) -> bool {
        matches!(
            self,
            Self::DataUnavailable { .. } | Self::NumericDegenerate { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn degenerate(context: &'static str, details: impl Into<String>) -> Self {
        Self::NumericDegenerate {
            context,
            details: details.into(),
        }
    }

    pub(crate) fn store(context: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidStore {
            context: context.into(),
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for RqsError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for RqsError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
