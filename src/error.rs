//! Error types for kubesmith.
//!
//! This module defines the error types used throughout kubesmith, providing
//! rich error information for debugging and user feedback.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kubesmith operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for kubesmith.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Playbook Errors
    // ========================================================================
    /// Error parsing a playbook file.
    #[error("Failed to parse playbook '{path}': {message}")]
    PlaybookParse {
        /// Path to the playbook file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Error validating playbook structure.
    #[error("Playbook validation failed: {0}")]
    PlaybookValidation(String),

    /// A play resolved to an empty host list.
    #[error("Play '{0}' resolved to an empty host list")]
    EmptyHosts(String),

    // ========================================================================
    // Task Errors
    // ========================================================================
    /// Task execution failed on at least one host.
    #[error("Task '{0}' run failed")]
    TaskFailed(String),

    /// No module could be detected for a task.
    #[error("No module/action detected in task: '{0}'")]
    NoModuleDetected(String),

    // ========================================================================
    // Module Errors
    // ========================================================================
    /// Module not found in the registry.
    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    /// Invalid module arguments.
    #[error("Invalid arguments for module '{module}': {message}")]
    ModuleArgs {
        /// Module name
        module: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Variable Store Errors
    // ========================================================================
    /// Missing or mistyped variable.
    #[error("Variable error: {0}")]
    Variable(String),

    /// A persisted host record had an unexpected shape.
    #[error("Invalid host record for '{host}': {message}")]
    InvalidHostRecord {
        /// Host the record belongs to
        host: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Template Errors
    // ========================================================================
    /// Template rendering error.
    #[error("Template rendering failed for '{template}': {message}")]
    TemplateRender {
        /// The template source (truncated)
        template: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Inventory Errors
    // ========================================================================
    /// Error loading the inventory.
    #[error("Failed to load inventory from '{path}': {message}")]
    InventoryLoad {
        /// Path to inventory
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Invalid host pattern.
    #[error("Invalid host pattern: '{0}'")]
    InvalidHostPattern(String),

    // ========================================================================
    // Connector Errors
    // ========================================================================
    /// Failed to reach or drive a host through its connector.
    #[error("Connector error for '{host}': {message}")]
    Connector {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// The connector does not implement the requested capability.
    #[error("Connector for '{host}' does not support {capability}")]
    UnsupportedCapability {
        /// Target host
        host: String,
        /// Capability name (e.g. "fact gathering")
        capability: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// Variable source backend failure.
    #[error("Variable source error: {0}")]
    Source(String),

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Template engine error.
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new playbook parse error.
    pub fn playbook_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PlaybookParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new module args error.
    pub fn module_args(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModuleArgs {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Creates a new connector error.
    pub fn connector(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connector {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new template render error, truncating long template sources.
    pub fn template_render(template: &str, message: impl Into<String>) -> Self {
        let mut template = template.to_string();
        if template.len() > 80 {
            template.truncate(77);
            template.push_str("...");
        }
        Self::TemplateRender {
            template,
            message: message.into(),
        }
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::TaskFailed(_) | Error::ModuleNotFound(_) | Error::ModuleArgs { .. } => 2,
            Error::Connector { .. } | Error::UnsupportedCapability { .. } => 3,
            Error::PlaybookParse { .. }
            | Error::PlaybookValidation(_)
            | Error::NoModuleDetected(_) => 4,
            Error::InventoryLoad { .. } | Error::InvalidHostPattern(_) | Error::EmptyHosts(_) => 5,
            _ => 1,
        }
    }
}
