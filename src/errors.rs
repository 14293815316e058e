//! Error Types
//!
//! This module defines the error types used throughout the pipeline.
//!
//! # Overview
//!
//! The main error type [`PipelineError`] falls into three groups:
//! - **Structural** errors (missing / cyclic pass dependencies, duplicate
//!   registrations) abort pipeline construction and are surfaced to the host
//!   immediately.
//! - **Transient** errors ([`PipelineError::TargetNotReady`]) only affect a
//!   single pass for a single frame; the frame driver logs them and skips the
//!   pass.
//! - **Misuse** errors (pool double-acquire / use-after-release, unknown
//!   properties) are programming errors and are never silently ignored.
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, PipelineError>`.
//!
//! ```rust,ignore
//! use lustre::errors::{PipelineError, Result};
//!
//! fn build() -> Result<()> {
//!     pipeline.add_plugin(BloomPlugin::new())?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The main error type for the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    // ========================================================================
    // Pass Graph Errors
    // ========================================================================
    /// A pass declares a `required` name that no registered pass carries.
    #[error("Pass '{pass}' requires '{missing}', which is not registered")]
    MissingDependency {
        /// The pass that declared the requirement
        pass: String,
        /// The name that could not be found
        missing: String,
    },

    /// The `before` / `after` constraints form a cycle.
    #[error("Cyclic pass dependency between: {}", passes.join(", "))]
    CyclicDependency {
        /// Passes participating in (or trapped between) cycles, in registration order
        passes: Vec<String>,
    },

    /// A pass with the same name is already registered.
    #[error("Pass '{0}' is already registered")]
    DuplicatePass(String),

    /// No pass with this name is registered.
    #[error("Pass '{0}' is not registered")]
    UnknownPass(String),

    // ========================================================================
    // Per-frame Errors
    // ========================================================================
    /// A persistent target the pass reads from has not been created yet.
    #[error("Pass '{pass}' skipped: target '{target}' is not ready")]
    TargetNotReady {
        /// The pass that tried to render
        pass: String,
        /// The missing target name
        target: String,
    },

    // ========================================================================
    // Render Target Pool Errors
    // ========================================================================
    /// A pooled target was handed out while still checked out.
    #[error("Render target {0} is already checked out")]
    DoubleAcquire(String),

    /// A pooled target was used or released after it was returned to the pool.
    #[error("Render target {0} was used after release")]
    UseAfterRelease(String),

    /// The target does not belong to the pool.
    #[error("Render target {0} is not owned by the pool")]
    UnknownTarget(String),

    // ========================================================================
    // Plugin Errors
    // ========================================================================
    /// A plugin was added before one of its declared dependencies.
    #[error("Plugin '{plugin}' depends on '{dependency}', which is not added")]
    MissingPlugin {
        /// Plugin being added
        plugin: String,
        /// Dependency plugin type
        dependency: String,
    },

    /// A plugin of this type is already added.
    #[error("Plugin '{0}' is already added")]
    DuplicatePlugin(String),

    /// No plugin with this name is added.
    #[error("Plugin '{0}' is not added")]
    UnknownPlugin(String),

    // ========================================================================
    // Property Errors
    // ========================================================================
    /// The property name is not declared by the owner.
    #[error("Unknown property '{0}'")]
    UnknownProperty(String),

    /// The value kind does not match the declared property kind.
    #[error("Property '{name}' expects {expected}")]
    PropertyType {
        /// Property name
        name: String,
        /// Human readable kind
        expected: &'static str,
    },

    /// The value is outside the declared range.
    #[error("Property '{name}' = {value} is outside [{min}, {max}]")]
    PropertyOutOfRange {
        /// Property name
        name: String,
        /// Offending value
        value: f64,
        /// Range minimum
        min: f64,
        /// Range maximum
        max: f64,
    },
}

impl PipelineError {
    /// Returns `true` for errors that only affect the current frame.
    ///
    /// The frame driver skips the offending pass and keeps rendering the
    /// rest of the pipeline for these.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TargetNotReady { .. })
    }

    /// Returns `true` for errors that make the pass ordering invalid.
    #[inline]
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::MissingDependency { .. }
                | Self::CyclicDependency { .. }
                | Self::DuplicatePass(_)
                | Self::MissingPlugin { .. }
        )
    }
}

/// Alias for `Result<T, PipelineError>`.
pub type Result<T> = std::result::Result<T, PipelineError>;
