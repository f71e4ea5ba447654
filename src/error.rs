//! Error types for the cross-section extraction

use thiserror::Error;

/// Analysis error type
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or unimplemented configuration; raised before any event is processed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Sideband template fit failed in one universe
    #[error("Fit error in universe {universe}: {reason}")]
    Fit { universe: String, reason: String },

    /// Unfolding failed for one variable
    #[error("Unfolding error for {variable}: {reason}")]
    Unfold { variable: String, reason: String },

    /// Binary operation over bundles with different registered universes
    #[error("Error band mismatch: {left:?} vs {right:?}")]
    MissingErrorBands {
        left: Vec<String>,
        right: Vec<String>,
    },

    /// Bundle read by a downstream stage before being synced
    #[error("Histogram {0} was filled after its last sync")]
    Unsynced(String),

    /// Incompatible binning
    #[error("Binning error: {0}")]
    Binning(String),

    /// Named object or variable not found
    #[error("Lookup error: {0}")]
    Lookup(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Tabular input/output error
    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
