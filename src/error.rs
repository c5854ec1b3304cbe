use std::path::PathBuf;

use thiserror::Error;

/// Conditions that abort a run. Everything else degrades with a log line.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("Tabular input not found at {0:?}; generate the consolidated CSV before running")]
    MissingTable(PathBuf),
    #[error("No boundary file found: provide {state:?} or a nationwide file at {national:?}")]
    MissingGeometry { state: PathBuf, national: PathBuf },
    #[error("Nationwide boundary file {path:?} has no '{column}' attribute; provide a file already restricted to the state")]
    MissingRegionColumn { path: PathBuf, column: String },
    #[error("Cannot reconcile: no usable join key (neither code nor name columns on both sides)")]
    NoJoinKey,
    #[error("Unsupported output format for {0:?}; use .shp, .geojson or .json")]
    UnsupportedOutput(PathBuf),
    #[error("Feature {index} has a {kind} geometry; only polygon layers can be written")]
    UnsupportedShape { index: usize, kind: String },
}
