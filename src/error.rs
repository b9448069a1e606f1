//! Error taxonomy for the CAR generator.
//!
//! Fatal conditions are `Error` values and abort the run before any output is
//! produced. Non-fatal conditions are collected as [`DataQualityWarning`]s
//! and reported next to the output.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Malformed or unusable input. Always fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("unknown or unsupported CRS: {0}")]
    UnknownCrs(String),

    #[error("degenerate area: {area_m2:.4} m² is below the minimum of {min_m2} m²")]
    DegenerateArea { area_m2: f64, min_m2: f64 },

    #[error("unknown biome '{0}' (expected MATA_ATLANTICA, CERRADO or AMAZONIA)")]
    UnknownBiome(String),

    #[error("no perimeter polygon found in input")]
    NoPerimeter,
}

/// A single feature could not be turned into a buffer.
///
/// The feature is skipped and the run continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryConstructionError {
    #[error("zero-length centerline")]
    ZeroLengthCenterline,

    #[error("non-finite coordinate ({x}, {y})")]
    NonFiniteCoordinate { x: f64, y: f64 },

    #[error("degenerate outline: {0}")]
    DegenerateOutline(String),
}

/// The statutory constraints cannot be met for this property.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LegalConstraintError {
    #[error(
        "insufficient area for Reserva Legal: {required_ha:.4} ha required, \
         only {available_ha:.4} ha available outside APP"
    )]
    InsufficientArea { required_ha: f64, available_ha: f64 },
}

/// Main error type for a pipeline run.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    LegalConstraint(#[from] LegalConstraintError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A non-fatal condition a human reviewer should see before filing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityWarning {
    MultiPartPerimeter { parts: usize },
    PerimeterSimplified { from: usize, to: usize },
    BelowLegalMinimumArea { area_m2: f64, minimum_m2: f64 },
    NoHydrologySource,
    NoNearbyHydrology { received: usize },
    CandidateLimitReached { kept: usize, dropped: usize },
    UnsupportedHydrologyGeometry { index: usize, geometry: String },
    WidthDefaulted { index: usize, width_m: f64 },
    HeuristicSprings { count: usize },
    FeatureSkipped { index: usize, reason: String },
    ReserveFragmented { parts: usize },
    ReserveIncomplete { area_m2: f64, required_m2: f64 },
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MultiPartPerimeter { parts } => {
                write!(f, "perimeter had {parts} parts, only the largest was kept")
            }
            Self::PerimeterSimplified { from, to } => {
                write!(f, "perimeter simplified from {from} to {to} vertices")
            }
            Self::BelowLegalMinimumArea { area_m2, minimum_m2 } => write!(
                f,
                "property area {area_m2:.0} m² is below the legal minimum of {minimum_m2:.0} m²"
            ),
            Self::NoHydrologySource => {
                write!(f, "no hydrology source available, APP could not be derived")
            }
            Self::NoNearbyHydrology { received } => write!(
                f,
                "none of the {received} hydrology features lie within the search radius"
            ),
            Self::CandidateLimitReached { kept, dropped } => write!(
                f,
                "hydrology candidate limit reached: kept the {kept} nearest, dropped {dropped}"
            ),
            Self::UnsupportedHydrologyGeometry { index, geometry } => {
                write!(f, "hydrology feature {index}: unsupported geometry {geometry}")
            }
            Self::WidthDefaulted { index, width_m } => write!(
                f,
                "hydrology feature {index}: unknown river width, assumed {width_m} m (smallest bracket)"
            ),
            Self::HeuristicSprings { count } => write!(
                f,
                "{count} spring(s) inferred from line endpoints, verify in the field"
            ),
            Self::FeatureSkipped { index, reason } => {
                write!(f, "hydrology feature {index} skipped: {reason}")
            }
            Self::ReserveFragmented { parts } => write!(
                f,
                "Reserva Legal split into {parts} parts, no contiguous region fits the requirement"
            ),
            Self::ReserveIncomplete { area_m2, required_m2 } => write!(
                f,
                "Reserva Legal of {:.4} ha misses the required {:.4} ha, review manually",
                area_m2 / 10_000.0,
                required_m2 / 10_000.0
            ),
        }
    }
}
