use std::path::{Path, PathBuf};
use tracing::info;

pub mod app;
pub mod area;
pub mod config;
pub mod crs;
pub mod error;
pub mod geometry;
pub mod hydrology;
pub mod io;
pub mod pipeline;
pub mod reserve;
pub mod rules;
pub mod validator;

pub use app::{compute_app, AppBufferEngine, AppContribution, AppGeometry, AppKind};
pub use area::AreaSummary;
pub use config::EngineConfig;
pub use crs::{Crs, PlanarFrame, UtmZone};
pub use error::{
    DataQualityWarning, Error, GeometryConstructionError, InputError, LegalConstraintError, Result,
};
pub use hydrology::{classify, AttributeValue, HydroFeature, HydrologyClassifier, Provenance, RawFeature};
pub use pipeline::{OutputLayer, Pipeline, PipelineInput, PipelineOutput, PropertyInfo};
pub use reserve::{compute_reserve_legal, ReserveCondition, ReserveLegalAllocator, ReserveLegalGeometry};
pub use rules::{Biome, BufferRule};
pub use validator::{validate, GeometryValidator, ValidPerimeter};

/// Per-run inputs of the file-level entry points.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub perimeter: PathBuf,
    pub hydrology: Option<PathBuf>,
    pub biome: String,
    /// Overrides the CRS declared in the perimeter file.
    pub crs: Option<Crs>,
    pub property: PropertyInfo,
}

/// Loads the input files and runs the pipeline.
///
/// The perimeter CRS is, in order: `options.crs`, the CRS declared in the
/// file, WGS 84. Hydrology must be in the same CRS.
pub fn process_file(options: &RunOptions, config: EngineConfig) -> Result<PipelineOutput> {
    let (perimeter, declared) = io::load_perimeter(&options.perimeter)?;
    let crs = options.crs.or(declared).unwrap_or_else(Crs::wgs84);
    info!("Perimeter CRS: {}", crs);

    let mut input = PipelineInput::new(perimeter, crs, &options.biome).with_property(options.property.clone());
    let mut unreadable = Vec::new();
    if let Some(path) = &options.hydrology {
        let loaded = io::load_features(path)?;
        if let Some(hydro_crs) = loaded.crs {
            if hydro_crs != crs {
                return Err(InputError::UnknownCrs(format!(
                    "CRS mismatch: hydrology is in {hydro_crs}, perimeter in {crs}"
                ))
                .into());
            }
        }
        unreadable = loaded
            .rejected
            .into_iter()
            .map(|(index, e)| DataQualityWarning::FeatureSkipped {
                index,
                reason: format!("unreadable in {}: {}", path.display(), e),
            })
            .collect();
        input = input.with_hydrology(loaded.features);
    }

    let mut output = Pipeline::new(config).run(input)?;
    unreadable.append(&mut output.warnings);
    output.warnings = unreadable;
    Ok(output)
}

/// Runs [`process_file`] and writes the layers and report to `output_dir`.
pub fn process_files(
    options: &RunOptions,
    config: EngineConfig,
    output_dir: &Path,
) -> Result<(PipelineOutput, Vec<PathBuf>)> {
    let output = process_file(options, config)?;
    let written = io::write_layers(&output, output_dir)?;
    Ok((output, written))
}
