//! Engine tunables.
//!
//! Every field has a default, so a config file only needs the values it
//! overrides.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hydrology features farther than this from the perimeter are pruned.
    pub search_radius_m: f64,
    /// Upper bound on features handed to the buffer engine.
    pub max_candidate_features: usize,
    /// Heuristic springs must lie within this distance of the perimeter.
    pub spring_search_m: f64,
    /// Candidate springs closer than this to an accepted one are merged.
    pub spring_dedup_m: f64,
    /// A line start within this distance of another line counts as continued.
    pub endpoint_tolerance_m: f64,
    /// First/last vertex distance under which a ring counts as closed, in
    /// source CRS units.
    pub closure_epsilon: f64,
    pub min_area_m2: f64,
    /// Legal minimum property size; smaller perimeters only raise a warning.
    pub legal_min_area_m2: f64,
    pub max_vertices: usize,
    /// Vertices per quarter circle when approximating arcs.
    pub quadrant_segments: usize,
    pub snap_tolerance_m: f64,
    /// Relative tolerance on the Reserva Legal area target.
    pub reserve_tolerance: f64,
    pub fiscal_module_ha: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_radius_m: 2000.0,
            max_candidate_features: 5000,
            spring_search_m: 100.0,
            spring_dedup_m: 50.0,
            endpoint_tolerance_m: 1.0,
            closure_epsilon: 1e-9,
            min_area_m2: 1.0,
            legal_min_area_m2: 2500.0,
            max_vertices: 1000,
            quadrant_segments: 16,
            snap_tolerance_m: 0.001,
            reserve_tolerance: 0.01,
            fiscal_module_ha: 16.0,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
