//! APP Buffer Engine.
//!
//! Each classified feature gets the statutory buffer for its class and
//! bracket. Buffers are clipped to the property, merged into one geometry and
//! snapped to a fine grid so shared edges do not leave slivers.

use geo::{Area, BooleanOps, Coord, Intersects, MultiPolygon, Polygon, RemoveRepeatedPoints};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{DataQualityWarning, GeometryConstructionError};
use crate::geometry::{self, buffer_line, buffer_polygon, circle, multi, snap, union_all};
use crate::hydrology::{HydroFeature, Provenance};
use crate::validator::ValidPerimeter;

/// APP class as written in the cadastre `tip_app` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppKind {
    MargemCursoDagua,
    Nascente,
    LagoLagoa,
}

impl AppKind {
    pub fn of(feature: &HydroFeature) -> Self {
        match feature {
            HydroFeature::River { .. } => AppKind::MargemCursoDagua,
            HydroFeature::Spring { .. } => AppKind::Nascente,
            HydroFeature::WaterBody { .. } => AppKind::LagoLagoa,
        }
    }

    pub fn tip_app(&self) -> &'static str {
        match self {
            AppKind::MargemCursoDagua => "MARGEM_CURSO_DAGUA",
            AppKind::Nascente => "NASCENTE",
            AppKind::LagoLagoa => "LAGO_LAGOA",
        }
    }

    fn code_prefix(&self) -> &'static str {
        match self {
            AppKind::MargemCursoDagua => "APP_MARGEM",
            AppKind::Nascente => "APP_NASC",
            AppKind::LagoLagoa => "APP_LAGO",
        }
    }
}

/// One feature's share of the APP, before merging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppContribution {
    pub cod_app: String,
    pub kind: AppKind,
    pub feature_index: usize,
    pub buffer_m: f64,
    pub area_m2: f64,
    pub provenance: Provenance,
    #[serde(skip)]
    pub geometry: MultiPolygon<f64>,
}

/// Merged APP of a property, contained in its perimeter.
#[derive(Debug, Clone, PartialEq)]
pub struct AppGeometry {
    pub geometry: MultiPolygon<f64>,
    pub contributions: Vec<AppContribution>,
}

impl AppGeometry {
    pub fn empty() -> Self {
        Self {
            geometry: geometry::empty(),
            contributions: Vec::new(),
        }
    }

    pub fn area_m2(&self) -> f64 {
        self.geometry.unsigned_area()
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.0.is_empty()
    }

    /// The APP class of a merged part: the first class, in statutory order,
    /// whose buffers touch it.
    pub fn kind_of(&self, part: &Polygon<f64>) -> Option<AppKind> {
        self.contributions
            .iter()
            .filter(|c| c.geometry.intersects(part))
            .map(|c| c.kind)
            .min()
    }
}

pub struct AppBufferEngine<'a> {
    config: &'a EngineConfig,
}

impl<'a> AppBufferEngine<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Buffers, merges and clips `features` to `perimeter`.
    ///
    /// Degenerate features are skipped with a warning.
    pub fn compute_app(
        &self,
        features: &[HydroFeature],
        perimeter: &ValidPerimeter,
        warnings: &mut Vec<DataQualityWarning>,
    ) -> AppGeometry {
        if features.is_empty() {
            debug!("No hydrology features, APP is empty");
            return AppGeometry::empty();
        }

        let boundary = perimeter.as_multi();
        let mut counters = [0usize; 3];
        let mut contributions = Vec::new();
        let mut outside = 0;

        for (index, feature) in features.iter().enumerate() {
            let rule = feature.buffer_rule();
            let buffer = match self.feature_buffer(feature, rule.distance_m()) {
                Ok(buffer) => buffer,
                Err(e) => {
                    warn!("Feature {} skipped while buffering: {}", index, e);
                    warnings.push(DataQualityWarning::FeatureSkipped {
                        index,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let clipped = buffer.intersection(&boundary);
            let area_m2 = clipped.unsigned_area();
            if clipped.0.is_empty() || area_m2 <= 0.0 {
                outside += 1;
                continue;
            }

            let kind = AppKind::of(feature);
            let counter = &mut counters[kind as usize];
            *counter += 1;
            debug!(
                "Feature {}: {} buffer {} m, {:.2} m² inside the property",
                index,
                kind.tip_app(),
                rule.distance_m(),
                area_m2
            );
            contributions.push(AppContribution {
                cod_app: format!("{}_{:03}", kind.code_prefix(), counter),
                kind,
                feature_index: index,
                buffer_m: rule.distance_m(),
                area_m2,
                provenance: feature.provenance(),
                geometry: clipped,
            });
        }

        if outside > 0 {
            debug!("{} feature buffers do not reach the property", outside);
        }

        let merged = union_all(contributions.iter().map(|c| c.geometry.clone()).collect());
        let geometry = snap(&merged, self.config.snap_tolerance_m).intersection(&boundary);

        let app = AppGeometry {
            geometry,
            contributions,
        };
        info!(
            "APP: {} contributing features, {} parts, {:.4} ha",
            app.contributions.len(),
            app.geometry.0.len(),
            app.area_m2() / 10_000.0
        );
        app
    }

    fn feature_buffer(
        &self,
        feature: &HydroFeature,
        distance: f64,
    ) -> Result<MultiPolygon<f64>, GeometryConstructionError> {
        let segments = self.config.quadrant_segments;
        match feature {
            HydroFeature::River { centerline, .. } => {
                check_finite(centerline.coords())?;
                let line = centerline.remove_repeated_points();
                if line.0.len() < 2 {
                    return Err(GeometryConstructionError::ZeroLengthCenterline);
                }
                Ok(buffer_line(&line, distance, segments))
            }
            HydroFeature::Spring { location, .. } => {
                check_finite(std::iter::once(&location.0))?;
                Ok(multi(circle(location.0, distance, segments)))
            }
            HydroFeature::WaterBody { outline, .. } => {
                check_finite(outline.exterior().coords())?;
                let exterior = outline.exterior().remove_repeated_points();
                if exterior.0.len() < 4 {
                    return Err(GeometryConstructionError::DegenerateOutline(format!(
                        "{} vertices",
                        exterior.0.len()
                    )));
                }
                let outline = Polygon::new(exterior, outline.interiors().to_vec());
                if outline.unsigned_area() <= 0.0 {
                    return Err(GeometryConstructionError::DegenerateOutline("zero area".into()));
                }
                // margin only, the water itself is not APP
                let lake = MultiPolygon::new(vec![Polygon::new(outline.exterior().clone(), vec![])]);
                Ok(buffer_polygon(&outline, distance, segments).difference(&lake))
            }
        }
    }
}

/// Computes the APP with the default configuration.
pub fn compute_app(
    features: &[HydroFeature],
    perimeter: &ValidPerimeter,
) -> (AppGeometry, Vec<DataQualityWarning>) {
    let config = EngineConfig::default();
    let mut warnings = Vec::new();
    let app = AppBufferEngine::new(&config).compute_app(features, perimeter, &mut warnings);
    (app, warnings)
}

fn check_finite<'c>(
    mut coords: impl Iterator<Item = &'c Coord<f64>>,
) -> Result<(), GeometryConstructionError> {
    match coords.find(|c| !c.x.is_finite() || !c.y.is_finite()) {
        Some(c) => Err(GeometryConstructionError::NonFiniteCoordinate { x: c.x, y: c.y }),
        None => Ok(()),
    }
}
