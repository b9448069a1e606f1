//! End-to-end run for one property.
//!
//! validate → classify → buffer → allocate → layers. Fatal errors stop the
//! run before any layer exists; everything else ends up in `warnings`.

use geo::{Area, Geometry, MultiPolygon};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::app::{AppBufferEngine, AppContribution, AppGeometry};
use crate::area::{hectares, AreaSummary};
use crate::config::EngineConfig;
use crate::crs::Crs;
use crate::error::{DataQualityWarning, InputError, Result};
use crate::hydrology::{HydroFeature, HydrologyClassifier, RawFeature};
use crate::reserve::{ReserveLegalAllocator, ReserveLegalGeometry};
use crate::rules::Biome;
use crate::validator::{geometry_name, GeometryValidator, ValidPerimeter};

pub const LAYER_AREA_IMOVEL: &str = "AREA_IMOVEL";
pub const LAYER_APP: &str = "APP";
pub const LAYER_RESERVA_LEGAL: &str = "RESERVA_LEGAL";
pub const LAYER_HIDROGRAFIA: &str = "HIDROGRAFIA";

/// Registration data that only passes through to the attribute tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyInfo {
    pub name: String,
    pub cod_imovel: String,
    pub cod_estado: String,
    pub cod_municipio: String,
    pub num_matricula: String,
}

impl Default for PropertyInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            cod_imovel: String::new(),
            cod_estado: "SP".to_string(),
            cod_municipio: String::new(),
            num_matricula: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub perimeter: Geometry<f64>,
    pub crs: Crs,
    /// `None` when no hydrology source is available.
    pub hydrology: Option<Vec<RawFeature>>,
    /// Biome name or code, parsed before any geometry work.
    pub biome: String,
    pub property: PropertyInfo,
    /// Already-allocated areas, in the perimeter's CRS.
    pub exclusions: Vec<Geometry<f64>>,
}

impl PipelineInput {
    pub fn new(perimeter: Geometry<f64>, crs: Crs, biome: &str) -> Self {
        Self {
            perimeter,
            crs,
            hydrology: None,
            biome: biome.to_string(),
            property: PropertyInfo::default(),
            exclusions: Vec::new(),
        }
    }

    pub fn with_hydrology(mut self, features: Vec<RawFeature>) -> Self {
        self.hydrology = Some(features);
        self
    }

    pub fn with_property(mut self, property: PropertyInfo) -> Self {
        self.property = property;
        self
    }

    pub fn with_exclusions(mut self, exclusions: Vec<Geometry<f64>>) -> Self {
        self.exclusions = exclusions;
        self
    }
}

/// A named set of features handed to the packager, in geographic
/// coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayer {
    pub name: &'static str,
    pub crs: Crs,
    pub features: Vec<LayerFeature>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerFeature {
    pub geometry: Geometry<f64>,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub property: PropertyInfo,
    pub biome: Biome,
    pub perimeter: ValidPerimeter,
    pub area: AreaSummary,
    pub features: Vec<HydroFeature>,
    pub app: AppGeometry,
    pub reserve: ReserveLegalGeometry,
    pub warnings: Vec<DataQualityWarning>,
    pub layers: Vec<OutputLayer>,
}

/// Summary written next to the layers for the human reviewer.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport<'a> {
    pub property: &'a PropertyInfo,
    pub biome: Biome,
    pub input_crs: String,
    pub planar_crs: String,
    pub output_crs: String,
    pub area: AreaSummary,
    pub small_property: bool,
    pub hydrology_features: usize,
    pub heuristic_features: usize,
    pub app_area_ha: f64,
    pub app_parts: usize,
    pub reserve_area_ha: f64,
    pub reserve_required_ha: f64,
    pub reserve_parts: usize,
    pub reserve_condition: &'static str,
    pub contributions: &'a [AppContribution],
    pub warnings: &'a [DataQualityWarning],
}

impl PipelineOutput {
    pub fn layer(&self, name: &str) -> Option<&OutputLayer> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn report(&self) -> RunReport<'_> {
        RunReport {
            property: &self.property,
            biome: self.biome,
            input_crs: self.perimeter.frame.source.identifier(),
            planar_crs: self.perimeter.frame.planar_crs().identifier(),
            output_crs: self.perimeter.frame.output_crs().identifier(),
            area: self.area,
            small_property: self.area.is_small_property(),
            hydrology_features: self.features.len(),
            heuristic_features: self
                .features
                .iter()
                .filter(|f| !f.provenance().is_authoritative())
                .count(),
            app_area_ha: hectares(self.app.area_m2()),
            app_parts: self.app.geometry.0.len(),
            reserve_area_ha: hectares(self.reserve.area_m2),
            reserve_required_ha: hectares(self.reserve.required_area_m2),
            reserve_parts: self.reserve.geometry.0.len(),
            reserve_condition: self.reserve.condition.code(),
            contributions: &self.app.contributions,
            warnings: &self.warnings,
        }
    }
}

pub struct Pipeline {
    config: EngineConfig,
}

impl Pipeline {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(&self, input: PipelineInput) -> Result<PipelineOutput> {
        let biome: Biome = input.biome.parse()?;
        let mut warnings = Vec::new();

        let perimeter =
            GeometryValidator::new(&self.config).validate(&input.perimeter, input.crs, &mut warnings)?;
        let area = AreaSummary::from_m2(perimeter.area_m2, self.config.fiscal_module_ha);

        let raw = input.hydrology.as_deref().unwrap_or(&[]);
        let features = HydrologyClassifier::new(&self.config).classify(raw, &perimeter, &mut warnings);
        let app = AppBufferEngine::new(&self.config).compute_app(&features, &perimeter, &mut warnings);

        let exclusions = input
            .exclusions
            .iter()
            .map(|g| planar_exclusion(g, &perimeter))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let reserve = ReserveLegalAllocator::new(&self.config).compute_reserve_legal(
            &perimeter,
            &app,
            biome,
            &exclusions,
            &mut warnings,
        )?;

        let layers = build_layers(&input.property, biome, &perimeter, &area, &features, &app, &reserve);
        info!(
            "Run complete: {} layers, {} warnings",
            layers.len(),
            warnings.len()
        );

        Ok(PipelineOutput {
            property: input.property,
            biome,
            perimeter,
            area,
            features,
            app,
            reserve,
            warnings,
            layers,
        })
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

fn planar_exclusion(
    geometry: &Geometry<f64>,
    perimeter: &ValidPerimeter,
) -> std::result::Result<MultiPolygon<f64>, InputError> {
    let multi = match geometry {
        Geometry::Polygon(p) => MultiPolygon::new(vec![p.clone()]),
        Geometry::MultiPolygon(mp) => mp.clone(),
        other => {
            return Err(InputError::InvalidGeometry(format!(
                "exclusion must be a polygon, got {}",
                geometry_name(other)
            )))
        }
    };
    perimeter.frame.to_planar(&multi)
}

fn build_layers(
    property: &PropertyInfo,
    biome: Biome,
    perimeter: &ValidPerimeter,
    area: &AreaSummary,
    hydrology: &[HydroFeature],
    app: &AppGeometry,
    reserve: &ReserveLegalGeometry,
) -> Vec<OutputLayer> {
    let frame = perimeter.frame;
    let crs = frame.output_crs();
    let mut layers = Vec::with_capacity(4);

    layers.push(OutputLayer {
        name: LAYER_AREA_IMOVEL,
        crs,
        features: vec![LayerFeature {
            geometry: Geometry::MultiPolygon(frame.to_geographic(&perimeter.as_multi())),
            properties: object(json!({
                "cod_imovel": property.cod_imovel,
                "nom_imovel": property.name,
                "mod_fiscal": area.fiscal_modules,
                "num_area": area.area_ha,
                "cod_estado": property.cod_estado,
                "cod_municipio": property.cod_municipio,
                "biome": biome.code(),
            })),
        }],
    });

    if !app.is_empty() {
        let features = app
            .geometry
            .iter()
            .enumerate()
            .map(|(i, part)| LayerFeature {
                geometry: Geometry::MultiPolygon(frame.to_geographic(&MultiPolygon::new(vec![part.clone()]))),
                properties: object(json!({
                    "cod_app": format!("APP_{:03}", i + 1),
                    "tip_app": app.kind_of(part).map_or("", |k| k.tip_app()),
                    "des_condic": "A_CLASSIFICAR",
                    "num_area": hectares(part.unsigned_area()),
                })),
            })
            .collect();
        layers.push(OutputLayer {
            name: LAYER_APP,
            crs,
            features,
        });
    }

    layers.push(OutputLayer {
        name: LAYER_RESERVA_LEGAL,
        crs,
        features: vec![LayerFeature {
            geometry: Geometry::MultiPolygon(frame.to_geographic(&reserve.geometry)),
            properties: object(json!({
                "cod_rl": "RL_001",
                "des_condic": reserve.condition.code(),
                "num_area": hectares(reserve.area_m2),
                "ind_averbada": "N",
                "num_matricula": property.num_matricula,
                "biome": biome.code(),
                "pct_exigido": biome.reserve_fraction() * 100.0,
                "area_exigida_ha": hectares(reserve.required_area_m2),
            })),
        }],
    });

    if !hydrology.is_empty() {
        let features = hydrology
            .iter()
            .enumerate()
            .map(|(i, feature)| {
                let (name, width_m) = match feature {
                    HydroFeature::River { name, width_m, .. } => (name.as_deref().unwrap_or(""), *width_m),
                    _ => ("", 0.0),
                };
                LayerFeature {
                    geometry: frame.to_geographic(&feature.geometry()),
                    properties: object(json!({
                        "cod_hidro": format!("HID_{:03}", i + 1),
                        "tip_hidro": feature.tip_hidro(),
                        "nom_hidro": name,
                        "num_largura": width_m,
                        "origem": feature.provenance(),
                    })),
                }
            })
            .collect();
        layers.push(OutputLayer {
            name: LAYER_HIDROGRAFIA,
            crs,
            features,
        });
    }

    layers
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
