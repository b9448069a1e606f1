//! Hydrology Classifier.
//!
//! Turns loosely-typed features from an external hydrology source into
//! [`HydroFeature`]s the buffer engine understands. Width, area and spring
//! detection are best-effort estimates; every classified feature carries a
//! [`Provenance`] so consumers can tell measured values from guesses.

use geo::{Area, Contains, Coord, Geometry, LineString, Point, Polygon};
use rstar::primitives::{GeomWithData, Line};
use rstar::{RTree, AABB};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::DataQualityWarning;
use crate::geometry::{point_segment_distance, segment_distance};
use crate::rules::{fold_ascii, BufferRule, RiverBracket, WaterBodyBracket};
use crate::validator::{geometry_name, ValidPerimeter};

const WIDTH_KEYS: [&str; 4] = ["largura_m", "width_m", "largura", "width"];
const TYPE_KEYS: [&str; 6] = ["tipo", "type", "classe", "class", "nome", "name"];
const NAME_KEYS: [&str; 2] = ["nome", "name"];
const AREA_HA_KEY: &str = "area_ha";

/// Width assumed for a river nothing is known about (smallest bracket).
pub const DEFAULT_RIVER_WIDTH_M: f64 = 5.0;

/// Attribute value as delivered by the hydrology source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    /// Numeric reading, accepting numeric text with either decimal separator.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(i) => Some(*i as f64),
            AttributeValue::Float(f) => Some(*f),
            AttributeValue::Text(s) => s.trim().replace(',', ".").parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<&serde_json::Value> for AttributeValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => AttributeValue::Null,
            serde_json::Value::Bool(b) => AttributeValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => AttributeValue::Int(i),
                None => n.as_f64().map_or(AttributeValue::Null, AttributeValue::Float),
            },
            serde_json::Value::String(s) => AttributeValue::Text(s.clone()),
            other => AttributeValue::Text(other.to_string()),
        }
    }
}

/// One feature from the external source, in the perimeter's CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeature {
    pub geometry: Geometry<f64>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl RawFeature {
    pub fn new(geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            geometry: geometry.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: AttributeValue) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    /// First non-null attribute among `keys`, matched case-insensitively.
    pub fn lookup(&self, keys: &[&str]) -> Option<&AttributeValue> {
        keys.iter().find_map(|key| {
            self.attributes
                .iter()
                .find(|(k, v)| k.eq_ignore_ascii_case(key) && **v != AttributeValue::Null)
                .map(|(_, v)| v)
        })
    }
}

/// Where a classified attribute came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Read from an explicit attribute.
    Attribute,
    /// Guessed from a type code or name.
    Inferred,
    /// Nothing known; the conservative default applies.
    Default,
    /// Derived from network topology (spring detection).
    Heuristic,
    /// Computed from the geometry itself.
    Measured,
}

impl Provenance {
    pub fn is_authoritative(&self) -> bool {
        matches!(self, Provenance::Attribute | Provenance::Measured)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HydroFeature {
    River {
        centerline: LineString<f64>,
        width_m: f64,
        provenance: Provenance,
        name: Option<String>,
    },
    Spring {
        location: Point<f64>,
        provenance: Provenance,
    },
    WaterBody {
        outline: Polygon<f64>,
        area_m2: f64,
        provenance: Provenance,
    },
}

impl HydroFeature {
    pub fn buffer_rule(&self) -> BufferRule {
        match self {
            HydroFeature::River { width_m, .. } => BufferRule::River(RiverBracket::from_width(*width_m)),
            HydroFeature::Spring { .. } => BufferRule::Spring,
            HydroFeature::WaterBody { area_m2, .. } => {
                BufferRule::WaterBody(WaterBodyBracket::from_area_ha(area_m2 / 10_000.0))
            }
        }
    }

    /// `tip_hidro` of the HIDROGRAFIA layer.
    pub fn tip_hidro(&self) -> &'static str {
        match self {
            HydroFeature::River { .. } => "CURSO_DAGUA",
            HydroFeature::Spring { .. } => "NASCENTE",
            HydroFeature::WaterBody { .. } => "LAGO_LAGOA",
        }
    }

    pub fn geometry(&self) -> Geometry<f64> {
        match self {
            HydroFeature::River { centerline, .. } => Geometry::LineString(centerline.clone()),
            HydroFeature::Spring { location, .. } => Geometry::Point(*location),
            HydroFeature::WaterBody { outline, .. } => Geometry::Polygon(outline.clone()),
        }
    }

    pub fn provenance(&self) -> Provenance {
        match self {
            HydroFeature::River { provenance, .. }
            | HydroFeature::Spring { provenance, .. }
            | HydroFeature::WaterBody { provenance, .. } => *provenance,
        }
    }
}

/// A single-part piece of a raw feature, in planar coordinates.
#[derive(Debug, Clone)]
enum Part {
    Point(Point<f64>),
    Line(LineString<f64>),
    Area(Polygon<f64>),
}

impl Part {
    fn first_coord(&self) -> Option<Coord<f64>> {
        match self {
            Part::Point(p) => Some(p.0),
            Part::Line(l) => l.0.first().copied(),
            Part::Area(p) => p.exterior().0.first().copied(),
        }
    }

    fn segments(&self) -> Vec<(Coord<f64>, Coord<f64>)> {
        match self {
            Part::Point(p) => vec![(p.0, p.0)],
            Part::Line(l) => l.lines().map(|s| (s.start, s.end)).collect(),
            Part::Area(p) => std::iter::once(p.exterior())
                .chain(p.interiors())
                .flat_map(|ring| ring.lines().map(|s| (s.start, s.end)))
                .collect(),
        }
    }
}

/// Segment index over the perimeter boundary for distance queries.
struct PerimeterIndex<'a> {
    polygon: &'a Polygon<f64>,
    segments: RTree<Line<[f64; 2]>>,
}

impl<'a> PerimeterIndex<'a> {
    fn new(polygon: &'a Polygon<f64>) -> Self {
        let segments = std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .flat_map(|ring| ring.lines())
            .map(|s| Line::new([s.start.x, s.start.y], [s.end.x, s.end.y]))
            .collect();
        Self {
            polygon,
            segments: RTree::bulk_load(segments),
        }
    }

    /// Distance from a part to the perimeter polygon, or infinity when it is
    /// farther than `limit`.
    fn distance(&self, part: &Part, limit: f64) -> f64 {
        let inside = part
            .first_coord()
            .map_or(false, |c| self.polygon.contains(&Point::from(c)));
        let around = match (part, self.polygon.exterior().0.first()) {
            (Part::Area(water), Some(c)) => water.contains(&Point::from(*c)),
            _ => false,
        };
        if inside || around {
            return 0.0;
        }

        let mut best = f64::INFINITY;
        for (a, b) in part.segments() {
            let envelope = AABB::from_corners(
                [a.x.min(b.x) - limit, a.y.min(b.y) - limit],
                [a.x.max(b.x) + limit, a.y.max(b.y) + limit],
            );
            for edge in self.segments.locate_in_envelope_intersecting(&envelope) {
                let d = segment_distance(a, b, edge.from.into(), edge.to.into());
                if d < best {
                    best = d;
                }
                if best == 0.0 {
                    return 0.0;
                }
            }
        }
        best
    }

    fn point_distance(&self, c: Coord<f64>) -> f64 {
        if self.polygon.contains(&Point::from(c)) {
            return 0.0;
        }
        self.segments
            .nearest_neighbor(&[c.x, c.y])
            .map_or(f64::INFINITY, |edge| {
                point_segment_distance(c, edge.from.into(), edge.to.into())
            })
    }
}

pub struct HydrologyClassifier<'a> {
    config: &'a EngineConfig,
}

impl<'a> HydrologyClassifier<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Classifies the features near `perimeter`.
    ///
    /// An empty input is not an error: the result is empty and a
    /// `NoHydrologySource` warning is recorded.
    pub fn classify(
        &self,
        raw_features: &[RawFeature],
        perimeter: &ValidPerimeter,
        warnings: &mut Vec<DataQualityWarning>,
    ) -> Vec<HydroFeature> {
        if raw_features.is_empty() {
            warn!("No hydrology features supplied, APP will be empty");
            warnings.push(DataQualityWarning::NoHydrologySource);
            return Vec::new();
        }

        let index = PerimeterIndex::new(&perimeter.polygon);
        let radius = self.config.search_radius_m;

        let mut candidates: Vec<(f64, usize, Part)> = Vec::new();
        for (i, feature) in raw_features.iter().enumerate() {
            let planar = match perimeter.frame.to_planar(&feature.geometry) {
                Ok(g) => g,
                Err(e) => {
                    warn!("Hydrology feature {} skipped: {}", i, e);
                    warnings.push(DataQualityWarning::FeatureSkipped {
                        index: i,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let mut parts = Vec::new();
            if let Err(name) = split_parts(&planar, &mut parts) {
                warn!("Hydrology feature {} has unsupported geometry {}", i, name);
                warnings.push(DataQualityWarning::UnsupportedHydrologyGeometry {
                    index: i,
                    geometry: name.to_string(),
                });
            }
            for part in parts {
                let d = index.distance(&part, radius);
                if d <= radius {
                    candidates.push((d, i, part));
                }
            }
        }

        if candidates.is_empty() {
            warn!(
                "None of the {} hydrology features lie within {} m of the perimeter",
                raw_features.len(),
                radius
            );
            warnings.push(DataQualityWarning::NoNearbyHydrology {
                received: raw_features.len(),
            });
            return Vec::new();
        }

        // Bound the work handed to the buffer engine: nearest first.
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let limit = self.config.max_candidate_features;
        let mut dropped = candidates.len().saturating_sub(limit);
        candidates.truncate(limit);
        // Restore source order so output does not depend on distance ties.
        candidates.sort_by_key(|c| c.1);

        let mut features = Vec::with_capacity(candidates.len());
        for (_, i, part) in candidates {
            features.push(self.classify_part(i, part, &raw_features[i], warnings));
        }

        // Inferred springs count toward the same bound.
        let mut springs = self.detect_springs(&features, &index);
        let room = limit.saturating_sub(features.len());
        if springs.len() > room {
            dropped += springs.len() - room;
            springs.truncate(room);
        }
        if dropped > 0 {
            warn!("Candidate limit reached, dropping {} features", dropped);
            warnings.push(DataQualityWarning::CandidateLimitReached {
                kept: features.len() + springs.len(),
                dropped,
            });
        }
        if !springs.is_empty() {
            warn!("{} spring(s) inferred from river start points", springs.len());
            warnings.push(DataQualityWarning::HeuristicSprings {
                count: springs.len(),
            });
            features.extend(springs);
        }

        info!(
            "Classified {} hydrology features ({} rivers, {} springs, {} water bodies)",
            features.len(),
            features.iter().filter(|f| matches!(f, HydroFeature::River { .. })).count(),
            features.iter().filter(|f| matches!(f, HydroFeature::Spring { .. })).count(),
            features.iter().filter(|f| matches!(f, HydroFeature::WaterBody { .. })).count(),
        );
        features
    }

    fn classify_part(
        &self,
        index: usize,
        part: Part,
        source: &RawFeature,
        warnings: &mut Vec<DataQualityWarning>,
    ) -> HydroFeature {
        match part {
            Part::Point(location) => {
                let provenance = match type_code(source) {
                    Some(code) if code.contains("nascente") || code.contains("spring") => {
                        Provenance::Attribute
                    }
                    _ => Provenance::Inferred,
                };
                HydroFeature::Spring { location, provenance }
            }
            Part::Area(outline) => {
                let (area_m2, provenance) = match source
                    .lookup(&[AREA_HA_KEY])
                    .and_then(AttributeValue::as_f64)
                    .filter(|a| a.is_finite() && *a > 0.0)
                {
                    Some(ha) => (ha * 10_000.0, Provenance::Attribute),
                    None => (outline.unsigned_area(), Provenance::Measured),
                };
                debug!("Feature {}: water body of {:.2} ha", index, area_m2 / 10_000.0);
                HydroFeature::WaterBody {
                    outline,
                    area_m2,
                    provenance,
                }
            }
            Part::Line(centerline) => {
                let (width_m, provenance) = estimate_width(source);
                if provenance == Provenance::Default {
                    warn!("Feature {}: no width information, assuming {} m", index, width_m);
                    warnings.push(DataQualityWarning::WidthDefaulted { index, width_m });
                }
                debug!("Feature {}: river, width {} m ({:?})", index, width_m, provenance);
                HydroFeature::River {
                    centerline,
                    width_m,
                    provenance,
                    name: source
                        .lookup(&NAME_KEYS)
                        .and_then(AttributeValue::as_text)
                        .map(str::to_string),
                }
            }
        }
    }

    /// River start points with no upstream continuation near the perimeter.
    fn detect_springs(&self, features: &[HydroFeature], index: &PerimeterIndex) -> Vec<HydroFeature> {
        let rivers: Vec<&LineString<f64>> = features
            .iter()
            .filter_map(|f| match f {
                HydroFeature::River { centerline, .. } => Some(centerline),
                _ => None,
            })
            .collect();
        if rivers.is_empty() {
            return Vec::new();
        }

        let vertices: RTree<GeomWithData<[f64; 2], usize>> = RTree::bulk_load(
            rivers
                .iter()
                .enumerate()
                .flat_map(|(id, line)| line.coords().map(move |c| GeomWithData::new([c.x, c.y], id)))
                .collect(),
        );

        let mut accepted: RTree<[f64; 2]> = RTree::bulk_load(
            features
                .iter()
                .filter_map(|f| match f {
                    HydroFeature::Spring { location, .. } => Some([location.x(), location.y()]),
                    _ => None,
                })
                .collect(),
        );

        let tolerance2 = self.config.endpoint_tolerance_m.powi(2);
        let dedup2 = self.config.spring_dedup_m.powi(2);
        let mut springs = Vec::new();

        for (id, line) in rivers.iter().enumerate() {
            let Some(start) = line.0.first().copied() else {
                continue;
            };
            // Zero-length centerlines get no APP, so no spring either.
            if line.coords().all(|c| *c == start) {
                continue;
            }
            let query = [start.x, start.y];
            let continued = vertices
                .locate_within_distance(query, tolerance2)
                .any(|v| v.data != id);
            if continued || index.point_distance(start) > self.config.spring_search_m {
                continue;
            }
            if accepted.locate_within_distance(query, dedup2).next().is_some() {
                continue;
            }
            accepted.insert(query);
            springs.push(HydroFeature::Spring {
                location: Point::from(start),
                provenance: Provenance::Heuristic,
            });
        }
        springs
    }
}

/// Classifies with the default configuration.
pub fn classify(
    raw_features: &[RawFeature],
    perimeter: &ValidPerimeter,
) -> (Vec<HydroFeature>, Vec<DataQualityWarning>) {
    let config = EngineConfig::default();
    let mut warnings = Vec::new();
    let features = HydrologyClassifier::new(&config).classify(raw_features, perimeter, &mut warnings);
    (features, warnings)
}

/// Explicit width attribute, then type-code inference, then the default.
fn estimate_width(feature: &RawFeature) -> (f64, Provenance) {
    if let Some(width) = feature
        .lookup(&WIDTH_KEYS)
        .and_then(AttributeValue::as_f64)
        .filter(|w| w.is_finite() && *w > 0.0)
    {
        return (width, Provenance::Attribute);
    }
    match type_code(feature).as_deref().and_then(width_from_type) {
        Some(width) => (width, Provenance::Inferred),
        None => (DEFAULT_RIVER_WIDTH_M, Provenance::Default),
    }
}

fn width_from_type(code: &str) -> Option<f64> {
    if code.contains("ribeirao") {
        Some(8.0)
    } else if code.contains("corrego") || code.contains("riacho") {
        Some(5.0)
    } else if code.contains("rio") || code.contains("river") {
        Some(10.0)
    } else {
        None
    }
}

/// All type-like attributes, folded and joined.
fn type_code(feature: &RawFeature) -> Option<String> {
    let text: Vec<String> = TYPE_KEYS
        .iter()
        .filter_map(|key| feature.lookup(&[*key]).and_then(AttributeValue::as_text))
        .map(fold_ascii)
        .collect();
    (!text.is_empty()).then(|| text.join(" "))
}

/// Splits a geometry into single parts; closed lines become areas.
fn split_parts(geometry: &Geometry<f64>, parts: &mut Vec<Part>) -> Result<(), &'static str> {
    match geometry {
        Geometry::Point(p) => parts.push(Part::Point(*p)),
        Geometry::MultiPoint(mp) => parts.extend(mp.iter().map(|p| Part::Point(*p))),
        Geometry::Line(l) => parts.push(Part::Line(LineString::new(vec![l.start, l.end]))),
        Geometry::LineString(l) => parts.push(line_part(l)),
        Geometry::MultiLineString(ml) => parts.extend(ml.iter().map(line_part)),
        Geometry::Polygon(p) => parts.push(Part::Area(p.clone())),
        Geometry::MultiPolygon(mp) => parts.extend(mp.iter().cloned().map(Part::Area)),
        Geometry::Rect(r) => parts.push(Part::Area(r.to_polygon())),
        Geometry::Triangle(t) => parts.push(Part::Area(t.to_polygon())),
        Geometry::GeometryCollection(gc) => {
            let mut result = Ok(());
            for g in gc.iter() {
                if let Err(e) = split_parts(g, parts) {
                    result = Err(e);
                }
            }
            return result;
        }
    }
    if parts.is_empty() {
        return Err(geometry_name(geometry));
    }
    Ok(())
}

fn line_part(line: &LineString<f64>) -> Part {
    if line.0.len() >= 4 && line.is_closed() {
        Part::Area(Polygon::new(line.clone(), vec![]))
    } else {
        Part::Line(line.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::validator;
    use geo::{line_string, point, polygon};

    const X0: f64 = 300_000.0;
    const Y0: f64 = 7_400_000.0;

    fn perimeter() -> ValidPerimeter {
        let square = polygon![
            (x: X0, y: Y0),
            (x: X0 + 1000.0, y: Y0),
            (x: X0 + 1000.0, y: Y0 + 1000.0),
            (x: X0, y: Y0 + 1000.0),
        ];
        validator::validate(&Geometry::Polygon(square), Crs::from_epsg(31983))
            .unwrap()
            .0
    }

    fn river(x: f64) -> LineString<f64> {
        line_string![(x: X0 + x, y: Y0 + 200.0), (x: X0 + x, y: Y0 + 700.0)]
    }

    #[test]
    fn test_empty_input_warns() {
        let (features, warnings) = classify(&[], &perimeter());
        assert!(features.is_empty());
        assert_eq!(warnings, vec![DataQualityWarning::NoHydrologySource]);
    }

    #[test]
    fn test_width_sources() {
        let explicit = RawFeature::new(river(100.0)).with_attribute("largura_m", AttributeValue::Float(25.0));
        let text = RawFeature::new(river(100.0)).with_attribute("Width", AttributeValue::Text("12,5".into()));
        let named = RawFeature::new(river(100.0)).with_attribute("nome", AttributeValue::Text("Ribeirão Preto".into()));
        let unknown = RawFeature::new(river(100.0));

        assert_eq!(estimate_width(&explicit), (25.0, Provenance::Attribute));
        assert_eq!(estimate_width(&text), (12.5, Provenance::Attribute));
        assert_eq!(estimate_width(&named), (8.0, Provenance::Inferred));
        assert_eq!(estimate_width(&unknown), (DEFAULT_RIVER_WIDTH_M, Provenance::Default));
        assert_eq!(width_from_type("rio tiete"), Some(10.0));
        assert_eq!(width_from_type("corrego fundo"), Some(5.0));
    }

    #[test]
    fn test_unknown_width_takes_smallest_bracket() {
        let (features, warnings) = classify(&[RawFeature::new(river(500.0))], &perimeter());
        let rivers: Vec<_> = features
            .iter()
            .filter(|f| matches!(f, HydroFeature::River { .. }))
            .collect();
        assert_eq!(rivers.len(), 1);
        assert_eq!(rivers[0].buffer_rule(), BufferRule::River(RiverBracket::UpTo10m));
        assert!(!rivers[0].provenance().is_authoritative());
        assert!(warnings.contains(&DataQualityWarning::WidthDefaulted { index: 0, width_m: 5.0 }));
    }

    #[test]
    fn test_far_features_are_pruned() {
        let far = line_string![(x: X0 + 5000.0, y: Y0), (x: X0 + 5000.0, y: Y0 + 500.0)];
        let near = line_string![(x: X0 + 1500.0, y: Y0), (x: X0 + 1500.0, y: Y0 + 500.0)];
        let (features, _) = classify(&[RawFeature::new(far.clone())], &perimeter());
        assert!(features.is_empty());

        let (features, _) = classify(
            &[RawFeature::new(far), RawFeature::new(near)],
            &perimeter(),
        );
        assert_eq!(
            features.iter().filter(|f| matches!(f, HydroFeature::River { .. })).count(),
            1
        );
    }

    #[test]
    fn test_no_nearby_hydrology_warning() {
        let far = point!(x: X0 + 9000.0, y: Y0 + 9000.0);
        let (features, warnings) = classify(&[RawFeature::new(far)], &perimeter());
        assert!(features.is_empty());
        assert!(warnings.contains(&DataQualityWarning::NoNearbyHydrology { received: 1 }));
    }

    #[test]
    fn test_candidate_limit_keeps_nearest() {
        let config = EngineConfig {
            max_candidate_features: 2,
            ..EngineConfig::default()
        };
        let raw: Vec<RawFeature> = [1800.0, 100.0, 1500.0, 400.0]
            .iter()
            .map(|dx| RawFeature::new(point!(x: X0 + 1000.0 + dx, y: Y0 + 500.0)))
            .collect();
        let mut warnings = Vec::new();
        let features = HydrologyClassifier::new(&config).classify(&raw, &perimeter(), &mut warnings);
        assert_eq!(features.len(), 2);
        assert!(warnings.contains(&DataQualityWarning::CandidateLimitReached { kept: 2, dropped: 2 }));
        for f in &features {
            if let HydroFeature::Spring { location, .. } = f {
                assert!(location.x() < X0 + 1500.0);
            }
        }
    }

    #[test]
    fn test_inferred_springs_count_toward_limit() {
        let config = EngineConfig {
            max_candidate_features: 1,
            ..EngineConfig::default()
        };
        let raw = [RawFeature::new(river(200.0)), RawFeature::new(river(600.0))];
        let mut warnings = Vec::new();
        let features = HydrologyClassifier::new(&config).classify(&raw, &perimeter(), &mut warnings);
        assert_eq!(features.len(), 1);
        assert!(matches!(features[0], HydroFeature::River { .. }));
        assert!(warnings.contains(&DataQualityWarning::CandidateLimitReached { kept: 1, dropped: 2 }));
        assert!(!warnings
            .iter()
            .any(|w| matches!(w, DataQualityWarning::HeuristicSprings { .. })));

        let config = EngineConfig {
            max_candidate_features: 2,
            ..EngineConfig::default()
        };
        let mut warnings = Vec::new();
        let features = HydrologyClassifier::new(&config).classify(&raw, &perimeter(), &mut warnings);
        assert_eq!(features.len(), 2);
        assert!(features.iter().all(|f| matches!(f, HydroFeature::River { .. })));
        assert!(warnings.contains(&DataQualityWarning::CandidateLimitReached { kept: 2, dropped: 2 }));
    }

    #[test]
    fn test_zero_length_line_yields_no_spring() {
        let single = LineString::new(vec![Coord { x: X0 + 300.0, y: Y0 + 300.0 }]);
        let repeated = line_string![(x: X0 + 600.0, y: Y0 + 600.0), (x: X0 + 600.0, y: Y0 + 600.0)];
        let (features, warnings) = classify(
            &[RawFeature::new(single), RawFeature::new(repeated)],
            &perimeter(),
        );
        assert!(features.iter().all(|f| !matches!(f, HydroFeature::Spring { .. })));
        assert!(!warnings
            .iter()
            .any(|w| matches!(w, DataQualityWarning::HeuristicSprings { .. })));
    }

    #[test]
    fn test_closed_line_and_polygon_are_water_bodies() {
        let lake = polygon![
            (x: X0 + 100.0, y: Y0 + 100.0),
            (x: X0 + 300.0, y: Y0 + 100.0),
            (x: X0 + 300.0, y: Y0 + 300.0),
            (x: X0 + 100.0, y: Y0 + 300.0),
        ];
        let ring = lake.exterior().clone();
        let declared = RawFeature::new(lake).with_attribute("area_ha", AttributeValue::Float(25.0));
        let (features, _) = classify(&[declared, RawFeature::new(ring)], &perimeter());

        assert_eq!(features.len(), 2);
        assert_eq!(
            features[0].buffer_rule(),
            BufferRule::WaterBody(WaterBodyBracket::Over20ha)
        );
        match &features[1] {
            HydroFeature::WaterBody { area_m2, provenance, .. } => {
                assert!((area_m2 - 40_000.0).abs() < 1e-6);
                assert_eq!(*provenance, Provenance::Measured);
            }
            other => panic!("expected a water body, got {other:?}"),
        }
    }

    #[test]
    fn test_spring_points() {
        let marked = RawFeature::new(point!(x: X0 + 10.0, y: Y0 + 10.0))
            .with_attribute("tipo", AttributeValue::Text("Nascente".into()));
        let bare = RawFeature::new(point!(x: X0 + 900.0, y: Y0 + 900.0));
        let (features, _) = classify(&[marked, bare], &perimeter());
        let provenances: Vec<_> = features.iter().map(HydroFeature::provenance).collect();
        assert_eq!(provenances, vec![Provenance::Attribute, Provenance::Inferred]);
    }

    #[test]
    fn test_heuristic_springs_from_line_starts() {
        // a tributary starting inside the property and flowing into a main river
        let main = line_string![(x: X0 + 500.0, y: Y0 - 500.0), (x: X0 + 500.0, y: Y0 + 1500.0)];
        let tributary = line_string![(x: X0 + 200.0, y: Y0 + 300.0), (x: X0 + 500.0, y: Y0 + 300.0)];
        // starts where the tributary ends, so it has an upstream continuation
        let continued = line_string![(x: X0 + 500.0, y: Y0 + 300.0), (x: X0 + 800.0, y: Y0 + 300.0)];
        let (features, warnings) = classify(
            &[RawFeature::new(main), RawFeature::new(tributary), RawFeature::new(continued)],
            &perimeter(),
        );
        let springs: Vec<_> = features
            .iter()
            .filter_map(|f| match f {
                HydroFeature::Spring { location, provenance } => Some((*location, *provenance)),
                _ => None,
            })
            .collect();
        // the main river starts 500 m outside the property
        assert_eq!(springs.len(), 1);
        assert_eq!(springs[0].0, point!(x: X0 + 200.0, y: Y0 + 300.0));
        assert_eq!(springs[0].1, Provenance::Heuristic);
        assert!(warnings.contains(&DataQualityWarning::HeuristicSprings { count: 1 }));
    }

    #[test]
    fn test_nearby_spring_candidates_are_merged() {
        let a = line_string![(x: X0 + 200.0, y: Y0 + 200.0), (x: X0 + 200.0, y: Y0 + 600.0)];
        let b = line_string![(x: X0 + 220.0, y: Y0 + 200.0), (x: X0 + 400.0, y: Y0 + 600.0)];
        let (features, _) = classify(&[RawFeature::new(a), RawFeature::new(b)], &perimeter());
        let springs = features
            .iter()
            .filter(|f| matches!(f, HydroFeature::Spring { .. }))
            .count();
        assert_eq!(springs, 1);
    }
}
