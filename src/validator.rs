//! Geometry Validator: turns a raw perimeter into a [`ValidPerimeter`].
//!
//! Rings are checked for closure and self-intersection, the polygon is moved
//! into its planar UTM frame, oriented and measured. Anything that cannot
//! become a usable property boundary is an [`InputError`].

use geo::orient::{Direction, Orient};
use geo::{Area, Contains, Coord, Geometry, LineString, MultiPolygon, Point, Polygon, SimplifyVwPreserve};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::crs::{Crs, PlanarFrame};
use crate::error::{DataQualityWarning, InputError};
use crate::geometry::segments_intersect;

/// A property boundary the engine can work with.
///
/// Invariants: closed, non-self-intersecting rings; exterior counter-clockwise
/// with clockwise holes; planar meter coordinates; `area_m2` at least the
/// configured minimum.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidPerimeter {
    pub polygon: Polygon<f64>,
    pub frame: PlanarFrame,
    pub area_m2: f64,
}

impl ValidPerimeter {
    pub fn as_multi(&self) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![self.polygon.clone()])
    }

    pub fn area_ha(&self) -> f64 {
        self.area_m2 / 10_000.0
    }
}

pub struct GeometryValidator<'a> {
    config: &'a EngineConfig,
}

impl<'a> GeometryValidator<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    pub fn validate(
        &self,
        raw: &Geometry<f64>,
        crs: Crs,
        warnings: &mut Vec<DataQualityWarning>,
    ) -> Result<ValidPerimeter, InputError> {
        let source = self.extract_polygon(raw, warnings)?;
        let source = self.clean_polygon(&source)?;

        let frame = PlanarFrame::for_geometry(crs, &Geometry::Polygon(source.clone()))?;
        if frame.needs_projection() {
            debug!("Projecting perimeter from {} to {}", crs, frame.zone);
        }
        let planar = frame.to_planar(&source)?;

        check_simple(&planar)?;
        let mut polygon = planar.orient(Direction::Default);

        let area_m2 = polygon.unsigned_area();
        if !area_m2.is_finite() || area_m2 < self.config.min_area_m2 {
            return Err(InputError::DegenerateArea {
                area_m2,
                min_m2: self.config.min_area_m2,
            });
        }

        let vertices = vertex_total(&polygon);
        if vertices > self.config.max_vertices {
            polygon = self.simplify(&polygon);
            let after = vertex_total(&polygon);
            warn!("Perimeter simplified from {} to {} vertices", vertices, after);
            warnings.push(DataQualityWarning::PerimeterSimplified {
                from: vertices,
                to: after,
            });
        }
        let area_m2 = polygon.unsigned_area();

        if area_m2 < self.config.legal_min_area_m2 {
            warn!("Property area {:.0} m² below legal minimum", area_m2);
            warnings.push(DataQualityWarning::BelowLegalMinimumArea {
                area_m2,
                minimum_m2: self.config.legal_min_area_m2,
            });
        }

        info!(
            "Perimeter validated: {} vertices, {:.4} ha in {}",
            vertex_total(&polygon),
            area_m2 / 10_000.0,
            frame.zone
        );

        Ok(ValidPerimeter {
            polygon,
            frame,
            area_m2,
        })
    }

    fn extract_polygon(
        &self,
        raw: &Geometry<f64>,
        warnings: &mut Vec<DataQualityWarning>,
    ) -> Result<Polygon<f64>, InputError> {
        match raw {
            Geometry::Polygon(p) => Ok(p.clone()),
            Geometry::MultiPolygon(mp) => {
                let largest = mp
                    .iter()
                    .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area()))
                    .ok_or(InputError::NoPerimeter)?;
                if mp.0.len() > 1 {
                    warn!("Perimeter has {} parts, keeping the largest", mp.0.len());
                    warnings.push(DataQualityWarning::MultiPartPerimeter { parts: mp.0.len() });
                }
                Ok(largest.clone())
            }
            Geometry::LineString(ring) => {
                let (first, last) = match (ring.0.first(), ring.0.last()) {
                    (Some(f), Some(l)) => (*f, *l),
                    _ => return Err(InputError::NoPerimeter),
                };
                let gap = (first.x - last.x).hypot(first.y - last.y);
                if gap > self.config.closure_epsilon {
                    return Err(InputError::InvalidGeometry(format!(
                        "ring is not closed (first and last vertex {gap} apart)"
                    )));
                }
                let mut coords = ring.0.clone();
                if let Some(end) = coords.last_mut() {
                    *end = first;
                }
                Ok(Polygon::new(LineString::new(coords), vec![]))
            }
            Geometry::GeometryCollection(gc) => gc
                .iter()
                .find(|g| matches!(g, Geometry::Polygon(_) | Geometry::MultiPolygon(_)))
                .ok_or(InputError::NoPerimeter)
                .and_then(|g| self.extract_polygon(g, warnings)),
            other => Err(InputError::InvalidGeometry(format!(
                "expected a polygon, got {}",
                geometry_name(other)
            ))),
        }
    }

    fn clean_polygon(&self, polygon: &Polygon<f64>) -> Result<Polygon<f64>, InputError> {
        let exterior = self.clean_ring(polygon.exterior())?;
        let interiors = polygon
            .interiors()
            .iter()
            .map(|ring| self.clean_ring(ring))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Polygon::new(exterior, interiors))
    }

    /// Drops repeated vertices and requires three distinct ones.
    fn clean_ring(&self, ring: &LineString<f64>) -> Result<LineString<f64>, InputError> {
        if let Some(c) = ring.coords().find(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(InputError::InvalidGeometry(format!(
                "non-finite coordinate ({}, {})",
                c.x, c.y
            )));
        }

        let eps = self.config.closure_epsilon;
        let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
        for c in ring.coords() {
            match coords.last() {
                Some(prev) if (prev.x - c.x).hypot(prev.y - c.y) <= eps => {}
                _ => coords.push(*c),
            }
        }
        // the closing vertex is re-added by Polygon::new
        if coords.len() > 1 {
            let (first, last) = (coords[0], coords[coords.len() - 1]);
            if (first.x - last.x).hypot(first.y - last.y) <= eps {
                coords.pop();
            }
        }
        if coords.len() < 3 {
            return Err(InputError::InvalidGeometry(format!(
                "ring has {} distinct vertices, at least 3 are required",
                coords.len()
            )));
        }
        coords.push(coords[0]);
        Ok(LineString::new(coords))
    }

    /// Topology-preserving Visvalingam-Whyatt with a growing area threshold.
    fn simplify(&self, polygon: &Polygon<f64>) -> Polygon<f64> {
        let mut epsilon = 1.0;
        let mut current = polygon.clone();
        while vertex_total(&current) > self.config.max_vertices && epsilon <= 10_000.0 {
            let candidate = polygon.simplify_vw_preserve(&epsilon);
            if candidate.exterior().0.len() >= 4 {
                current = candidate;
            }
            epsilon *= 2.0;
        }
        current
    }
}

/// Validates with the default configuration.
pub fn validate(
    raw: &Geometry<f64>,
    crs: Crs,
) -> Result<(ValidPerimeter, Vec<DataQualityWarning>), InputError> {
    let config = EngineConfig::default();
    let mut warnings = Vec::new();
    let perimeter = GeometryValidator::new(&config).validate(raw, crs, &mut warnings)?;
    Ok((perimeter, warnings))
}

type IndexedSegment = GeomWithData<Rectangle<[f64; 2]>, usize>;

struct Segment {
    ring: usize,
    index: usize,
    ring_len: usize,
    start: Coord<f64>,
    end: Coord<f64>,
}

impl Segment {
    fn adjacent(&self, other: &Segment) -> bool {
        if self.ring != other.ring {
            return false;
        }
        let (lo, hi) = if self.index < other.index {
            (self.index, other.index)
        } else {
            (other.index, self.index)
        };
        hi == lo + 1 || (lo == 0 && hi == self.ring_len - 1)
    }
}

/// Rejects crossing or touching edges within and between rings, and holes
/// outside the exterior.
fn check_simple(polygon: &Polygon<f64>) -> Result<(), InputError> {
    let rings: Vec<&LineString<f64>> = std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .collect();

    let segments: Vec<Segment> = rings
        .iter()
        .enumerate()
        .flat_map(|(ring, ls)| {
            let ring_len = ls.0.len().saturating_sub(1);
            ls.lines().enumerate().map(move |(index, line)| Segment {
                ring,
                index,
                ring_len,
                start: line.start,
                end: line.end,
            })
        })
        .collect();

    let tree: RTree<IndexedSegment> = RTree::bulk_load(
        segments
            .iter()
            .enumerate()
            .map(|(k, s)| {
                GeomWithData::new(
                    Rectangle::from_corners([s.start.x, s.start.y], [s.end.x, s.end.y]),
                    k,
                )
            })
            .collect(),
    );

    for (k, s) in segments.iter().enumerate() {
        let envelope = AABB::from_corners([s.start.x, s.start.y], [s.end.x, s.end.y]);
        for candidate in tree.locate_in_envelope_intersecting(&envelope) {
            let other = &segments[candidate.data];
            if candidate.data <= k || s.adjacent(other) {
                continue;
            }
            if segments_intersect(s.start, s.end, other.start, other.end) {
                let what = if s.ring == other.ring {
                    format!("ring {} intersects itself", s.ring)
                } else {
                    format!("rings {} and {} intersect", s.ring, other.ring)
                };
                return Err(InputError::InvalidGeometry(format!(
                    "{what} near ({:.3}, {:.3})",
                    s.start.x, s.start.y
                )));
            }
        }
    }

    let shell = Polygon::new(polygon.exterior().clone(), vec![]);
    for (i, hole) in polygon.interiors().iter().enumerate() {
        if let Some(c) = hole.0.first() {
            if !shell.contains(&Point::from(*c)) {
                return Err(InputError::InvalidGeometry(format!(
                    "hole {} lies outside the exterior ring",
                    i + 1
                )));
            }
        }
    }
    Ok(())
}

fn vertex_total(polygon: &Polygon<f64>) -> usize {
    polygon.exterior().0.len() + polygon.interiors().iter().map(|r| r.0.len()).sum::<usize>()
}

pub(crate) fn geometry_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn utm() -> Crs {
        Crs::from_epsg(31983)
    }

    fn square(size: f64) -> Polygon<f64> {
        polygon![
            (x: 300_000.0, y: 7_400_000.0),
            (x: 300_000.0 + size, y: 7_400_000.0),
            (x: 300_000.0 + size, y: 7_400_000.0 + size),
            (x: 300_000.0, y: 7_400_000.0 + size),
            (x: 300_000.0, y: 7_400_000.0),
        ]
    }

    #[test]
    fn test_valid_square() {
        let (perimeter, warnings) = validate(&Geometry::Polygon(square(1000.0)), utm()).unwrap();
        assert!((perimeter.area_m2 - 1_000_000.0).abs() < 1e-6);
        assert!((perimeter.area_ha() - 100.0).abs() < 1e-9);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_orients_clockwise_input() {
        let cw = polygon![
            (x: 0.0, y: 0.0),
            (x: 0.0, y: 100.0),
            (x: 100.0, y: 100.0),
            (x: 100.0, y: 0.0),
        ];
        let (perimeter, _) = validate(&Geometry::Polygon(cw), Crs::from_epsg(32723)).unwrap();
        assert!(perimeter.polygon.signed_area() > 0.0);
    }

    #[test]
    fn test_rejects_bowtie() {
        let bowtie = polygon![
            (x: 0.0, y: 0.0),
            (x: 100.0, y: 100.0),
            (x: 100.0, y: 0.0),
            (x: 0.0, y: 100.0),
        ];
        let err = validate(&Geometry::Polygon(bowtie), utm()).unwrap_err();
        assert!(matches!(err, InputError::InvalidGeometry(_)), "{err}");
    }

    #[test]
    fn test_rejects_hole_crossing_exterior() {
        let shell = square(100.0);
        let hole = LineString::from(vec![
            (300_050.0, 7_400_050.0),
            (300_150.0, 7_400_050.0),
            (300_150.0, 7_400_060.0),
            (300_050.0, 7_400_060.0),
            (300_050.0, 7_400_050.0),
        ]);
        let polygon = Polygon::new(shell.exterior().clone(), vec![hole]);
        assert!(matches!(
            validate(&Geometry::Polygon(polygon), utm()),
            Err(InputError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_rejects_degenerate_area() {
        let sliver = polygon![
            (x: 0.0, y: 0.0),
            (x: 100.0, y: 0.0),
            (x: 100.0, y: 0.001),
            (x: 0.0, y: 0.001),
        ];
        assert!(matches!(
            validate(&Geometry::Polygon(sliver), utm()),
            Err(InputError::DegenerateArea { .. })
        ));
    }

    #[test]
    fn test_rejects_too_few_vertices() {
        let line = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 0.0)];
        assert!(matches!(
            validate(&Geometry::Polygon(line), utm()),
            Err(InputError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_open_linestring_is_rejected() {
        let open = LineString::from(vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)]);
        assert!(matches!(
            validate(&Geometry::LineString(open), utm()),
            Err(InputError::InvalidGeometry(_))
        ));

        let closed = LineString::from(vec![
            (0.0, 0.0),
            (100.0, 0.0),
            (100.0, 100.0),
            (0.0, 100.0),
            (0.0, 0.0),
        ]);
        let (perimeter, _) = validate(&Geometry::LineString(closed), utm()).unwrap();
        assert!((perimeter.area_m2 - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_point_and_unknown_crs() {
        assert!(matches!(
            validate(&Geometry::Point(Point::new(0.0, 0.0)), utm()),
            Err(InputError::InvalidGeometry(_))
        ));
        assert!(matches!(
            validate(&Geometry::Polygon(square(100.0)), Crs::from_epsg(3857)),
            Err(InputError::UnknownCrs(_))
        ));
    }

    #[test]
    fn test_geographic_input_is_projected() {
        // roughly 0.01° x 0.01° near São Paulo: ~1020 m x ~1112 m
        let p = polygon![
            (x: -46.64, y: -23.56),
            (x: -46.63, y: -23.56),
            (x: -46.63, y: -23.55),
            (x: -46.64, y: -23.55),
        ];
        let (perimeter, _) = validate(&Geometry::Polygon(p), Crs::wgs84()).unwrap();
        assert_eq!(perimeter.frame.planar_crs().epsg(), 31983);
        let expected = 1020.4 * 1105.8;
        let error = (perimeter.area_m2 - expected).abs() / expected;
        assert!(error < 0.01, "area {} vs {}", perimeter.area_m2, expected);
    }

    #[test]
    fn test_multipolygon_keeps_largest_with_warning() {
        let small = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)];
        let large = square(100.0);
        let (perimeter, warnings) = validate(
            &Geometry::MultiPolygon(MultiPolygon::new(vec![small, large])),
            utm(),
        )
        .unwrap();
        assert!((perimeter.area_m2 - 10_000.0).abs() < 1e-6);
        assert!(warnings.contains(&DataQualityWarning::MultiPartPerimeter { parts: 2 }));
        assert!(!warnings
            .iter()
            .any(|w| matches!(w, DataQualityWarning::BelowLegalMinimumArea { .. })));
    }

    #[test]
    fn test_small_property_warns_below_legal_minimum() {
        let (perimeter, warnings) = validate(&Geometry::Polygon(square(40.0)), utm()).unwrap();
        assert!((perimeter.area_m2 - 1_600.0).abs() < 1e-6);
        match warnings.as_slice() {
            [DataQualityWarning::BelowLegalMinimumArea { area_m2, minimum_m2 }] => {
                assert!((area_m2 - 1_600.0).abs() < 1e-6);
                assert_eq!(*minimum_m2, 2_500.0);
            }
            other => panic!("unexpected warnings {other:?}"),
        }
    }

    #[test]
    fn test_dense_perimeter_is_simplified() {
        let n = 2000;
        let coords: Vec<(f64, f64)> = (0..n)
            .map(|i| {
                let angle = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
                (500.0 * angle.cos(), 500.0 * angle.sin())
            })
            .collect();
        let circle = Polygon::new(LineString::from(coords), vec![]);
        let config = EngineConfig::default();
        let mut warnings = Vec::new();
        let perimeter = GeometryValidator::new(&config)
            .validate(&Geometry::Polygon(circle), utm(), &mut warnings)
            .unwrap();
        assert!(perimeter.polygon.exterior().0.len() <= config.max_vertices);
        assert!(warnings
            .iter()
            .any(|w| matches!(w, DataQualityWarning::PerimeterSimplified { .. })));
        let expected = std::f64::consts::PI * 250_000.0;
        assert!((perimeter.area_m2 - expected).abs() / expected < 0.01);
    }
}
