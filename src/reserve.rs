//! Reserve Legal Allocator.
//!
//! Carves the Reserva Legal out of the part of the property not taken by APP.
//! Candidate shapes are produced by cutting the available region with a
//! growing rectangle (four axis sweeps and a square around an interior
//! point), each sized by bisection to the target area. Single-part candidates
//! win over multi-part ones, then candidates contiguous to the APP, then the
//! most compact.

use geo::{Area, BooleanOps, BoundingRect, Coord, InteriorPoint, MultiPolygon, Polygon, Rect};
use rstar::primitives::Line;
use rstar::{RTree, AABB};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use crate::app::AppGeometry;
use crate::config::EngineConfig;
use crate::error::{DataQualityWarning, LegalConstraintError};
use crate::geometry::{compactness, multi, rectangle, segment_distance, union_all, vertex_count};
use crate::rules::Biome;
use crate::validator::ValidPerimeter;

const MAX_ITERATIONS: usize = 60;
/// Components tried for a single-part reserve, largest first.
const MAX_COMPONENTS: usize = 4;
/// Boundary gap still counted as touching the APP.
const CONTIGUITY_M: f64 = 0.01;

/// `des_condic` of the RL layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReserveCondition {
    /// Area matches the requirement within tolerance.
    Proposta,
    /// Best effort fell outside the tolerance; needs manual review.
    PropostaIncompleta,
}

impl ReserveCondition {
    pub fn code(&self) -> &'static str {
        match self {
            ReserveCondition::Proposta => "PROPOSTA",
            ReserveCondition::PropostaIncompleta => "PROPOSTA_INCOMPLETA",
        }
    }
}

impl fmt::Display for ReserveCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReserveLegalGeometry {
    pub geometry: MultiPolygon<f64>,
    pub area_m2: f64,
    pub required_area_m2: f64,
    pub biome: Biome,
    pub condition: ReserveCondition,
}

impl ReserveLegalGeometry {
    /// Share of the property actually allocated.
    pub fn fraction_of(&self, perimeter: &ValidPerimeter) -> f64 {
        self.area_m2 / perimeter.area_m2
    }
}

#[derive(Debug, Clone, Copy)]
enum Cut {
    WestToEast,
    EastToWest,
    SouthToNorth,
    NorthToSouth,
    Square(Coord<f64>),
}

impl Cut {
    /// Region covered at growth parameter `t` in [0, 1]. Area of the cut grows
    /// monotonically with `t`.
    fn region(&self, bounds: &Rect<f64>, t: f64) -> Polygon<f64> {
        let (min, max) = (bounds.min(), bounds.max());
        let (w, h) = (bounds.width(), bounds.height());
        match *self {
            Cut::WestToEast => rectangle(min, Coord { x: min.x + t * w, y: max.y }),
            Cut::EastToWest => rectangle(Coord { x: max.x - t * w, y: min.y }, max),
            Cut::SouthToNorth => rectangle(min, Coord { x: max.x, y: min.y + t * h }),
            Cut::NorthToSouth => rectangle(Coord { x: min.x, y: max.y - t * h }, max),
            Cut::Square(c) => {
                let reach = (c.x - min.x)
                    .max(max.x - c.x)
                    .max(c.y - min.y)
                    .max(max.y - c.y);
                let s = t * reach;
                rectangle(
                    Coord { x: c.x - s, y: c.y - s },
                    Coord { x: c.x + s, y: c.y + s },
                )
            }
        }
    }
}

struct Candidate {
    cut: Cut,
    geometry: MultiPolygon<f64>,
    area_m2: f64,
    touches_app: bool,
}

impl Candidate {
    /// Single part first, then contiguous to the APP, then compactness.
    fn rank(&self) -> (u8, u8, f64, usize) {
        (
            u8::from(self.geometry.0.len() != 1),
            u8::from(!self.touches_app),
            -compactness(&self.geometry),
            vertex_count(&self.geometry),
        )
    }
}

/// Segment index over the APP boundary.
struct AppEdges {
    segments: RTree<Line<[f64; 2]>>,
}

impl AppEdges {
    fn new(app: &MultiPolygon<f64>) -> Self {
        let segments = app
            .iter()
            .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
            .flat_map(|ring| ring.lines())
            .map(|s| Line::new([s.start.x, s.start.y], [s.end.x, s.end.y]))
            .collect();
        Self {
            segments: RTree::bulk_load(segments),
        }
    }

    /// Whether any boundary segment of `geometry` lies within
    /// `CONTIGUITY_M` of the APP boundary.
    fn touch(&self, geometry: &MultiPolygon<f64>) -> bool {
        geometry
            .iter()
            .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
            .flat_map(|ring| ring.lines())
            .any(|s| {
                let envelope = AABB::from_corners(
                    [s.start.x.min(s.end.x) - CONTIGUITY_M, s.start.y.min(s.end.y) - CONTIGUITY_M],
                    [s.start.x.max(s.end.x) + CONTIGUITY_M, s.start.y.max(s.end.y) + CONTIGUITY_M],
                );
                self.segments
                    .locate_in_envelope_intersecting(&envelope)
                    .any(|edge| segment_distance(s.start, s.end, edge.from.into(), edge.to.into()) <= CONTIGUITY_M)
            })
    }
}

pub struct ReserveLegalAllocator<'a> {
    config: &'a EngineConfig,
}

impl<'a> ReserveLegalAllocator<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Allocates the Reserva Legal for `biome` outside `app` and `exclusions`.
    pub fn compute_reserve_legal(
        &self,
        perimeter: &ValidPerimeter,
        app: &AppGeometry,
        biome: Biome,
        exclusions: &[MultiPolygon<f64>],
        warnings: &mut Vec<DataQualityWarning>,
    ) -> Result<ReserveLegalGeometry, LegalConstraintError> {
        let target = biome.reserve_fraction() * perimeter.area_m2;
        let tolerance = self.config.reserve_tolerance * target;

        let mut available = perimeter.as_multi();
        if !app.is_empty() {
            available = available.difference(&app.geometry);
        }
        for exclusion in exclusions {
            available = available.difference(exclusion);
        }
        let available_area = available.unsigned_area();

        info!(
            "Reserva Legal for {}: {:.4} ha required, {:.4} ha available",
            biome,
            target / 10_000.0,
            available_area / 10_000.0
        );
        if available_area < target {
            return Err(LegalConstraintError::InsufficientArea {
                required_ha: target / 10_000.0,
                available_ha: available_area / 10_000.0,
            });
        }

        let mut components: Vec<Polygon<f64>> = available.0;
        components.sort_by(|a, b| b.unsigned_area().total_cmp(&a.unsigned_area()));

        let edges = (!app.is_empty()).then(|| AppEdges::new(&app.geometry));
        let geometry = match self.best_candidate(&components, target, tolerance, edges.as_ref()) {
            Some(candidate) => {
                debug!("Reserva Legal cut {:?}", candidate.cut);
                candidate.geometry
            }
            None => self.fragmented(&components, target, tolerance),
        };
        if geometry.0.len() > 1 {
            warn!("Reserva Legal split into {} parts", geometry.0.len());
            warnings.push(DataQualityWarning::ReserveFragmented {
                parts: geometry.0.len(),
            });
        }

        let area_m2 = geometry.unsigned_area();
        let condition = assess(area_m2, target, tolerance, warnings);
        info!(
            "Reserva Legal allocated: {:.4} ha in {} part(s), {}",
            area_m2 / 10_000.0,
            geometry.0.len(),
            condition
        );

        Ok(ReserveLegalGeometry {
            geometry,
            area_m2,
            required_area_m2: target,
            biome,
            condition,
        })
    }

    /// Best candidate from the components large enough to hold the target.
    fn best_candidate(
        &self,
        components: &[Polygon<f64>],
        target: f64,
        tolerance: f64,
        app: Option<&AppEdges>,
    ) -> Option<Candidate> {
        let mut candidates = Vec::new();
        for component in components
            .iter()
            .take(MAX_COMPONENTS)
            .filter(|c| c.unsigned_area() >= target)
        {
            let Some(bounds) = component.bounding_rect() else {
                continue;
            };
            let mut cuts = vec![Cut::WestToEast, Cut::EastToWest, Cut::SouthToNorth, Cut::NorthToSouth];
            if let Some(center) = component.interior_point() {
                cuts.push(Cut::Square(center.0));
            }
            let component = multi(component.clone());
            for cut in cuts {
                if let Some(geometry) = fit(&component, &bounds, cut, target, tolerance) {
                    let area_m2 = geometry.unsigned_area();
                    if (area_m2 - target).abs() <= tolerance {
                        let touches_app = app.map_or(false, |edges| edges.touch(&geometry));
                        candidates.push(Candidate {
                            cut,
                            geometry,
                            area_m2,
                            touches_app,
                        });
                    }
                }
            }
        }

        candidates.sort_by(|a, b| compare(&a.rank(), &b.rank()));
        if let Some(best) = candidates.first() {
            debug!(
                "{} candidates, best has {:.2} m², compactness {:.3}, next to APP: {}",
                candidates.len(),
                best.area_m2,
                -best.rank().2,
                best.touches_app
            );
        }
        candidates.into_iter().next()
    }

    /// Whole components largest first, the last one cut to size.
    fn fragmented(&self, components: &[Polygon<f64>], target: f64, tolerance: f64) -> MultiPolygon<f64> {
        let mut remaining = target;
        let mut pieces = Vec::new();
        for component in components {
            if remaining <= tolerance / 4.0 {
                break;
            }
            let area = component.unsigned_area();
            if area <= remaining {
                pieces.push(multi(component.clone()));
                remaining -= area;
                continue;
            }
            if let Some(bounds) = component.bounding_rect() {
                let component = multi(component.clone());
                if let Some(cut) = fit(&component, &bounds, Cut::WestToEast, remaining, tolerance) {
                    pieces.push(cut);
                }
            }
            break;
        }
        union_all(pieces)
    }
}

fn compare(a: &(u8, u8, f64, usize), b: &(u8, u8, f64, usize)) -> std::cmp::Ordering {
    a.0.cmp(&b.0)
        .then(a.1.cmp(&b.1))
        .then(a.2.total_cmp(&b.2))
        .then(a.3.cmp(&b.3))
}

/// `Proposta` within tolerance of the target, otherwise `PropostaIncompleta`
/// with a warning.
fn assess(
    area_m2: f64,
    target: f64,
    tolerance: f64,
    warnings: &mut Vec<DataQualityWarning>,
) -> ReserveCondition {
    if (area_m2 - target).abs() <= tolerance {
        return ReserveCondition::Proposta;
    }
    warn!(
        "Reserva Legal of {:.4} ha misses the {:.4} ha target",
        area_m2 / 10_000.0,
        target / 10_000.0
    );
    warnings.push(DataQualityWarning::ReserveIncomplete {
        area_m2,
        required_m2: target,
    });
    ReserveCondition::PropostaIncompleta
}

/// Allocates with the default configuration and no extra exclusions.
pub fn compute_reserve_legal(
    perimeter: &ValidPerimeter,
    app: &AppGeometry,
    biome: Biome,
) -> Result<(ReserveLegalGeometry, Vec<DataQualityWarning>), LegalConstraintError> {
    let config = EngineConfig::default();
    let mut warnings = Vec::new();
    let reserve = ReserveLegalAllocator::new(&config).compute_reserve_legal(
        perimeter,
        app,
        biome,
        &[],
        &mut warnings,
    )?;
    Ok((reserve, warnings))
}

/// Bisects the growth parameter of `cut` until the clipped area is close to
/// `target`. Returns the closest cut seen.
fn fit(
    component: &MultiPolygon<f64>,
    bounds: &Rect<f64>,
    cut: Cut,
    target: f64,
    tolerance: f64,
) -> Option<MultiPolygon<f64>> {
    let padded = Rect::new(
        Coord { x: bounds.min().x - 1.0, y: bounds.min().y - 1.0 },
        Coord { x: bounds.max().x + 1.0, y: bounds.max().y + 1.0 },
    );
    let (mut lo, mut hi) = (0.0, 1.0);
    let mut best: Option<(f64, MultiPolygon<f64>)> = None;

    for _ in 0..MAX_ITERATIONS {
        let t = 0.5 * (lo + hi);
        let clipped = component.intersection(&cut.region(&padded, t));
        let area = clipped.unsigned_area();
        let error = (area - target).abs();
        if best.as_ref().map_or(true, |(e, _)| error < *e) {
            best = Some((error, clipped));
        }
        if error <= tolerance / 4.0 {
            break;
        }
        if area < target {
            lo = t;
        } else {
            hi = t;
        }
    }
    best.map(|(_, geometry)| geometry)
}
