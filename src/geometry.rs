//! Planar geometry primitives shared by the engine.
//!
//! Buffers are built from convex pieces (circles around points, stadiums
//! around segments) and merged with `BooleanOps`. Boolean operations are only
//! ever applied pairwise between valid multipolygons, since the even-odd fill
//! rule would cancel out overlapping parts of a single operand.

use geo::{Area, BooleanOps, Coord, LineString, MultiPolygon, Polygon, RemoveRepeatedPoints};
use std::f64::consts::PI;

/// An empty multipolygon.
pub fn empty() -> MultiPolygon<f64> {
    MultiPolygon::new(vec![])
}

pub fn multi(polygon: Polygon<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![polygon])
}

/// Points along a circular arc, both ends included.
fn arc(center: Coord<f64>, radius: f64, start: f64, sweep: f64, steps: usize) -> Vec<Coord<f64>> {
    (0..=steps)
        .map(|i| {
            let angle = start + sweep * i as f64 / steps as f64;
            Coord {
                x: center.x + radius * angle.cos(),
                y: center.y + radius * angle.sin(),
            }
        })
        .collect()
}

/// A polygon approximating a circle, counter-clockwise.
pub fn circle(center: Coord<f64>, radius: f64, quadrant_segments: usize) -> Polygon<f64> {
    let n = 4 * quadrant_segments.max(1);
    let mut coords = arc(center, radius, 0.0, 2.0 * PI, n);
    coords.pop();
    Polygon::new(LineString::new(coords), vec![])
}

/// The set of points within `radius` of the segment `a`–`b`.
///
/// Both caps are half circles, so the shape is convex and valid for any
/// non-degenerate segment.
pub fn stadium(a: Coord<f64>, b: Coord<f64>, radius: f64, quadrant_segments: usize) -> Polygon<f64> {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    if dx == 0.0 && dy == 0.0 {
        return circle(a, radius, quadrant_segments);
    }
    let theta = dy.atan2(dx);
    let half = 2 * quadrant_segments.max(1);

    let mut coords = arc(b, radius, theta - PI / 2.0, PI, half);
    coords.extend(arc(a, radius, theta + PI / 2.0, PI, half));
    Polygon::new(LineString::new(coords), vec![])
}

/// Buffer around a polyline: union of one stadium per segment.
pub fn buffer_line(line: &LineString<f64>, radius: f64, quadrant_segments: usize) -> MultiPolygon<f64> {
    let pieces = line
        .lines()
        .map(|segment| multi(stadium(segment.start, segment.end, radius, quadrant_segments)))
        .collect();
    union_all(pieces)
}

/// Outward buffer of a polygon, including the polygon itself.
pub fn buffer_polygon(polygon: &Polygon<f64>, radius: f64, quadrant_segments: usize) -> MultiPolygon<f64> {
    let mut pieces = vec![multi(polygon.clone())];
    for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
        pieces.extend(
            ring.lines()
                .map(|segment| multi(stadium(segment.start, segment.end, radius, quadrant_segments))),
        );
    }
    union_all(pieces)
}

/// Unions any number of multipolygons by balanced pairwise reduction.
///
/// The pairing only depends on the input order, so the same input always
/// produces the same output.
pub fn union_all(mut parts: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    parts.retain(|p| !p.0.is_empty());
    while parts.len() > 1 {
        let mut next = Vec::with_capacity(parts.len() / 2 + 1);
        let mut iter = parts.into_iter();
        while let Some(left) = iter.next() {
            match iter.next() {
                Some(right) => next.push(left.union(&right)),
                None => next.push(left),
            }
        }
        parts = next;
    }
    parts.pop().unwrap_or_else(empty)
}

/// Rounds coordinates to a grid of `tolerance` and drops what collapses.
///
/// Removes the sub-millimetre slivers boolean operations leave behind along
/// shared edges. The final self-union repairs any touching rings the
/// rounding produced.
pub fn snap(geometry: &MultiPolygon<f64>, tolerance: f64) -> MultiPolygon<f64> {
    if tolerance <= 0.0 {
        return geometry.clone();
    }
    let round = |c: &Coord<f64>| Coord {
        x: (c.x / tolerance).round() * tolerance,
        y: (c.y / tolerance).round() * tolerance,
    };
    let snap_ring = |ring: &LineString<f64>| -> Option<LineString<f64>> {
        let snapped = LineString::new(ring.coords().map(round).collect()).remove_repeated_points();
        (snapped.0.len() >= 4).then_some(snapped)
    };

    let min_area = tolerance * tolerance;
    let polygons = geometry
        .iter()
        .filter_map(|polygon| {
            let exterior = snap_ring(polygon.exterior())?;
            let interiors = polygon.interiors().iter().filter_map(snap_ring).collect();
            let snapped = Polygon::new(exterior, interiors);
            (snapped.unsigned_area() > min_area).then_some(snapped)
        })
        .collect();

    MultiPolygon::new(polygons).union(&empty())
}

/// Axis-aligned rectangle polygon.
pub fn rectangle(min: Coord<f64>, max: Coord<f64>) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            (min.x, min.y),
            (max.x, min.y),
            (max.x, max.y),
            (min.x, max.y),
            (min.x, min.y),
        ]),
        vec![],
    )
}

pub fn ring_length(ring: &LineString<f64>) -> f64 {
    ring.lines().map(|l| l.dx().hypot(l.dy())).sum()
}

/// Total boundary length, holes included.
pub fn boundary_length(geometry: &MultiPolygon<f64>) -> f64 {
    geometry
        .iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
        .map(ring_length)
        .sum()
}

pub fn vertex_count(geometry: &MultiPolygon<f64>) -> usize {
    geometry
        .iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
        .map(|ring| ring.0.len())
        .sum()
}

/// Polsby-Popper compactness: 1 for a disc, towards 0 for slivers.
pub fn compactness(geometry: &MultiPolygon<f64>) -> f64 {
    let perimeter = boundary_length(geometry);
    if perimeter == 0.0 {
        return 0.0;
    }
    4.0 * PI * geometry.unsigned_area() / (perimeter * perimeter)
}

/// Distance from a point to a segment.
pub fn point_segment_distance(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0)
    };
    (p.x - (a.x + t * dx)).hypot(p.y - (a.y + t * dy))
}

fn cross(o: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Whether two closed segments share at least one point.
pub fn segments_intersect(a0: Coord<f64>, a1: Coord<f64>, b0: Coord<f64>, b1: Coord<f64>) -> bool {
    let d1 = cross(b0, b1, a0);
    let d2 = cross(b0, b1, a1);
    let d3 = cross(a0, a1, b0);
    let d4 = cross(a0, a1, b1);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    let on_segment = |p: Coord<f64>, q: Coord<f64>, r: Coord<f64>| {
        r.x >= p.x.min(q.x) && r.x <= p.x.max(q.x) && r.y >= p.y.min(q.y) && r.y <= p.y.max(q.y)
    };
    (d1 == 0.0 && on_segment(b0, b1, a0))
        || (d2 == 0.0 && on_segment(b0, b1, a1))
        || (d3 == 0.0 && on_segment(a0, a1, b0))
        || (d4 == 0.0 && on_segment(a0, a1, b1))
}

/// Distance between two segments.
pub fn segment_distance(a0: Coord<f64>, a1: Coord<f64>, b0: Coord<f64>, b1: Coord<f64>) -> f64 {
    if segments_intersect(a0, a1, b0, b1) {
        return 0.0;
    }
    point_segment_distance(a0, b0, b1)
        .min(point_segment_distance(a1, b0, b1))
        .min(point_segment_distance(b0, a0, a1))
        .min(point_segment_distance(b1, a0, a1))
}
