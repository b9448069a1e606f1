//! Coordinate reference systems and the geographic ↔ UTM transform.
//!
//! Area and distance rules are all expressed in meters, so every geometry is
//! moved into a UTM zone before the engine touches it. The projection is the
//! Krüger series form of the transverse Mercator on the GRS 80 ellipsoid
//! (SIRGAS 2000), which is sub-millimetre accurate across a zone. WGS 84 and
//! SAD69 inputs are treated as SIRGAS 2000; the datum shift is well below the
//! digitizing error of a hand-drawn perimeter.

use geo::{BoundingRect, Coord, Geometry, MapCoords};
use std::fmt;
use std::str::FromStr;

use crate::error::InputError;

const A: f64 = 6_378_137.0;
const F: f64 = 1.0 / 298.257_222_101;
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// EPSG codes accepted as geographic (lon/lat degrees).
const GEOGRAPHIC_CODES: [u32; 3] = [4326, 4674, 4618];

/// A coordinate reference system identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs {
    epsg: u32,
}

/// What the engine knows how to do with a CRS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrsKind {
    Geographic,
    Utm(UtmZone),
}

impl Crs {
    pub fn from_epsg(code: u32) -> Self {
        Self { epsg: code }
    }

    /// WGS 84 geographic (EPSG:4326), the CRS of KML input.
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    /// SIRGAS 2000 geographic (EPSG:4674), the official Brazilian datum.
    pub fn sirgas2000() -> Self {
        Self::from_epsg(4674)
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    pub fn kind(&self) -> Option<CrsKind> {
        if GEOGRAPHIC_CODES.contains(&self.epsg) {
            return Some(CrsKind::Geographic);
        }
        UtmZone::from_epsg(self.epsg).map(CrsKind::Utm)
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self.kind(), Some(CrsKind::Geographic))
    }

    pub fn identifier(&self) -> String {
        format!("EPSG:{}", self.epsg)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl Default for Crs {
    fn default() -> Self {
        Self::wgs84()
    }
}

impl FromStr for Crs {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let code = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);
        code.parse::<u32>()
            .map(Crs::from_epsg)
            .map_err(|_| InputError::UnknownCrs(s.to_string()))
    }
}

/// A UTM zone on the GRS 80 ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtmZone {
    pub zone: u8,
    pub south: bool,
}

impl UtmZone {
    pub fn new(zone: u8, south: bool) -> Self {
        Self { zone, south }
    }

    /// The zone containing a geographic coordinate.
    pub fn for_lon_lat(lon: f64, lat: f64) -> Result<Self, InputError> {
        if !(-180.0..=180.0).contains(&lon) || !(-80.0..=84.0).contains(&lat) {
            return Err(InputError::UnknownCrs(format!(
                "({lon}, {lat}) is outside the UTM domain"
            )));
        }
        let zone = (((lon + 180.0) / 6.0).floor() as u8 + 1).min(60);
        Ok(Self::new(zone, lat < 0.0))
    }

    /// Parses WGS 84 UTM (326zz / 327zz) and SIRGAS 2000 UTM south
    /// (31977–31985, zones 17S–25S) codes.
    pub fn from_epsg(code: u32) -> Option<Self> {
        match code {
            32601..=32660 => Some(Self::new((code - 32600) as u8, false)),
            32701..=32760 => Some(Self::new((code - 32700) as u8, true)),
            31977..=31985 => Some(Self::new((code - 31960) as u8, true)),
            _ => None,
        }
    }

    /// The EPSG code of this zone, preferring the SIRGAS 2000 series.
    pub fn epsg(&self) -> u32 {
        match (self.south, self.zone) {
            (true, 17..=25) => 31960 + self.zone as u32,
            (true, z) => 32700 + z as u32,
            (false, z) => 32600 + z as u32,
        }
    }

    pub fn central_meridian(&self) -> f64 {
        self.zone as f64 * 6.0 - 183.0
    }

    fn false_northing(&self) -> f64 {
        if self.south {
            FALSE_NORTHING_SOUTH
        } else {
            0.0
        }
    }

    /// Geographic degrees to easting/northing in meters.
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let s = Series::grs80();
        let phi = lat.to_radians();
        let dlambda = (lon - self.central_meridian()).to_radians();

        let e = s.e;
        let t = (phi.sin().atanh() - e * (e * phi.sin()).atanh()).sinh();
        let xi_p = (t / dlambda.cos()).atan();
        let eta_p = (dlambda.sin() / (1.0 + t * t).sqrt()).atanh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, alpha) in s.alpha.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi += alpha * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += alpha * (k * xi_p).cos() * (k * eta_p).sinh();
        }

        (
            FALSE_EASTING + K0 * s.big_a * eta,
            self.false_northing() + K0 * s.big_a * xi,
        )
    }

    /// Easting/northing in meters back to geographic degrees.
    pub fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let s = Series::grs80();
        let xi = (northing - self.false_northing()) / (K0 * s.big_a);
        let eta = (easting - FALSE_EASTING) / (K0 * s.big_a);

        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, beta) in s.beta.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi_p -= beta * (k * xi).sin() * (k * eta).cosh();
            eta_p -= beta * (k * xi).cos() * (k * eta).sinh();
        }

        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let mut phi = chi;
        for (j, delta) in s.delta.iter().enumerate() {
            phi += delta * (2.0 * (j + 1) as f64 * chi).sin();
        }
        let dlambda = (eta_p.sinh() / xi_p.cos()).atan();

        (self.central_meridian() + dlambda.to_degrees(), phi.to_degrees())
    }
}

impl fmt::Display for UtmZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UTM {}{}", self.zone, if self.south { 'S' } else { 'N' })
    }
}

/// Fourth-order Krüger coefficients.
struct Series {
    e: f64,
    big_a: f64,
    alpha: [f64; 4],
    beta: [f64; 4],
    delta: [f64; 4],
}

impl Series {
    fn grs80() -> Self {
        let n = F / (2.0 - F);
        let n2 = n * n;
        let n3 = n2 * n;
        let n4 = n3 * n;
        Self {
            e: (F * (2.0 - F)).sqrt(),
            big_a: A / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0),
            alpha: [
                n / 2.0 - 2.0 / 3.0 * n2 + 5.0 / 16.0 * n3 + 41.0 / 180.0 * n4,
                13.0 / 48.0 * n2 - 3.0 / 5.0 * n3 + 557.0 / 1440.0 * n4,
                61.0 / 240.0 * n3 - 103.0 / 140.0 * n4,
                49561.0 / 161280.0 * n4,
            ],
            beta: [
                n / 2.0 - 2.0 / 3.0 * n2 + 37.0 / 96.0 * n3 - 1.0 / 360.0 * n4,
                1.0 / 48.0 * n2 + 1.0 / 15.0 * n3 - 437.0 / 1440.0 * n4,
                17.0 / 480.0 * n3 - 37.0 / 840.0 * n4,
                4397.0 / 161280.0 * n4,
            ],
            delta: [
                2.0 * n - 2.0 / 3.0 * n2 - 2.0 * n3 + 116.0 / 45.0 * n4,
                7.0 / 3.0 * n2 - 8.0 / 5.0 * n3 - 227.0 / 45.0 * n4,
                56.0 / 15.0 * n3 - 136.0 / 35.0 * n4,
                4279.0 / 630.0 * n4,
            ],
        }
    }
}

/// The planar working frame of one run: where the input came from and which
/// UTM zone the engine computes in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanarFrame {
    pub source: Crs,
    pub zone: UtmZone,
}

impl PlanarFrame {
    /// Chooses the working zone for a geometry expressed in `source`.
    ///
    /// Geographic input uses the zone of its bounding-box center; UTM input
    /// stays in its own zone.
    pub fn for_geometry(source: Crs, geometry: &Geometry<f64>) -> Result<Self, InputError> {
        match source.kind() {
            Some(CrsKind::Utm(zone)) => Ok(Self { source, zone }),
            Some(CrsKind::Geographic) => {
                let rect = geometry.bounding_rect().ok_or_else(|| {
                    InputError::InvalidGeometry("empty geometry has no extent".into())
                })?;
                let center = rect.center();
                let zone = UtmZone::for_lon_lat(center.x, center.y)?;
                Ok(Self { source, zone })
            }
            None => Err(InputError::UnknownCrs(source.identifier())),
        }
    }

    pub fn needs_projection(&self) -> bool {
        self.source.is_geographic()
    }

    /// The CRS the engine computes in.
    pub fn planar_crs(&self) -> Crs {
        Crs::from_epsg(self.zone.epsg())
    }

    /// The geographic CRS output layers are expressed in.
    pub fn output_crs(&self) -> Crs {
        if self.source.is_geographic() {
            self.source
        } else {
            Crs::sirgas2000()
        }
    }

    /// Moves a geometry from the source CRS into the working zone.
    pub fn to_planar<G>(&self, geometry: &G) -> Result<G, InputError>
    where
        G: MapCoords<f64, f64, Output = G> + Clone,
    {
        if !self.needs_projection() {
            return Ok(geometry.clone());
        }
        let zone = self.zone;
        geometry.try_map_coords(move |c: Coord<f64>| {
            if !(-180.0..=180.0).contains(&c.x) || !(-90.0..=90.0).contains(&c.y) {
                return Err(InputError::UnknownCrs(format!(
                    "coordinate ({}, {}) is not a valid longitude/latitude",
                    c.x, c.y
                )));
            }
            let (x, y) = zone.forward(c.x, c.y);
            Ok(Coord { x, y })
        })
    }

    /// Moves a planar geometry to the geographic output CRS.
    pub fn to_geographic<G>(&self, geometry: &G) -> G
    where
        G: MapCoords<f64, f64, Output = G>,
    {
        let zone = self.zone;
        geometry.map_coords(move |c: Coord<f64>| {
            let (x, y) = zone.inverse(c.x, c.y);
            Coord { x, y }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{point, Point};

    #[test]
    fn test_crs_parse() {
        assert_eq!("EPSG:4326".parse::<Crs>().unwrap(), Crs::wgs84());
        assert_eq!("31983".parse::<Crs>().unwrap().epsg(), 31983);
        assert!("WGS84".parse::<Crs>().is_err());
    }

    #[test]
    fn test_crs_kind() {
        assert_eq!(Crs::wgs84().kind(), Some(CrsKind::Geographic));
        assert_eq!(
            Crs::from_epsg(31983).kind(),
            Some(CrsKind::Utm(UtmZone::new(23, true)))
        );
        assert_eq!(
            Crs::from_epsg(32722).kind(),
            Some(CrsKind::Utm(UtmZone::new(22, true)))
        );
        assert_eq!(Crs::from_epsg(3857).kind(), None);
    }

    #[test]
    fn test_zone_selection() {
        let zone = UtmZone::for_lon_lat(-46.63, -23.55).unwrap();
        assert_eq!(zone, UtmZone::new(23, true));
        assert_eq!(zone.epsg(), 31983);
        assert_eq!(zone.central_meridian(), -45.0);

        let north = UtmZone::for_lon_lat(-60.7, 2.8).unwrap();
        assert_eq!(north.epsg(), 32620);
    }

    #[test]
    fn test_forward_on_central_meridian() {
        let zone = UtmZone::new(23, true);
        let (e, n) = zone.forward(-45.0, 0.0);
        assert!((e - 500_000.0).abs() < 1e-6);
        assert!((n - 10_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_forward_meridian_arc() {
        // One degree of meridian arc at the equator on GRS 80 is 110574.3 m.
        let zone = UtmZone::new(23, true);
        let (_, n0) = zone.forward(-45.0, 0.0);
        let (_, n1) = zone.forward(-45.0, -1.0);
        let expected = 110_574.3 * K0;
        assert!(
            ((n0 - n1) - expected).abs() < 1.0,
            "meridian arc {} vs {}",
            n0 - n1,
            expected
        );
    }

    #[test]
    fn test_round_trip() {
        let zone = UtmZone::new(23, true);
        for &(lon, lat) in &[(-46.63, -23.55), (-44.1, -21.0), (-47.9, -25.2)] {
            let (e, n) = zone.forward(lon, lat);
            let (lon2, lat2) = zone.inverse(e, n);
            // 1e-8 degrees is about a millimetre
            assert!((lon - lon2).abs() < 1e-8, "lon {lon} -> {lon2}");
            assert!((lat - lat2).abs() < 1e-8, "lat {lat} -> {lat2}");
        }
    }

    #[test]
    fn test_frame_projects_geographic_only() {
        let geographic = Geometry::Point(point!(x: -46.63, y: -23.55));
        let frame = PlanarFrame::for_geometry(Crs::wgs84(), &geographic).unwrap();
        assert!(frame.needs_projection());
        assert_eq!(frame.planar_crs().epsg(), 31983);

        let p: Point<f64> = frame.to_planar(&point!(x: -46.63, y: -23.55)).unwrap();
        assert!(p.x() > 100_000.0 && p.y() > 7_000_000.0);

        let utm = Geometry::Point(point!(x: 330_000.0, y: 7_395_000.0));
        let frame = PlanarFrame::for_geometry(Crs::from_epsg(31983), &utm).unwrap();
        assert!(!frame.needs_projection());
        assert_eq!(frame.output_crs(), Crs::sirgas2000());
    }

    #[test]
    fn test_frame_rejects_projected_coordinates_declared_geographic() {
        let frame = PlanarFrame {
            source: Crs::wgs84(),
            zone: UtmZone::new(23, true),
        };
        let bad = point!(x: 330_000.0, y: 7_395_000.0);
        assert!(matches!(frame.to_planar(&bad), Err(InputError::UnknownCrs(_))));
    }

    #[test]
    fn test_unknown_crs() {
        let g = Geometry::Point(point!(x: 0.0, y: 0.0));
        assert!(matches!(
            PlanarFrame::for_geometry(Crs::from_epsg(3857), &g),
            Err(InputError::UnknownCrs(_))
        ));
    }
}
