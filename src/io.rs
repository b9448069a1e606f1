//! GeoJSON boundary: reading the perimeter and hydrology features, writing
//! the output layers and the run report.

use geo::{Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry as GeoJsonGeometry, JsonObject, Value as GeoJsonValue};
use serde_json::{json, Value as JsonValue};
use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::crs::Crs;
use crate::error::{InputError, Result};
use crate::hydrology::{AttributeValue, RawFeature};
use crate::pipeline::{OutputLayer, PipelineOutput};

pub const REPORT_FILE: &str = "report.json";

/// Features of one GeoJSON file, plus the CRS it declares, if any.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub features: Vec<RawFeature>,
    pub crs: Option<Crs>,
    /// Features that could not be read, by position in the file.
    pub rejected: Vec<(usize, InputError)>,
}

/// Reads a FeatureCollection, a single Feature or a bare Geometry.
///
/// Collection entries are decoded one at a time, so a malformed feature is
/// rejected on its own instead of failing the whole file.
pub fn load_features(path: &Path) -> Result<LoadedFile> {
    info!("Loading file: {}", path.display());
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let value: JsonValue = serde_json::from_reader(reader)?;

    let (entries, members) = match value {
        JsonValue::Object(mut object)
            if object.get("type").and_then(JsonValue::as_str) == Some("FeatureCollection")
                && object.get("features").map_or(false, JsonValue::is_array) =>
        {
            let entries = match object.remove("features") {
                Some(JsonValue::Array(entries)) => entries,
                _ => Vec::new(),
            };
            object.remove("type");
            object.remove("bbox");
            let entries = entries.into_iter().map(Feature::from_json_value).collect();
            (entries, Some(object))
        }
        other => match GeoJson::from_json_value(other)? {
            GeoJson::FeatureCollection(fc) => (fc.features.into_iter().map(Ok).collect(), fc.foreign_members),
            GeoJson::Feature(f) => {
                let members = f.foreign_members.clone();
                (vec![Ok(f)], members)
            }
            GeoJson::Geometry(g) => (
                vec![Ok(Feature {
                    bbox: None,
                    geometry: Some(g),
                    id: None,
                    properties: None,
                    foreign_members: None,
                })],
                None,
            ),
        },
    };
    let total = entries.len();
    debug!("Found {} features in file", total);

    let mut loaded = Vec::with_capacity(total);
    let mut rejected = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        let feature = match entry {
            Ok(feature) => feature,
            Err(e) => {
                warn!("Feature {} is not valid GeoJSON, skipped: {}", index, e);
                rejected.push((index, InputError::InvalidGeometry(e.to_string())));
                continue;
            }
        };
        let Some(geometry) = feature.geometry else {
            debug!("Feature {} has no geometry", index);
            continue;
        };
        let geometry = match to_geo(&geometry.value) {
            Ok(geometry) => geometry,
            Err(e) => {
                warn!("Feature {} skipped: {}", index, e);
                rejected.push((index, e));
                continue;
            }
        };
        let attributes = feature
            .properties
            .iter()
            .flatten()
            .map(|(k, v)| (k.clone(), AttributeValue::from(v)))
            .collect();
        loaded.push(RawFeature { geometry, attributes });
    }
    info!("Loaded {} of {} features", loaded.len(), total);

    Ok(LoadedFile {
        features: loaded,
        crs: members.as_ref().and_then(declared_crs),
        rejected,
    })
}

/// The polygonal part of a perimeter file. Several polygon features are
/// combined; the validator keeps the largest.
pub fn load_perimeter(path: &Path) -> Result<(Geometry<f64>, Option<Crs>)> {
    let loaded = load_features(path)?;
    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    let mut rings: Vec<LineString<f64>> = Vec::new();
    for feature in loaded.features {
        match feature.geometry {
            Geometry::Polygon(p) => polygons.push(p),
            Geometry::MultiPolygon(mp) => polygons.extend(mp.0),
            Geometry::LineString(ls) => rings.push(ls),
            _ => {}
        }
    }
    let geometry = match (polygons.len(), rings.len()) {
        (0, 0) => {
            return Err(match loaded.rejected.into_iter().next() {
                Some((_, e)) => e.into(),
                None => InputError::NoPerimeter.into(),
            })
        }
        (1, _) => Geometry::Polygon(polygons.remove(0)),
        (0, _) => Geometry::LineString(rings.remove(0)),
        _ => Geometry::MultiPolygon(MultiPolygon::new(polygons)),
    };
    Ok((geometry, loaded.crs))
}

/// Writes each layer as `<NAME>.geojson` and the run report into
/// `output_dir`. Returns the written paths.
pub fn write_layers(output: &PipelineOutput, output_dir: &Path) -> Result<Vec<PathBuf>> {
    create_dir_all(output_dir)?;
    let mut written = Vec::with_capacity(output.layers.len() + 1);

    for layer in &output.layers {
        let path = output_dir.join(format!("{}.geojson", layer.name));
        write_layer(layer, &path)?;
        info!("Wrote {} ({} features)", path.display(), layer.features.len());
        written.push(path);
    }

    let report_path = output_dir.join(REPORT_FILE);
    let file = BufWriter::new(File::create(&report_path)?);
    serde_json::to_writer_pretty(file, &output.report())?;
    info!("Wrote {}", report_path.display());
    written.push(report_path);

    Ok(written)
}

pub fn write_layer(layer: &OutputLayer, path: &Path) -> Result<()> {
    let features: Vec<Feature> = layer
        .features
        .iter()
        .map(|f| Feature {
            bbox: None,
            geometry: Some(GeoJsonGeometry::new(geojson_value(&f.geometry))),
            id: None,
            properties: Some(f.properties.clone()),
            foreign_members: None,
        })
        .collect();

    let mut members = JsonObject::new();
    members.insert(
        "crs".to_string(),
        json!({ "type": "name", "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", layer.crs.epsg()) } }),
    );
    members.insert("name".to_string(), json!(layer.name));

    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(members),
    };
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(file, &collection)?;
    Ok(())
}

/// Reads a legacy `crs` member such as `urn:ogc:def:crs:EPSG::31983` or
/// `EPSG:4674`. `CRS84` maps to WGS 84.
fn declared_crs(members: &JsonObject) -> Option<Crs> {
    let name = members.get("crs")?.get("properties")?.get("name")?.as_str()?;
    if name.ends_with("CRS84") {
        return Some(Crs::wgs84());
    }
    name.rsplit(':').next()?.parse::<u32>().ok().map(Crs::from_epsg)
}

fn position(p: &[f64]) -> std::result::Result<Coord<f64>, InputError> {
    match p {
        [x, y, ..] => Ok(Coord { x: *x, y: *y }),
        _ => Err(InputError::InvalidGeometry(format!(
            "position with {} coordinate(s)",
            p.len()
        ))),
    }
}

fn line(coords: &[Vec<f64>]) -> std::result::Result<LineString<f64>, InputError> {
    coords
        .iter()
        .map(|p| position(p))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(LineString::new)
}

/// Rings must be closed as written; `Polygon::new` would close them silently.
fn ring(coords: &[Vec<f64>]) -> std::result::Result<LineString<f64>, InputError> {
    let ring = line(coords)?;
    match (ring.0.first(), ring.0.last()) {
        (Some(first), Some(last)) if first == last => Ok(ring),
        (Some(first), Some(last)) => Err(InputError::InvalidGeometry(format!(
            "polygon ring is not closed: starts at ({}, {}), ends at ({}, {})",
            first.x, first.y, last.x, last.y
        ))),
        _ => Err(InputError::InvalidGeometry("empty polygon ring".into())),
    }
}

fn polygon(rings: &[Vec<Vec<f64>>]) -> std::result::Result<Polygon<f64>, InputError> {
    let (exterior, holes) = rings
        .split_first()
        .ok_or_else(|| InputError::InvalidGeometry("polygon without rings".into()))?;
    let holes = holes.iter().map(|r| ring(r)).collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Polygon::new(ring(exterior)?, holes))
}

fn to_geo(value: &GeoJsonValue) -> std::result::Result<Geometry<f64>, InputError> {
    let geometry = match value {
        GeoJsonValue::Point(p) => Geometry::Point(Point::from(position(p)?)),
        GeoJsonValue::MultiPoint(ps) => Geometry::MultiPoint(MultiPoint::new(
            ps.iter()
                .map(|p| position(p).map(Point::from))
                .collect::<std::result::Result<Vec<_>, _>>()?,
        )),
        GeoJsonValue::LineString(coords) => Geometry::LineString(line(coords)?),
        GeoJsonValue::MultiLineString(lines) => Geometry::MultiLineString(MultiLineString::new(
            lines.iter().map(|l| line(l)).collect::<std::result::Result<Vec<_>, _>>()?,
        )),
        GeoJsonValue::Polygon(rings) => Geometry::Polygon(polygon(rings)?),
        GeoJsonValue::MultiPolygon(polys) => Geometry::MultiPolygon(MultiPolygon::new(
            polys.iter().map(|p| polygon(p)).collect::<std::result::Result<Vec<_>, _>>()?,
        )),
        GeoJsonValue::GeometryCollection(geoms) => Geometry::GeometryCollection(GeometryCollection::new_from(
            geoms
                .iter()
                .map(|g| to_geo(&g.value))
                .collect::<std::result::Result<Vec<_>, _>>()?,
        )),
    };
    Ok(geometry)
}

fn position_value(c: &Coord<f64>) -> Vec<f64> {
    vec![c.x, c.y]
}

fn line_value(line: &LineString<f64>) -> Vec<Vec<f64>> {
    line.coords().map(position_value).collect()
}

fn polygon_value(polygon: &Polygon<f64>) -> Vec<Vec<Vec<f64>>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(line_value)
        .collect()
}

fn geojson_value(geometry: &Geometry<f64>) -> GeoJsonValue {
    match geometry {
        Geometry::Point(p) => GeoJsonValue::Point(position_value(&p.0)),
        Geometry::MultiPoint(mp) => GeoJsonValue::MultiPoint(mp.iter().map(|p| position_value(&p.0)).collect()),
        Geometry::Line(l) => GeoJsonValue::LineString(vec![position_value(&l.start), position_value(&l.end)]),
        Geometry::LineString(l) => GeoJsonValue::LineString(line_value(l)),
        Geometry::MultiLineString(ml) => GeoJsonValue::MultiLineString(ml.iter().map(line_value).collect()),
        Geometry::Polygon(p) => GeoJsonValue::Polygon(polygon_value(p)),
        Geometry::MultiPolygon(mp) => GeoJsonValue::MultiPolygon(mp.iter().map(polygon_value).collect()),
        Geometry::Rect(r) => GeoJsonValue::Polygon(polygon_value(&r.to_polygon())),
        Geometry::Triangle(t) => GeoJsonValue::Polygon(polygon_value(&t.to_polygon())),
        Geometry::GeometryCollection(gc) => GeoJsonValue::GeometryCollection(
            gc.iter().map(|g| GeoJsonGeometry::new(geojson_value(g))).collect(),
        ),
    }
}
