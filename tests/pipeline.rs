use car_generator::io::{load_features, load_perimeter, write_layers, REPORT_FILE};
use car_generator::pipeline::{LAYER_APP, LAYER_AREA_IMOVEL, LAYER_HIDROGRAFIA, LAYER_RESERVA_LEGAL};
use car_generator::{
    process_files, AttributeValue, Crs, DataQualityWarning, EngineConfig, Error, InputError,
    LegalConstraintError, Pipeline, PipelineInput, PipelineOutput, PropertyInfo, RawFeature,
    ReserveCondition, RunOptions,
};
use geo::{line_string, point, polygon, Area, BooleanOps, Geometry};
use std::f64::consts::PI;
use std::fs;

const X0: f64 = 300_000.0;
const Y0: f64 = 7_400_000.0;

fn hundred_hectares() -> Geometry<f64> {
    Geometry::Polygon(polygon![
        (x: X0, y: Y0),
        (x: X0 + 1000.0, y: Y0),
        (x: X0 + 1000.0, y: Y0 + 1000.0),
        (x: X0, y: Y0 + 1000.0),
    ])
}

fn utm() -> Crs {
    Crs::from_epsg(31983)
}

fn river(y: f64, x0: f64, x1: f64, width_m: f64) -> RawFeature {
    RawFeature::new(line_string![(x: X0 + x0, y: Y0 + y), (x: X0 + x1, y: Y0 + y)])
        .with_attribute("largura_m", AttributeValue::Float(width_m))
}

fn run(hydrology: Vec<RawFeature>, biome: &str) -> Result<PipelineOutput, Error> {
    Pipeline::default().run(PipelineInput::new(hundred_hectares(), utm(), biome).with_hydrology(hydrology))
}

fn relative_error(actual: f64, expected: f64) -> f64 {
    (actual - expected).abs() / expected
}

#[test]
fn test_single_river_in_mata_atlantica() {
    // 500 m segment of an 8 m river, upstream end outside the property
    let mut feature = river(500.0, -200.0, 300.0, 8.0);
    feature = feature.with_attribute("nome", AttributeValue::Text("Córrego da Mata".into()));
    let output = run(vec![feature], "Mata Atlântica").unwrap();

    // 30 m each side, rounded cap at the inner end, clipped at the west edge
    let expected_app = 300.0 * 60.0 + PI * 900.0 / 2.0;
    assert!(
        relative_error(output.app.area_m2(), expected_app) < 0.01,
        "APP {} m² vs {} m²",
        output.app.area_m2(),
        expected_app
    );

    assert!(relative_error(output.reserve.area_m2, 200_000.0) < 0.01);
    assert_eq!(output.reserve.condition, ReserveCondition::Proposta);
    let overlap = output.reserve.geometry.intersection(&output.app.geometry);
    assert!(overlap.unsigned_area() < 1.0);

    let boundary = output.perimeter.as_multi();
    assert!(output.app.geometry.difference(&boundary).unsigned_area() < 1e-3);
    assert!(output.reserve.geometry.difference(&boundary).unsigned_area() < 1e-3);

    assert!(output.layer(LAYER_APP).is_some());
    let app_layer = output.layer(LAYER_APP).unwrap();
    assert_eq!(app_layer.features[0].properties["tip_app"], "MARGEM_CURSO_DAGUA");
}

#[test]
fn test_unknown_biome_is_input_error() {
    let result = run(vec![river(500.0, 0.0, 1000.0, 8.0)], "Caatinga");
    assert!(matches!(
        result,
        Err(Error::Input(InputError::UnknownBiome(_)))
    ));
}

#[test]
fn test_app_taking_85_percent_blocks_reserve() {
    // two wide rivers just outside the property, 500 m APP each
    let hydrology = vec![river(-75.0, -600.0, 1600.0, 700.0), river(1075.0, -600.0, 1600.0, 700.0)];
    match run(hydrology, "MATA_ATLANTICA") {
        Err(Error::LegalConstraint(LegalConstraintError::InsufficientArea {
            required_ha,
            available_ha,
        })) => {
            assert!((required_ha - 20.0).abs() < 1e-6);
            assert!(available_ha < required_ha);
        }
        other => panic!("expected a legal constraint error, got {:?}", other.map(|o| o.warnings)),
    }
}

#[test]
fn test_empty_hydrology_completes_with_warning() {
    let output = run(Vec::new(), "CERRADO").unwrap();
    assert!(output.app.is_empty());
    assert!(output.warnings.contains(&DataQualityWarning::NoHydrologySource));
    assert!(output.layer(LAYER_APP).is_none());
    assert!(relative_error(output.reserve.area_m2, 200_000.0) < 0.01);

    let without_source = Pipeline::default()
        .run(PipelineInput::new(hundred_hectares(), utm(), "CERRADO"))
        .unwrap();
    assert!(without_source.warnings.contains(&DataQualityWarning::NoHydrologySource));
}

#[test]
fn test_every_biome_meets_its_percentage() {
    let hydrology = vec![river(500.0, 0.0, 1000.0, 8.0)];
    for (biome, fraction) in [("MATA_ATLANTICA", 0.2), ("CERRADO", 0.2), ("AMAZONIA", 0.8)] {
        let output = run(hydrology.clone(), biome).unwrap();
        let expected = fraction * output.perimeter.area_m2;
        assert!(
            relative_error(output.reserve.area_m2, expected) < 0.01,
            "{biome}: {} vs {}",
            output.reserve.area_m2,
            expected
        );
        let overlap = output.reserve.geometry.intersection(&output.app.geometry).unsigned_area();
        assert!(overlap < 1.0, "{biome}: overlap {overlap}");
    }
}

#[test]
fn test_pipeline_is_idempotent() {
    let hydrology = vec![
        river(300.0, -100.0, 700.0, 25.0),
        RawFeature::new(point!(x: X0 + 800.0, y: Y0 + 800.0)),
    ];
    let a = run(hydrology.clone(), "CERRADO").unwrap();
    let b = run(hydrology, "CERRADO").unwrap();
    assert_eq!(a.app.geometry, b.app.geometry);
    assert_eq!(a.reserve.geometry, b.reserve.geometry);
    assert_eq!(a.warnings, b.warnings);
}

#[test]
fn test_adding_a_feature_never_shrinks_app() {
    let mut hydrology = vec![river(200.0, -100.0, 600.0, 8.0)];
    let mut previous = run(hydrology.clone(), "AMAZONIA").map(|o| o.app.area_m2()).unwrap_or(0.0);
    let additions = [
        RawFeature::new(point!(x: X0 + 700.0, y: Y0 + 700.0)),
        river(600.0, 300.0, 1200.0, 30.0),
        RawFeature::new(point!(x: X0 + 210.0, y: Y0 + 210.0)),
    ];
    for feature in additions {
        hydrology.push(feature);
        let config = EngineConfig::default();
        let perimeter = car_generator::validator::GeometryValidator::new(&config)
            .validate(&hundred_hectares(), utm(), &mut Vec::new())
            .unwrap();
        let (features, _) = car_generator::classify(&hydrology, &perimeter);
        let (app, _) = car_generator::compute_app(&features, &perimeter);
        assert!(
            app.area_m2() >= previous - 1e-3,
            "APP shrank from {previous} to {}",
            app.area_m2()
        );
        previous = app.area_m2();
    }
}

#[test]
fn test_geographic_perimeter() {
    let perimeter = Geometry::Polygon(polygon![
        (x: -47.06, y: -22.90),
        (x: -47.05, y: -22.90),
        (x: -47.05, y: -22.89),
        (x: -47.06, y: -22.89),
    ]);
    let output = Pipeline::default()
        .run(PipelineInput::new(perimeter, Crs::wgs84(), "MATA_ATLANTICA"))
        .unwrap();
    assert_eq!(output.perimeter.frame.planar_crs(), Crs::from_epsg(31983));
    assert!(output.area.area_ha > 100.0 && output.area.area_ha < 130.0);

    let layer = output.layer(LAYER_AREA_IMOVEL).unwrap();
    assert_eq!(layer.crs, Crs::wgs84());
    let Geometry::MultiPolygon(outline) = &layer.features[0].geometry else {
        panic!("unexpected geometry {:?}", layer.features[0].geometry);
    };
    let corner = outline.0[0].exterior().0[0];
    assert!((corner.x + 47.06).abs() < 1e-6 && (corner.y + 22.90).abs() < 1e-6, "{corner:?}");
}

#[test]
fn test_export_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let output = Pipeline::default()
        .run(
            PipelineInput::new(hundred_hectares(), utm(), "CERRADO")
                .with_hydrology(vec![river(500.0, 0.0, 1000.0, 12.0)])
                .with_property(PropertyInfo {
                    name: "Fazenda Santa Luzia".into(),
                    ..PropertyInfo::default()
                }),
        )
        .unwrap();

    let written = write_layers(&output, dir.path()).unwrap();
    assert_eq!(written.len(), 5);

    let reserve = load_features(&dir.path().join(format!("{LAYER_RESERVA_LEGAL}.geojson"))).unwrap();
    assert_eq!(reserve.crs, Some(Crs::sirgas2000()));
    assert_eq!(reserve.features.len(), 1);
    assert_eq!(
        reserve.features[0].lookup(&["cod_rl"]),
        Some(&AttributeValue::Text("RL_001".into()))
    );

    let hydrography = load_features(&dir.path().join(format!("{LAYER_HIDROGRAFIA}.geojson"))).unwrap();
    assert_eq!(hydrography.features.len(), output.features.len());
    let river = hydrography
        .features
        .iter()
        .find(|f| matches!(f.geometry, Geometry::LineString(_)))
        .unwrap();
    assert_eq!(river.lookup(&["num_largura"]).and_then(AttributeValue::as_f64), Some(12.0));

    let (imovel, _) = load_perimeter(&dir.path().join(format!("{LAYER_AREA_IMOVEL}.geojson"))).unwrap();
    let reread = Pipeline::default()
        .run(PipelineInput::new(imovel, Crs::sirgas2000(), "CERRADO"))
        .unwrap();
    assert!(relative_error(reread.perimeter.area_m2, 1_000_000.0) < 1e-6);

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join(REPORT_FILE)).unwrap()).unwrap();
    assert_eq!(report["property"]["name"], "Fazenda Santa Luzia");
    assert_eq!(report["contributions"][0]["cod_app"], "APP_MARGEM_001");
    assert_eq!(report["reserve_condition"], "PROPOSTA");
}

#[test]
fn test_process_files_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let perimeter = dir.path().join("perimeter.geojson");
    fs::write(
        &perimeter,
        r#"{ "type": "Feature", "properties": {},
             "geometry": { "type": "Polygon", "coordinates":
               [[[-47.06, -22.90], [-47.05, -22.90], [-47.05, -22.89], [-47.06, -22.89], [-47.06, -22.90]]] } }"#,
    )
    .unwrap();
    let hydrology = dir.path().join("hydrology.geojson");
    fs::write(
        &hydrology,
        r#"{ "type": "FeatureCollection",
             "crs": { "type": "name", "properties": { "name": "EPSG:31983" } },
             "features": [] }"#,
    )
    .unwrap();

    let options = RunOptions {
        perimeter,
        hydrology: Some(hydrology),
        biome: "Cerrado".into(),
        crs: None,
        property: PropertyInfo::default(),
    };
    let result = process_files(&options, EngineConfig::default(), &dir.path().join("out"));
    assert!(matches!(result, Err(Error::Input(InputError::UnknownCrs(_)))));

    // one unreadable feature is skipped, the rest of the file is used
    fs::write(
        options.hydrology.as_ref().unwrap(),
        r#"{ "type": "FeatureCollection",
             "features": [
               { "type": "Feature", "properties": { "largura_m": 4 },
                 "geometry": { "type": "LineString", "coordinates": [[-47.055, -22.91], [-47.055, -22.88]] } },
               { "type": "Feature", "properties": {},
                 "geometry": { "type": "LineString", "coordinates": [[-47.055], [-47.05, -22.89]] } }
             ] }"#,
    )
    .unwrap();
    let (output, _) = process_files(&options, EngineConfig::default(), &dir.path().join("partial")).unwrap();
    assert!(!output.app.is_empty());
    assert!(output
        .warnings
        .iter()
        .any(|w| matches!(w, DataQualityWarning::FeatureSkipped { index: 1, .. })));

    let options = RunOptions { hydrology: None, ..options };
    let (output, written) = process_files(&options, EngineConfig::default(), &dir.path().join("out")).unwrap();
    assert_eq!(written.len(), 3);
    assert!(output.warnings.contains(&DataQualityWarning::NoHydrologySource));
}
