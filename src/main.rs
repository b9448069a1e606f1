use car_generator::{process_files, Crs, EngineConfig, PropertyInfo, RunOptions};
use clap::{Arg, ArgAction, Command};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

fn main() {
    let matches = Command::new("CAR Generator")
        .version("0.1")
        .author("Jesper Fjellin")
        .about("Derives APP and Reserva Legal layers for a rural property registration (SICAR)")
        .arg(
            Arg::new("perimeter")
                .short('p')
                .long("perimeter")
                .num_args(1)
                .required(true)
                .help("GeoJSON file with the property perimeter"),
        )
        .arg(
            Arg::new("hydrology")
                .short('H')
                .long("hydrology")
                .num_args(1)
                .help("GeoJSON file with rivers, springs and water bodies (optional)"),
        )
        .arg(
            Arg::new("name")
                .short('n')
                .long("name")
                .num_args(1)
                .default_value("")
                .help("Property name (nom_imovel)"),
        )
        .arg(
            Arg::new("biome")
                .short('b')
                .long("biome")
                .num_args(1)
                .default_value("MATA_ATLANTICA")
                .help("MATA_ATLANTICA, CERRADO or AMAZONIA"),
        )
        .arg(
            Arg::new("crs")
                .long("crs")
                .num_args(1)
                .help("CRS of the input files, e.g. EPSG:4326 (default: declared in file, else EPSG:4326)"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .num_args(1)
                .default_value("output")
                .help("Output directory"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .num_args(1)
                .help("JSON file overriding engine settings"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Debug logging"),
        )
        .get_matches();

    setup_logging(matches.get_flag("verbose"));

    let perimeter = matches
        .get_one::<String>("perimeter")
        .map(PathBuf::from)
        .unwrap_or_default();
    let hydrology = matches.get_one::<String>("hydrology").map(PathBuf::from);

    for file in std::iter::once(&perimeter).chain(hydrology.as_ref()) {
        if !file.exists() {
            eprintln!("Error: File not found: {}", file.display());
            std::process::exit(1);
        }
    }

    let crs = match matches.get_one::<String>("crs").map(|s| s.parse::<Crs>()) {
        Some(Ok(crs)) => Some(crs),
        Some(Err(e)) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        None => None,
    };

    let config = match matches.get_one::<String>("config") {
        Some(path) => match EngineConfig::from_file(Path::new(path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error reading config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => EngineConfig::default(),
    };

    let options = RunOptions {
        perimeter,
        hydrology,
        biome: matches.get_one::<String>("biome").cloned().unwrap_or_default(),
        crs,
        property: PropertyInfo {
            name: matches.get_one::<String>("name").cloned().unwrap_or_default(),
            ..PropertyInfo::default()
        },
    };
    let output_dir = matches
        .get_one::<String>("output")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("output"));

    match process_files(&options, config, &output_dir) {
        Ok((output, written)) => {
            for path in &written {
                info!("  {}", path.display());
            }
            if !output.warnings.is_empty() {
                warn!("{} warning(s), review before filing:", output.warnings.len());
                for warning in &output.warnings {
                    warn!("  - {}", warning);
                }
            }
            println!(
                "Done: {:.4} ha property, {:.4} ha APP, {:.4} ha Reserva Legal ({})",
                output.area.area_ha,
                output.app.area_m2() / 10_000.0,
                output.reserve.area_m2 / 10_000.0,
                output.reserve.condition
            );
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.to_string().contains("CRS mismatch") {
                eprintln!("Please ensure the perimeter and hydrology files use the same coordinate reference system.");
            }
            std::process::exit(1);
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: could not install logger: {}", e);
    }
}
