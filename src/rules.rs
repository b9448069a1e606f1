//! Statutory tables of Lei 12.651/2012 (Código Florestal).
//!
//! APP widths per hydrological feature and Reserva Legal percentages per
//! biome. The values are fixed by law and deliberately not configurable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::InputError;

/// APP radius around a spring (nascente), in meters.
pub const SPRING_RADIUS_M: f64 = 50.0;

/// Water bodies above this area get the wider APP band.
pub const LARGE_WATER_BODY_HA: f64 = 20.0;

/// River width brackets of art. 4º, I.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiverBracket {
    UpTo10m,
    From10To50m,
    From50To200m,
    From200To600m,
    Over600m,
}

impl RiverBracket {
    /// Bracket upper bounds are inclusive: a 10 m river is in the first one.
    pub fn from_width(width_m: f64) -> Self {
        if width_m <= 10.0 {
            RiverBracket::UpTo10m
        } else if width_m <= 50.0 {
            RiverBracket::From10To50m
        } else if width_m <= 200.0 {
            RiverBracket::From50To200m
        } else if width_m <= 600.0 {
            RiverBracket::From200To600m
        } else {
            RiverBracket::Over600m
        }
    }

    pub fn buffer_m(&self) -> f64 {
        match self {
            RiverBracket::UpTo10m => 30.0,
            RiverBracket::From10To50m => 50.0,
            RiverBracket::From50To200m => 100.0,
            RiverBracket::From200To600m => 200.0,
            RiverBracket::Over600m => 500.0,
        }
    }
}

/// Lake and lagoon brackets of art. 4º, II.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaterBodyBracket {
    UpTo20ha,
    Over20ha,
}

impl WaterBodyBracket {
    pub fn from_area_ha(area_ha: f64) -> Self {
        if area_ha > LARGE_WATER_BODY_HA {
            WaterBodyBracket::Over20ha
        } else {
            WaterBodyBracket::UpTo20ha
        }
    }

    pub fn buffer_m(&self) -> f64 {
        match self {
            WaterBodyBracket::UpTo20ha => 50.0,
            WaterBodyBracket::Over20ha => 100.0,
        }
    }
}

/// Feature class plus size bracket, which together fix the APP width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferRule {
    River(RiverBracket),
    Spring,
    WaterBody(WaterBodyBracket),
}

impl BufferRule {
    pub fn distance_m(&self) -> f64 {
        match self {
            BufferRule::River(bracket) => bracket.buffer_m(),
            BufferRule::Spring => SPRING_RADIUS_M,
            BufferRule::WaterBody(bracket) => bracket.buffer_m(),
        }
    }
}

/// Biomes with a Reserva Legal percentage in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Biome {
    MataAtlantica,
    Cerrado,
    Amazonia,
}

impl Biome {
    /// Fraction of the property that must be kept as Reserva Legal.
    pub fn reserve_fraction(&self) -> f64 {
        match self {
            Biome::MataAtlantica => 0.20,
            Biome::Cerrado => 0.20,
            Biome::Amazonia => 0.80,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Biome::MataAtlantica => "MATA_ATLANTICA",
            Biome::Cerrado => "CERRADO",
            Biome::Amazonia => "AMAZONIA",
        }
    }
}

impl fmt::Display for Biome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Biome {
    type Err = InputError;

    /// Accepts the SICAR codes as well as the written names, with or without
    /// accents ("Mata Atlântica", "mata-atlantica", "MATA_ATLANTICA").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = fold_ascii(s)
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c.to_ascii_uppercase() })
            .collect();
        match key.trim_matches('_') {
            "MATA_ATLANTICA" => Ok(Biome::MataAtlantica),
            "CERRADO" => Ok(Biome::Cerrado),
            "AMAZONIA" => Ok(Biome::Amazonia),
            _ => Err(InputError::UnknownBiome(s.to_string())),
        }
    }
}

/// Lowercase ASCII folding of Portuguese accented letters.
pub(crate) fn fold_ascii(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'ê' | 'è' | 'ë' => 'e',
            'í' | 'î' | 'ì' | 'ï' => 'i',
            'ó' | 'ô' | 'õ' | 'ò' | 'ö' => 'o',
            'ú' | 'û' | 'ù' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}
