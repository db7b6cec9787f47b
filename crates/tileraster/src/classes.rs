//! Feature class → raster value tables.
//!
//! Each raster layer gets one merged [`ClassValueMap`], assembled from several
//! category tables. Tables are applied in order and a later table overrides an
//! earlier one for the same class code. The merged maps are built once and
//! shared read-only through [`LayerMaps`].

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::ClassTableError;
use crate::layer::RasterLayer;

/// Raster values written by the standard tables.
pub mod values {
    // buildings/roads
    pub const BUILDING: u8 = 1;
    pub const ROAD_MAJOR: u8 = 2;
    pub const ROAD_MINOR: u8 = 3;
    pub const PATH: u8 = 4;

    // terrain type
    pub const WATER: u8 = 1;
    pub const SWAMP: u8 = 2;
    pub const ROCK: u8 = 3;
    pub const SAND: u8 = 4;
    pub const FIELD: u8 = 5;
    pub const CLIFF: u8 = 6;
}

/// One category of the topographic database with its class codes.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassTable {
    pub name: String,
    pub classes: BTreeMap<i32, u8>,
}

impl ClassTable {
    pub fn new(name: impl Into<String>, entries: &[(i32, u8)]) -> Self {
        Self {
            name: name.into(),
            classes: entries.iter().copied().collect(),
        }
    }
}

pub const ROAD_LINE_CLASSES: &[(i32, u8)] = &[
    (12111, values::ROAD_MAJOR),
    (12112, values::ROAD_MAJOR),
    (12121, values::ROAD_MAJOR),
    (12122, values::ROAD_MAJOR),
    (12131, values::ROAD_MAJOR),
    (12132, values::ROAD_MINOR),
    (12141, values::ROAD_MINOR),
    (12151, values::ROAD_MINOR),
    (12152, values::ROAD_MINOR),
    (12153, values::ROAD_MINOR),
    (12154, values::ROAD_MINOR),
    (12312, values::PATH),
    (12313, values::PATH),
    (12314, values::PATH),
    (12316, values::PATH),
];

pub const BUILDING_POLYGON_CLASSES: &[(i32, u8)] = &[
    (42210, values::BUILDING),
    (42211, values::BUILDING),
    (42212, values::BUILDING),
    (42220, values::BUILDING),
    (42221, values::BUILDING),
    (42222, values::BUILDING),
    (42230, values::BUILDING),
    (42231, values::BUILDING),
    (42232, values::BUILDING),
    (42240, values::BUILDING),
    (42241, values::BUILDING),
    (42242, values::BUILDING),
    (42250, values::BUILDING),
    (42260, values::BUILDING),
    (42270, values::BUILDING),
];

pub const WATER_POLYGON_CLASSES: &[(i32, u8)] = &[
    (36200, values::WATER),
    (36211, values::WATER),
    (36313, values::WATER),
];

pub const SWAMP_POLYGON_CLASSES: &[(i32, u8)] = &[
    (35300, values::SWAMP),
    (35411, values::SWAMP),
    (35412, values::SWAMP),
    (35421, values::SWAMP),
    (35422, values::SWAMP),
];

pub const ROCK_POLYGON_CLASSES: &[(i32, u8)] = &[(34100, values::ROCK)];

pub const SAND_POLYGON_CLASSES: &[(i32, u8)] = &[(34300, values::SAND), (34700, values::SAND)];

pub const FIELD_POLYGON_CLASSES: &[(i32, u8)] = &[
    (32611, values::FIELD),
    (32612, values::FIELD),
    (32800, values::FIELD),
];

pub const ROCK_LINE_CLASSES: &[(i32, u8)] = &[(34400, values::CLIFF), (34900, values::CLIFF)];

/// Immutable class code → raster value lookup for one layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassValueMap {
    values: BTreeMap<i32, u8>,
}

impl ClassValueMap {
    /// Merges `tables` in order; the last table defining a code wins.
    pub fn merged<'a>(tables: impl IntoIterator<Item = &'a ClassTable>) -> Self {
        let mut values = BTreeMap::new();

        for table in tables {
            for (&class, &value) in &table.classes {
                if let Some(previous) = values.insert(class, value) {
                    if previous != value {
                        tracing::debug!(
                            table = %table.name,
                            class,
                            previous,
                            value,
                            "Class value overridden"
                        );
                    }
                }
            }
        }

        Self { values }
    }

    #[inline]
    pub fn get(&self, class: i32) -> Option<u8> {
        self.values.get(&class).copied()
    }

    #[inline]
    pub fn contains(&self, class: i32) -> bool {
        self.values.contains_key(&class)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, u8)> + '_ {
        self.values.iter().map(|(&c, &v)| (c, v))
    }
}

/// The two merged maps, shared by the worker and the rasterizing builder.
#[derive(Debug, Clone)]
pub struct LayerMaps {
    pub terrain_type: Arc<ClassValueMap>,
    pub buildings_roads: Arc<ClassValueMap>,
}

#[derive(Debug, Deserialize)]
struct ClassTablesFile {
    #[serde(default)]
    terrain_type: Vec<ClassTable>,
    #[serde(default)]
    buildings_roads: Vec<ClassTable>,
}

impl LayerMaps {
    pub fn from_tables(terrain_type: &[ClassTable], buildings_roads: &[ClassTable]) -> Self {
        Self {
            terrain_type: Arc::new(ClassValueMap::merged(terrain_type)),
            buildings_roads: Arc::new(ClassValueMap::merged(buildings_roads)),
        }
    }

    /// Maps for the topographic database categories.
    pub fn topographic() -> Self {
        let buildings_roads = [
            ClassTable::new("road_line", ROAD_LINE_CLASSES),
            ClassTable::new("building_polygon", BUILDING_POLYGON_CLASSES),
        ];

        let terrain_type = [
            ClassTable::new("water_polygon", WATER_POLYGON_CLASSES),
            ClassTable::new("swamp_polygon", SWAMP_POLYGON_CLASSES),
            ClassTable::new("rock_polygon", ROCK_POLYGON_CLASSES),
            ClassTable::new("sand_polygon", SAND_POLYGON_CLASSES),
            ClassTable::new("field_polygon", FIELD_POLYGON_CLASSES),
            ClassTable::new("rock_line", ROCK_LINE_CLASSES),
        ];

        Self::from_tables(&terrain_type, &buildings_roads)
    }

    /// Parses ordered category tables from JSON:
    ///
    /// ```json
    /// { "terrain_type":    [ { "name": "water", "classes": { "36200": 1 } } ],
    ///   "buildings_roads": [ { "name": "roads", "classes": { "12111": 2 } } ] }
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self, ClassTableError> {
        let file: ClassTablesFile = serde_json::from_str(json)?;
        Ok(Self::from_tables(&file.terrain_type, &file.buildings_roads))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ClassTableError> {
        let json = std::fs::read_to_string(path).map_err(|source| ClassTableError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn for_layer(&self, layer: RasterLayer) -> &Arc<ClassValueMap> {
        match layer {
            RasterLayer::TerrainType => &self.terrain_type,
            RasterLayer::BuildingsRoads => &self.buildings_roads,
        }
    }
}
