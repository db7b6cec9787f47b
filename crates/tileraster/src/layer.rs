use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Extension of cached raster files.
pub const CACHE_EXTENSION: &str = "asp";

/// Which of the two raster outputs of a tile is being produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RasterLayer {
    TerrainType,
    BuildingsRoads,
}

impl RasterLayer {
    pub const ALL: [RasterLayer; 2] = [RasterLayer::TerrainType, RasterLayer::BuildingsRoads];

    /// Specifier used in cache file names.
    pub const fn as_str(self) -> &'static str {
        match self {
            RasterLayer::TerrainType => "terraintype",
            RasterLayer::BuildingsRoads => "buildingsroads",
        }
    }
}

impl fmt::Display for RasterLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RasterLayer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "terraintype" => Ok(RasterLayer::TerrainType),
            "buildingsroads" => Ok(RasterLayer::BuildingsRoads),
            other => Err(format!("unknown raster specifier '{other}'")),
        }
    }
}

/// Name of a cached raster: `{tile}_{specifier}_v{version}.asp`.
///
/// Tile names and versions must not contain `_`, otherwise the name cannot be
/// split back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFilename {
    pub tile_name: String,
    pub layer: RasterLayer,
    pub version: String,
}

impl CacheFilename {
    pub fn new(tile_name: impl Into<String>, layer: RasterLayer, version: impl Into<String>) -> Self {
        Self {
            tile_name: tile_name.into(),
            layer,
            version: version.into(),
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_v{}.{}",
            self.tile_name, self.layer, self.version, CACHE_EXTENSION
        )
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }

    /// Splits a cache file name back into its parts.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(CACHE_EXTENSION)?.strip_suffix('.')?;

        let mut parts = stem.split('_');
        let tile_name = parts.next().filter(|s| !s.is_empty())?;
        let layer = parts.next()?.parse().ok()?;
        let version = parts.next()?.strip_prefix('v').filter(|s| !s.is_empty())?;

        if parts.next().is_some() {
            return None;
        }

        Some(Self::new(tile_name, layer, version))
    }
}

impl fmt::Display for CacheFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}
