use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use byteraster::{ByteRaster, Encoding};

use super::RasterBuilder;
use crate::classes::ClassValueMap;
use crate::error::BuildError;
use crate::layer::RasterLayer;
use crate::namer;
use crate::rasterize;
use crate::tile::Tile;
use crate::vector::{self, FeatureSource, ShapefileSource};

#[derive(Debug, Clone)]
pub struct CreatorConfig {
    /// Edge length of one raster cell, metres.
    pub cell_size_m: f64,
    /// Half-width of the band painted along line features, metres.
    pub line_radius_m: f64,
    pub nodata: u8,
    pub encoding: Encoding,
    /// Store every created raster in the tile's intermediate directory.
    pub write_through: bool,
    /// Largest grid a tile may rasterize into, in cells. Never above
    /// [`byteraster::MAX_CELLS`], so cached rasters stay readable.
    pub max_cells: usize,
}

impl Default for CreatorConfig {
    fn default() -> Self {
        Self {
            cell_size_m: 1.0,
            line_radius_m: 2.0,
            nodata: 0,
            encoding: Encoding::Zlib,
            write_through: true,
            max_cells: 1 << 28,
        }
    }
}

impl CreatorConfig {
    pub fn with_cell_size_m(mut self, cell_size_m: f64) -> Self {
        self.cell_size_m = cell_size_m;
        self
    }

    pub fn with_line_radius_m(mut self, line_radius_m: f64) -> Self {
        self.line_radius_m = line_radius_m;
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_write_through(mut self, write_through: bool) -> Self {
        self.write_through = write_through;
        self
    }

    pub fn with_max_cells(mut self, max_cells: usize) -> Self {
        self.max_cells = max_cells;
        self
    }
}

/// Rasterizes vector sources for one tile and layer.
pub struct RasterCreator {
    config: CreatorConfig,
    source_dir: PathBuf,
    features: Box<dyn FeatureSource>,
    layer: Option<RasterLayer>,
    classes: Option<Arc<ClassValueMap>>,
    sources: Vec<String>,
}

impl RasterCreator {
    /// Creator reading shapefiles from `source_dir`.
    pub fn new(source_dir: impl Into<PathBuf>, config: CreatorConfig) -> Self {
        Self::with_feature_source(source_dir, config, Box::new(ShapefileSource::default()))
    }

    pub fn with_feature_source(
        source_dir: impl Into<PathBuf>,
        config: CreatorConfig,
        features: Box<dyn FeatureSource>,
    ) -> Self {
        Self {
            config,
            source_dir: source_dir.into(),
            features,
            layer: None,
            classes: None,
            sources: Vec::new(),
        }
    }

    pub fn config(&self) -> &CreatorConfig {
        &self.config
    }

    fn blank_raster(&self, tile: &Tile, layer: RasterLayer) -> Result<ByteRaster, BuildError> {
        let cell = self.config.cell_size_m;
        if !(cell.is_finite() && cell > 0.0) {
            return Err(BuildError::NotConfigured("positive cell size"));
        }

        let bounds =
            namer::decode(tile.name()).ok_or_else(|| BuildError::InvalidTileName(tile.name().to_owned()))?;

        let max_cells = self.config.max_cells.min(byteraster::MAX_CELLS);
        let side = |extent: f64| {
            let n = (extent / cell).ceil();
            (n.is_finite() && n <= f64::from(u32::MAX)).then_some(n as u32)
        };
        let dims = side(bounds.width()).zip(side(bounds.height())).filter(|&(w, h)| {
            (w as usize)
                .checked_mul(h as usize)
                .is_some_and(|cells| cells <= max_cells)
        });
        let Some((width, height)) = dims else {
            return Err(BuildError::Rasterization {
                path: tile.cache_path(layer),
                reason: format!(
                    "tile of {} m at {} m cells exceeds {} cells",
                    bounds.width(),
                    cell,
                    max_cells
                ),
            });
        };

        Ok(ByteRaster::filled(
            width,
            height,
            bounds.min_x,
            bounds.min_y,
            cell,
            self.config.nodata,
        ))
    }

    fn write_through(&self, tile: &Tile, layer: RasterLayer, raster: &ByteRaster) {
        let path = tile.cache_path(layer);

        let written = std::fs::create_dir_all(tile.directory_intermediate())
            .and_then(|()| byteraster::write_file_atomic(&path, raster, self.config.encoding));

        match written {
            Ok(()) => tracing::debug!(tile = tile.name(), layer = %layer, path = %path.display(), "Cached raster"),
            // The raster is still good; the next run just misses the cache again.
            Err(e) => tracing::warn!(
                tile = tile.name(),
                layer = %layer,
                path = %path.display(),
                error = %e,
                "Failed to cache raster"
            ),
        }
    }
}

impl RasterBuilder for RasterCreator {
    fn set_specifier(&mut self, layer: RasterLayer) {
        self.layer = Some(layer);
    }

    fn set_class_value_map(&mut self, classes: Arc<ClassValueMap>) {
        self.classes = Some(classes);
    }

    fn set_source_filenames(&mut self, filenames: Vec<String>) {
        self.sources = filenames;
    }

    fn build(&mut self, tile: &Tile) -> Result<ByteRaster, BuildError> {
        if tile.is_cancelled() {
            return Ok(ByteRaster::default());
        }

        let layer = self.layer.ok_or(BuildError::NotConfigured("raster specifier"))?;
        let classes = self
            .classes
            .clone()
            .ok_or(BuildError::NotConfigured("class/value map"))?;

        let start = Instant::now();
        let mut raster = self.blank_raster(tile, layer)?;
        let mut painted = 0usize;

        for path in vector::resolve_sources(&self.source_dir, &self.sources) {
            let features = self.features.load(&path)?;
            painted += rasterize::burn_features(&mut raster, &features, &classes, self.config.line_radius_m);
        }

        tracing::debug!(
            tile = tile.name(),
            layer = %layer,
            sources = self.sources.len(),
            painted,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Rasterized tile layer"
        );

        if self.config.write_through {
            self.write_through(tile, layer, &raster);
        }

        Ok(raster)
    }
}
