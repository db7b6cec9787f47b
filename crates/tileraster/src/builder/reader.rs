use byteraster::ByteRaster;

use super::RasterBuilder;
use crate::error::BuildError;
use crate::layer::RasterLayer;
use crate::tile::Tile;

/// Loads a cached raster from the tile's intermediate directory.
#[derive(Debug, Default)]
pub struct RasterReader {
    layer: Option<RasterLayer>,
}

impl RasterReader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RasterBuilder for RasterReader {
    fn set_specifier(&mut self, layer: RasterLayer) {
        self.layer = Some(layer);
    }

    fn build(&mut self, tile: &Tile) -> Result<ByteRaster, BuildError> {
        if tile.is_cancelled() {
            return Ok(ByteRaster::default());
        }

        let layer = self.layer.ok_or(BuildError::NotConfigured("raster specifier"))?;
        let path = tile.cache_path(layer);

        let raster = byteraster::read_file(&path).map_err(|e| BuildError::from_read(path.clone(), e))?;

        tracing::debug!(
            tile = tile.name(),
            layer = %layer,
            width = raster.width,
            height = raster.height,
            "Loaded cached raster"
        );

        Ok(raster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteraster::Encoding;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn reads_cached_raster() {
        let dir = tempfile::tempdir().unwrap();
        let tile = Tile::new("E0N0S1000", "2", dir.path());
        let stored = ByteRaster::filled(3, 2, 0.0, 0.0, 1.0, 5);
        byteraster::write_file(tile.cache_path(RasterLayer::TerrainType), &stored, Encoding::Rle)
            .unwrap();

        let mut reader = RasterReader::new();
        reader.set_specifier(RasterLayer::TerrainType);
        assert_eq!(reader.build(&tile).unwrap(), stored);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let tile = Tile::new("E0N0S1000", "2", dir.path());

        let mut reader = RasterReader::new();
        reader.set_specifier(RasterLayer::BuildingsRoads);
        assert!(matches!(reader.build(&tile), Err(BuildError::NotFound { .. })));
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let tile = Tile::new("E0N0S1000", "2", dir.path());
        std::fs::write(tile.cache_path(RasterLayer::TerrainType), b"not a raster").unwrap();

        let mut reader = RasterReader::new();
        reader.set_specifier(RasterLayer::TerrainType);
        assert!(matches!(reader.build(&tile), Err(BuildError::CorruptData { .. })));
    }

    #[test]
    fn cancelled_tile_skips_io() {
        // The directory does not exist: any read attempt would fail.
        let cancel = CancellationToken::new();
        let tile = Tile::new("E0N0S1000", "2", "/nonexistent/intermediate")
            .with_cancellation(cancel.clone());
        cancel.cancel();

        let mut reader = RasterReader::new();
        reader.set_specifier(RasterLayer::TerrainType);
        assert!(reader.build(&tile).unwrap().is_empty());
    }

    #[test]
    fn unconfigured_reader_reports_it() {
        let tile = Tile::new("E0N0S1000", "2", "/tmp");
        assert!(matches!(
            RasterReader::new().build(&tile),
            Err(BuildError::NotConfigured(_))
        ));
    }
}
