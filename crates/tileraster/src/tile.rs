use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use byteraster::ByteRaster;
use tokio_util::sync::CancellationToken;

use crate::error::LayerFailure;
use crate::layer::{CacheFilename, RasterLayer};

/// A store into an output slot that was already populated.
#[derive(Debug, thiserror::Error)]
#[error("{layer} raster of tile {tile} is already set")]
pub struct SlotTaken {
    pub tile: String,
    pub layer: RasterLayer,
}

/// One unit of work: a named tile whose two raster layers are to be produced.
///
/// Shared as `Arc<Tile>` between the submitter, the worker and whoever reads
/// the results. Output slots are write-once; readers should wait for
/// [`Tile::is_complete`] (or the completion counter) before trusting either
/// of them, since the two layers are not published atomically.
#[derive(Debug)]
pub struct Tile {
    name: String,
    version: String,
    directory_intermediate: PathBuf,
    cancel: CancellationToken,
    terrain_type: OnceLock<ByteRaster>,
    buildings_roads: OnceLock<ByteRaster>,
    failure: OnceLock<LayerFailure>,
    completed_count: Arc<AtomicUsize>,
    complete: AtomicBool,
}

impl Tile {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        directory_intermediate: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            directory_intermediate: directory_intermediate.into(),
            cancel: CancellationToken::new(),
            terrain_type: OnceLock::new(),
            buildings_roads: OnceLock::new(),
            failure: OnceLock::new(),
            completed_count: Arc::new(AtomicUsize::new(0)),
            complete: AtomicBool::new(false),
        }
    }

    /// Ties the tile to the host's cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Shares a completion counter with other tiles, e.g. one per batch.
    pub fn with_completion_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.completed_count = counter;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn directory_intermediate(&self) -> &Path {
        &self.directory_intermediate
    }

    /// Where the cached raster of `layer` lives for this tile and version.
    pub fn cache_path(&self, layer: RasterLayer) -> PathBuf {
        CacheFilename::new(self.name.as_str(), layer, self.version.as_str())
            .path_in(&self.directory_intermediate)
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn slot(&self, layer: RasterLayer) -> &OnceLock<ByteRaster> {
        match layer {
            RasterLayer::TerrainType => &self.terrain_type,
            RasterLayer::BuildingsRoads => &self.buildings_roads,
        }
    }

    pub fn raster(&self, layer: RasterLayer) -> Option<&ByteRaster> {
        self.slot(layer).get()
    }

    pub fn terrain_type(&self) -> Option<&ByteRaster> {
        self.terrain_type.get()
    }

    pub fn buildings_roads(&self) -> Option<&ByteRaster> {
        self.buildings_roads.get()
    }

    pub(crate) fn store(&self, layer: RasterLayer, raster: ByteRaster) -> Result<(), SlotTaken> {
        self.slot(layer).set(raster).map_err(|_| SlotTaken {
            tile: self.name.clone(),
            layer,
        })
    }

    /// Keeps the first failure of the run; later ones are dropped.
    pub(crate) fn record_failure(&self, failure: LayerFailure) {
        let _ = self.failure.set(failure);
    }

    pub fn failure(&self) -> Option<&LayerFailure> {
        self.failure.get()
    }

    /// Bumps the completion counter and returns its new value.
    pub(crate) fn mark_completed(&self) -> usize {
        let count = self.completed_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.complete.store(true, Ordering::Release);
        count
    }

    pub fn completed_count(&self) -> usize {
        self.completed_count.load(Ordering::Acquire)
    }

    /// Both layers are populated and published.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Complete, or given up on because a layer failed.
    pub fn is_finished(&self) -> bool {
        self.is_complete() || self.failure.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_write_once() {
        let tile = Tile::new("E0N0S1000", "1", "/tmp");
        tile.store(RasterLayer::TerrainType, ByteRaster::default()).unwrap();

        let err = tile
            .store(RasterLayer::TerrainType, ByteRaster::filled(1, 1, 0.0, 0.0, 1.0, 3))
            .unwrap_err();
        assert_eq!(err.layer, RasterLayer::TerrainType);
        assert!(tile.terrain_type().unwrap().is_empty());
        assert!(tile.buildings_roads().is_none());
    }

    #[test]
    fn shared_counter_counts_every_tile() {
        let counter = Arc::new(AtomicUsize::new(0));
        let a = Tile::new("E0N0S1000", "1", "/tmp").with_completion_counter(counter.clone());
        let b = Tile::new("E1000N0S1000", "1", "/tmp").with_completion_counter(counter.clone());

        assert_eq!(a.mark_completed(), 1);
        assert_eq!(b.mark_completed(), 2);
        assert_eq!(a.completed_count(), 2);
        assert!(a.is_complete() && b.is_complete());
    }

    #[test]
    fn cache_path_uses_intermediate_directory() {
        let tile = Tile::new("E0N0S1000", "7", "/data/intermediate");
        assert_eq!(
            tile.cache_path(RasterLayer::BuildingsRoads),
            PathBuf::from("/data/intermediate/E0N0S1000_buildingsroads_v7.asp")
        );
    }

    #[test]
    fn cancellation_follows_host_token() {
        let host = CancellationToken::new();
        let tile = Tile::new("E0N0S1000", "1", "/tmp").with_cancellation(host.child_token());
        assert!(!tile.is_cancelled());
        host.cancel();
        assert!(tile.is_cancelled());
    }
}
