//! The background worker that drains a [`TileQueue`].
//!
//! For each tile and layer the worker decides between the cached raster and
//! rasterizing from vector sources, stores the result on the tile and bumps
//! the tile's completion counter once both layers are in place. A failing
//! layer is recorded on the tile and the worker moves on.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::builder::RasterBuilder;
use crate::classes::LayerMaps;
use crate::error::{BuildError, LayerFailure};
use crate::events::{LayerSource, NoopEvents, RasterEvents};
use crate::layer::RasterLayer;
use crate::namer;
use crate::queue::TileQueue;
use crate::tile::Tile;

pub const WORKER_THREAD_NAME: &str = "tile-raster";

/// File naming of the grid-cell scoped vector sources:
/// `{prefix}{grid cell}{postfix}.shp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceNaming {
    pub terrain_prefix: String,
    pub roads_prefix: String,
    pub buildings_prefix: String,
    pub polygon_postfix: String,
    pub line_postfix: String,
}

impl Default for SourceNaming {
    fn default() -> Self {
        Self {
            terrain_prefix: "terraintype_".into(),
            roads_prefix: "roads_".into(),
            buildings_prefix: "buildings_".into(),
            polygon_postfix: "_polygon".into(),
            line_postfix: "_line".into(),
        }
    }
}

impl SourceNaming {
    pub fn terrain_sources(&self, cell: &str) -> Vec<String> {
        vec![format!("{}{}{}.shp", self.terrain_prefix, cell, self.polygon_postfix)]
    }

    /// Roads first, so buildings are painted over them.
    pub fn buildings_roads_sources(&self, cell: &str) -> Vec<String> {
        vec![
            format!("{}{}{}.shp", self.roads_prefix, cell, self.line_postfix),
            format!("{}{}{}.shp", self.buildings_prefix, cell, self.polygon_postfix),
        ]
    }

    pub fn sources_for(&self, layer: RasterLayer, cell: &str) -> Vec<String> {
        match layer {
            RasterLayer::TerrainType => self.terrain_sources(cell),
            RasterLayer::BuildingsRoads => self.buildings_roads_sources(cell),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Longest wait on an empty queue before re-checking cancellation.
    pub idle_poll: Duration,
    /// Pause after each tile.
    pub busy_yield: Duration,
    /// Edge of the grid cells the vector sources are split into, metres.
    pub grid_cell_edge_m: u32,
    pub naming: SourceNaming,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_poll: Duration::from_secs(1),
            busy_yield: Duration::from_millis(10),
            grid_cell_edge_m: 12_000,
            naming: SourceNaming::default(),
        }
    }
}

impl WorkerConfig {
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    pub fn with_busy_yield(mut self, busy_yield: Duration) -> Self {
        self.busy_yield = busy_yield;
        self
    }

    pub fn with_grid_cell_edge_m(mut self, grid_cell_edge_m: u32) -> Self {
        self.grid_cell_edge_m = grid_cell_edge_m;
        self
    }

    pub fn with_naming(mut self, naming: SourceNaming) -> Self {
        self.naming = naming;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Dequeuing = 1,
    BuildingTerrain = 2,
    BuildingBuildingsRoads = 3,
    Completed = 4,
    Cancelled = 5,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => WorkerState::Dequeuing,
            2 => WorkerState::BuildingTerrain,
            3 => WorkerState::BuildingBuildingsRoads,
            4 => WorkerState::Completed,
            5 => WorkerState::Cancelled,
            _ => WorkerState::Idle,
        }
    }

    fn building(layer: RasterLayer) -> Self {
        match layer {
            RasterLayer::TerrainType => WorkerState::BuildingTerrain,
            RasterLayer::BuildingsRoads => WorkerState::BuildingBuildingsRoads,
        }
    }
}

enum LayerOutcome {
    Stored,
    Abandoned,
}

pub struct TileRasterService {
    queue: Arc<TileQueue>,
    reader: Box<dyn RasterBuilder>,
    creator: Box<dyn RasterBuilder>,
    maps: Arc<LayerMaps>,
    cancel: CancellationToken,
    events: Arc<dyn RasterEvents>,
    config: WorkerConfig,
    state: Arc<AtomicU8>,
}

impl TileRasterService {
    pub fn new(
        queue: Arc<TileQueue>,
        reader: Box<dyn RasterBuilder>,
        creator: Box<dyn RasterBuilder>,
        maps: Arc<LayerMaps>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            reader,
            creator,
            maps,
            cancel,
            events: Arc::new(NoopEvents),
            config: WorkerConfig::default(),
            state: Arc::new(AtomicU8::new(WorkerState::Idle as u8)),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn RasterEvents>) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Starts the worker on its own thread.
    pub fn spawn(self) -> io::Result<WorkerHandle> {
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let queue = Arc::clone(&self.queue);

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || {
                let mut service = self;
                service.run();
            })?;

        Ok(WorkerHandle {
            state,
            cancel,
            queue,
            thread,
        })
    }

    /// Processes tiles until the service is cancelled.
    pub fn run(&mut self) {
        tracing::info!(
            idle_poll_ms = self.config.idle_poll.as_millis() as u64,
            grid_cell_edge_m = self.config.grid_cell_edge_m,
            "Tile raster worker started"
        );

        loop {
            if self.cancel.is_cancelled() {
                self.set_state(WorkerState::Cancelled);
                break;
            }

            self.set_state(WorkerState::Dequeuing);
            let Some(tile) = self
                .queue
                .dequeue_unless_cancelled(self.config.idle_poll, &self.cancel)
            else {
                self.set_state(WorkerState::Idle);
                continue;
            };

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.process(&tile))) {
                self.contain_panic(&tile, payload);
            }
            drop(tile);

            if !self.config.busy_yield.is_zero() {
                thread::sleep(self.config.busy_yield);
            }
        }

        tracing::info!(pending = self.queue.len(), "Tile raster worker cancelled");
    }

    fn process(&mut self, tile: &Tile) {
        let span = tracing::debug_span!("tile", tile = tile.name());
        let _enter = span.enter();

        let Some(cell) = namer::grid_cell_of(tile.name(), self.config.grid_cell_edge_m) else {
            self.fail(
                tile,
                RasterLayer::TerrainType,
                BuildError::InvalidTileName(tile.name().to_owned()),
            );
            return;
        };

        for layer in RasterLayer::ALL {
            self.set_state(WorkerState::building(layer));

            match self.build_layer(tile, layer, &cell) {
                Ok(LayerOutcome::Stored) => {}
                Ok(LayerOutcome::Abandoned) => {
                    tracing::info!(tile = tile.name(), layer = %layer, "Tile cancelled, abandoning");
                    self.events.tile_abandoned(tile.name());
                    return;
                }
                Err(e) => {
                    self.fail(tile, layer, e);
                    return;
                }
            }
        }

        let completed = tile.mark_completed();
        self.set_state(WorkerState::Completed);
        tracing::info!(tile = tile.name(), completed, "Tile rasters ready");
        self.events.tile_completed(tile.name(), completed);
    }

    fn build_layer(
        &mut self,
        tile: &Tile,
        layer: RasterLayer,
        cell: &str,
    ) -> Result<LayerOutcome, BuildError> {
        let start = Instant::now();
        let cache_path = tile.cache_path(layer);

        let (builder, source) = if cache_path.exists() {
            self.reader.set_specifier(layer);
            (&mut self.reader, LayerSource::CacheHit)
        } else {
            let sources = self.config.naming.sources_for(layer, cell);
            tracing::debug!(tile = tile.name(), layer = %layer, ?sources, "Cache miss, rasterizing");

            self.creator.set_specifier(layer);
            self.creator
                .set_class_value_map(Arc::clone(self.maps.for_layer(layer)));
            self.creator.set_source_filenames(sources);
            (&mut self.creator, LayerSource::Created)
        };

        let raster = builder.build(tile)?;

        // An empty raster from a cancelled build must not land in the slot.
        if tile.is_cancelled() {
            return Ok(LayerOutcome::Abandoned);
        }

        if let Err(taken) = tile.store(layer, raster) {
            tracing::warn!(error = %taken, "Tile processed again, keeping the first raster");
        }

        let elapsed = start.elapsed();
        tracing::debug!(
            tile = tile.name(),
            layer = %layer,
            source = source.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Layer stored"
        );
        self.events.layer_built(tile.name(), layer, source, elapsed);

        Ok(LayerOutcome::Stored)
    }

    /// Records a panic out of `process` as a failure of the layer being built.
    fn contain_panic(&self, tile: &Tile, payload: Box<dyn Any + Send>) {
        let layer = match self.state() {
            WorkerState::BuildingBuildingsRoads => RasterLayer::BuildingsRoads,
            _ => RasterLayer::TerrainType,
        };
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());

        tracing::error!(tile = tile.name(), layer = %layer, panic = %message, "Tile build panicked");
        self.fail(tile, layer, BuildError::Panicked(message));
    }

    fn fail(&self, tile: &Tile, layer: RasterLayer, error: BuildError) {
        tracing::warn!(tile = tile.name(), layer = %layer, error = %error, "Layer build failed, skipping tile");
        self.events.layer_failed(tile.name(), layer, &error);
        tile.record_failure(LayerFailure {
            tile: tile.name().to_owned(),
            layer,
            error,
        });
    }
}

/// Control over a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
    queue: Arc<TileQueue>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Signals cancellation and wakes the worker if it is waiting on the queue.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.queue.wake_all();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> thread::Result<()> {
        self.thread.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_names_follow_grid_cell() {
        let naming = SourceNaming::default();
        assert_eq!(
            naming.terrain_sources("E372000N6672000S12000"),
            ["terraintype_E372000N6672000S12000_polygon.shp"]
        );
        assert_eq!(
            naming.buildings_roads_sources("E372000N6672000S12000"),
            [
                "roads_E372000N6672000S12000_line.shp",
                "buildings_E372000N6672000S12000_polygon.shp"
            ]
        );
    }

    #[test]
    fn state_round_trips_through_atomic() {
        for state in [
            WorkerState::Idle,
            WorkerState::Dequeuing,
            WorkerState::BuildingTerrain,
            WorkerState::BuildingBuildingsRoads,
            WorkerState::Completed,
            WorkerState::Cancelled,
        ] {
            assert_eq!(WorkerState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.idle_poll, Duration::from_secs(1));
        assert_eq!(config.busy_yield, Duration::from_millis(10));
        assert_eq!(config.grid_cell_edge_m, 12_000);
    }
}
