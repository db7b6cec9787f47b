#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tileraster::{
    BuildError, ByteRaster, ClassValueMap, LayerSource, RasterBuilder, RasterEvents, RasterLayer,
    Tile, WorkerConfig,
};

pub fn fast_config() -> WorkerConfig {
    WorkerConfig::default()
        .with_idle_poll(Duration::from_millis(10))
        .with_busy_yield(Duration::ZERO)
}

/// Polls `cond` until it holds or a generous deadline passes.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn write_cache(tile: &Tile, layer: RasterLayer, value: u8) {
    let raster = ByteRaster::filled(4, 4, 0.0, 0.0, 250.0, value);
    byteraster::write_file(tile.cache_path(layer), &raster, byteraster::Encoding::Rle).unwrap();
}

#[derive(Debug, Clone)]
pub struct BuildCall {
    pub tile: String,
    pub layer: RasterLayer,
    pub classes: Option<Arc<ClassValueMap>>,
    pub sources: Vec<String>,
}

/// Builder that records how it was configured and returns a raster filled
/// with `fill`. Honors tile cancellation like the real builders.
pub struct RecordingBuilder {
    fill: u8,
    calls: Arc<Mutex<Vec<BuildCall>>>,
    layer: Option<RasterLayer>,
    classes: Option<Arc<ClassValueMap>>,
    sources: Vec<String>,
}

impl RecordingBuilder {
    pub fn new(fill: u8) -> (Self, Arc<Mutex<Vec<BuildCall>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let builder = Self {
            fill,
            calls: Arc::clone(&calls),
            layer: None,
            classes: None,
            sources: Vec::new(),
        };
        (builder, calls)
    }
}

impl RasterBuilder for RecordingBuilder {
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
        self.calls.lock().push(BuildCall {
            tile: tile.name().to_owned(),
            layer,
            classes: self.classes.clone(),
            sources: self.sources.clone(),
        });
        Ok(ByteRaster::filled(2, 2, 0.0, 0.0, 1.0, self.fill))
    }
}

#[derive(Debug, Default)]
pub struct RecordingEvents {
    pub built: Mutex<Vec<(String, RasterLayer, LayerSource)>>,
    pub failed: Mutex<Vec<(String, RasterLayer)>>,
    pub completed: AtomicUsize,
    pub abandoned: Mutex<Vec<String>>,
}

impl RecordingEvents {
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn sources_for(&self, tile: &str) -> Vec<LayerSource> {
        self.built
            .lock()
            .iter()
            .filter(|(t, _, _)| t == tile)
            .map(|(_, _, s)| *s)
            .collect()
    }
}

impl RasterEvents for RecordingEvents {
    fn layer_built(&self, tile: &str, layer: RasterLayer, source: LayerSource, _: Duration) {
        self.built.lock().push((tile.to_owned(), layer, source));
    }

    fn layer_failed(&self, tile: &str, layer: RasterLayer, _: &BuildError) {
        self.failed.lock().push((tile.to_owned(), layer));
    }

    fn tile_completed(&self, _: &str, _: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn tile_abandoned(&self, tile: &str) {
        self.abandoned.lock().push(tile.to_owned());
    }
}

/// Fails the test if a cancelled build ever reaches the vector sources.
pub struct UnreachableSource;

impl tileraster::FeatureSource for UnreachableSource {
    fn load(&self, path: &Path) -> Result<Vec<tileraster::Feature>, BuildError> {
        panic!("vector source {} loaded for a cancelled tile", path.display());
    }
}
