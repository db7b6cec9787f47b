//! Hooks the worker calls as tiles move through it.
//!
//! The worker already logs every step with `tracing`; this trait is for hosts
//! that want numbers (the `rasterd` binary feeds Prometheus from it).

use std::time::Duration;

use crate::error::BuildError;
use crate::layer::RasterLayer;

/// Where a layer raster came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerSource {
    CacheHit,
    Created,
}

impl LayerSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            LayerSource::CacheHit => "cache_hit",
            LayerSource::Created => "created",
        }
    }
}

/// Observer of worker progress. Implementations must be cheap; they run on
/// the worker thread.
pub trait RasterEvents: Send + Sync {
    fn layer_built(&self, tile: &str, layer: RasterLayer, source: LayerSource, elapsed: Duration);

    fn layer_failed(&self, tile: &str, layer: RasterLayer, error: &BuildError);

    /// Both layers stored; `completed` is the counter value after the increment.
    fn tile_completed(&self, tile: &str, completed: usize);

    /// The tile's cancellation fired while it was being processed.
    fn tile_abandoned(&self, tile: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl RasterEvents for NoopEvents {
    fn layer_built(&self, _: &str, _: RasterLayer, _: LayerSource, _: Duration) {}

    fn layer_failed(&self, _: &str, _: RasterLayer, _: &BuildError) {}

    fn tile_completed(&self, _: &str, _: usize) {}

    fn tile_abandoned(&self, _: &str) {}
}
