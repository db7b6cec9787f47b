use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tileraster::{BuildError, LayerSource, RasterEvents, RasterLayer};

/// Prometheus collectors fed by the tile raster worker.
///
/// Shared as `Arc<Metrics>` between the worker (as its [`RasterEvents`] sink)
/// and the HTTP endpoint.
pub struct Metrics {
    pub registry: Registry,
    /// Layers stored on tiles, by layer and by cache hit / created.
    pub layers_built_total: IntCounterVec,
    pub layer_build_seconds: HistogramVec,
    pub layer_failures_total: IntCounterVec,
    pub tiles_completed_total: IntCounter,
    pub tiles_abandoned_total: IntCounter,
    /// Queued tiles that are neither complete, failed nor abandoned.
    pub tiles_pending: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("rasterd".into()), None)?;

        macro_rules! reg {
            ($metric:expr) => {{
                let collector = $metric;
                registry.register(Box::new(collector.clone()))?;
                collector
            }};
        }

        Ok(Self {
            layers_built_total: reg!(IntCounterVec::new(
                Opts::new("layers_built_total", "Raster layers stored on tiles"),
                &["layer", "source"]
            )?),
            layer_build_seconds: reg!(HistogramVec::new(
                HistogramOpts::new("layer_build_seconds", "Time to read or rasterize one layer")
                    .buckets(vec![0.001, 0.005, 0.025, 0.1, 0.5, 1.0, 5.0, 20.0]),
                &["source"]
            )?),
            layer_failures_total: reg!(IntCounterVec::new(
                Opts::new("layer_failures_total", "Layer builds that failed and skipped their tile"),
                &["layer"]
            )?),
            tiles_completed_total: reg!(IntCounter::new(
                "tiles_completed_total",
                "Tiles with both layers stored"
            )?),
            tiles_abandoned_total: reg!(IntCounter::new(
                "tiles_abandoned_total",
                "Tiles dropped because their cancellation fired"
            )?),
            tiles_pending: reg!(IntGauge::new("tiles_pending", "Queued tiles not yet finished")?),
            registry,
        })
    }

    /// Serves the registry on `/metrics`.
    pub fn router(&self) -> Router {
        let registry = self.registry.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move {
                    let mut buffer = Vec::new();
                    match TextEncoder::new().encode(&registry.gather(), &mut buffer) {
                        Ok(()) => String::from_utf8_lossy(&buffer).into_owned().into_response(),
                        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
                    }
                }
            }),
        )
    }
}

impl RasterEvents for Metrics {
    fn layer_built(&self, _tile: &str, layer: RasterLayer, source: LayerSource, elapsed: Duration) {
        self.layers_built_total
            .with_label_values(&[layer.as_str(), source.as_str()])
            .inc();
        self.layer_build_seconds
            .with_label_values(&[source.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    fn layer_failed(&self, _tile: &str, layer: RasterLayer, _error: &BuildError) {
        self.layer_failures_total
            .with_label_values(&[layer.as_str()])
            .inc();
        self.tiles_pending.dec();
    }

    fn tile_completed(&self, _tile: &str, _completed: usize) {
        self.tiles_completed_total.inc();
        self.tiles_pending.dec();
    }

    fn tile_abandoned(&self, _tile: &str) {
        self.tiles_abandoned_total.inc();
        self.tiles_pending.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_drive_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.tiles_pending.set(3);

        let ms = Duration::from_millis(4);
        metrics.layer_built("E0N0S1000", RasterLayer::TerrainType, LayerSource::Created, ms);
        metrics.layer_built("E0N0S1000", RasterLayer::BuildingsRoads, LayerSource::CacheHit, ms);
        metrics.tile_completed("E0N0S1000", 1);
        metrics.layer_failed(
            "E1000N0S1000",
            RasterLayer::TerrainType,
            &BuildError::InvalidTileName("x".into()),
        );
        metrics.tile_abandoned("E2000N0S1000");

        let created = metrics
            .layers_built_total
            .with_label_values(&["terraintype", "created"])
            .get();
        assert_eq!(created, 1);
        assert_eq!(metrics.tiles_completed_total.get(), 1);
        assert_eq!(metrics.tiles_abandoned_total.get(), 1);
        assert_eq!(metrics.layer_failures_total.with_label_values(&["terraintype"]).get(), 1);
        assert_eq!(metrics.tiles_pending.get(), 0);
    }

    #[test]
    fn gathered_names_are_prefixed() {
        let metrics = Metrics::new().unwrap();
        metrics.tiles_completed_total.inc();

        let names: Vec<String> = metrics
            .registry
            .gather()
            .iter()
            .map(|mf| mf.get_name().to_owned())
            .collect();
        assert!(names.contains(&"rasterd_tiles_completed_total".to_owned()));
    }
}
