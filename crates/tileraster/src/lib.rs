//! Background rasterization of map tiles.
//!
//! Tiles are queued on a [`TileQueue`]; a [`TileRasterService`] running on its
//! own thread produces two byte rasters per tile, the terrain-type layer and
//! the buildings/roads layer. Each layer is read from the intermediate cache
//! when a file for the tile and version exists, and rasterized from
//! grid-cell scoped shapefiles otherwise.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tileraster::{
//!     CreatorConfig, LayerMaps, RasterCreator, RasterReader, Tile, TileQueue, TileRasterService,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! let queue = Arc::new(TileQueue::new());
//! let worker = TileRasterService::new(
//!     Arc::clone(&queue),
//!     Box::new(RasterReader::new()),
//!     Box::new(RasterCreator::new("/data/shapes", CreatorConfig::default())),
//!     Arc::new(LayerMaps::topographic()),
//!     CancellationToken::new(),
//! )
//! .spawn()?;
//!
//! let tile = Arc::new(Tile::new("E374000N6672000S1000", "1", "/data/intermediate"));
//! queue.enqueue(Arc::clone(&tile));
//! # worker.cancel();
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod builder;
pub mod classes;
pub mod error;
pub mod events;
pub mod layer;
pub mod namer;
pub mod queue;
pub mod rasterize;
pub mod service;
pub mod tile;
pub mod vector;

pub use builder::{CreatorConfig, RasterBuilder, RasterCreator, RasterReader};
pub use byteraster::ByteRaster;
pub use classes::{ClassTable, ClassValueMap, LayerMaps};
pub use error::{BuildError, ClassTableError, LayerFailure};
pub use events::{LayerSource, NoopEvents, RasterEvents};
pub use layer::{CacheFilename, RasterLayer};
pub use queue::TileQueue;
pub use service::{SourceNaming, TileRasterService, WorkerConfig, WorkerHandle, WorkerState};
pub use tile::Tile;
pub use vector::{Feature, FeatureSource, Geometry, ShapefileSource};
