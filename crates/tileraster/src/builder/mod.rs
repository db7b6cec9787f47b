//! Producers of a tile's raster layers.
//!
//! The worker configures a builder for one layer and then calls
//! [`RasterBuilder::build`]. [`RasterReader`] loads a previously cached raster,
//! [`RasterCreator`] rasterizes vector sources. Choosing between the two is the
//! worker's job; neither builder looks at the other's inputs.

mod creator;
mod reader;

pub use creator::{CreatorConfig, RasterCreator};
pub use reader::RasterReader;

use std::sync::Arc;

use byteraster::ByteRaster;

use crate::classes::ClassValueMap;
use crate::error::BuildError;
use crate::layer::RasterLayer;
use crate::tile::Tile;

pub trait RasterBuilder: Send {
    fn set_specifier(&mut self, layer: RasterLayer);

    /// Class/value map used when rasterizing. Ignored by builders that only read.
    fn set_class_value_map(&mut self, _classes: Arc<ClassValueMap>) {}

    /// Vector sources, processed in the given order. Ignored by builders that only read.
    fn set_source_filenames(&mut self, _filenames: Vec<String>) {}

    /// Produces the configured layer for `tile`.
    ///
    /// Implementations check the tile's cancellation before doing any I/O and
    /// return an empty raster when it is already signalled.
    fn build(&mut self, tile: &Tile) -> Result<ByteRaster, BuildError>;
}

impl<B: RasterBuilder + ?Sized> RasterBuilder for Box<B> {
    fn set_specifier(&mut self, layer: RasterLayer) {
        (**self).set_specifier(layer)
    }

    fn set_class_value_map(&mut self, classes: Arc<ClassValueMap>) {
        (**self).set_class_value_map(classes)
    }

    fn set_source_filenames(&mut self, filenames: Vec<String>) {
        (**self).set_source_filenames(filenames)
    }

    fn build(&mut self, tile: &Tile) -> Result<ByteRaster, BuildError> {
        (**self).build(tile)
    }
}
