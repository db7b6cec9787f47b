use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use byteraster::Encoding;
use clap::{Parser, ValueEnum};
use tileraster::{namer, CreatorConfig, WorkerConfig};

/// `rasterd` - Produces the terrain-type and buildings/roads rasters of map tiles.
///
/// Every tile given on the command line (or in `--tiles-file`) is queued for
/// the background worker. Layers already present in the intermediate directory
/// for the configured version are read back; the rest are rasterized from the
/// grid-cell shapefiles in `--source-dir` and cached.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Directory holding cached `{tile}_{layer}_v{version}.asp` rasters.
    #[arg(long, env = "TILE_INTERMEDIATE_DIR")]
    pub intermediate_dir: PathBuf,

    /// Directory holding the grid-cell shapefiles, e.g. `roads_E372000N6672000S12000_line.shp`.
    #[arg(long, env = "TILE_SOURCE_DIR")]
    pub source_dir: PathBuf,

    /// Version tag of the cached rasters. Bump it to force re-rasterization.
    #[arg(long = "raster-version", env = "TILE_RASTER_VERSION", default_value = "1")]
    pub raster_version: String,

    /// Edge of one raster cell, metres.
    #[arg(long, env = "TILE_CELL_SIZE_M", default_value_t = 1.0)]
    pub cell_size_m: f64,

    /// Half-width of the band painted along roads and cliffs, metres.
    #[arg(long, env = "TILE_LINE_RADIUS_M", default_value_t = 2.0)]
    pub line_radius_m: f64,

    /// Edge of the grid cells the shapefiles are split into, metres.
    #[arg(long, env = "TILE_GRID_CELL_EDGE_M", default_value_t = 12_000)]
    pub grid_cell_edge_m: u32,

    /// Attribute holding the feature class code.
    #[arg(long, env = "TILE_CLASS_FIELD", default_value = tileraster::vector::DEFAULT_CLASS_FIELD)]
    pub class_field: String,

    /// JSON file with the class/value tables; the built-in topographic tables otherwise.
    #[arg(long, env = "TILE_CLASS_TABLES")]
    pub class_tables: Option<PathBuf>,

    /// Payload encoding of newly cached rasters.
    #[arg(long, value_enum, default_value_t = CacheEncoding::Zlib)]
    pub cache_encoding: CacheEncoding,

    /// Largest grid one tile layer may rasterize into, in cells.
    #[arg(long, env = "TILE_MAX_CELLS", default_value_t = CreatorConfig::default().max_cells)]
    pub max_cells: usize,

    /// Do not cache rasterized layers.
    #[arg(long)]
    pub no_write_through: bool,

    /// Longest wait on an empty queue between cancellation checks, milliseconds.
    #[arg(long, env = "TILE_IDLE_POLL_MS", default_value_t = 1000)]
    pub idle_poll_ms: u64,

    /// Pause after each tile, milliseconds.
    #[arg(long, env = "TILE_BUSY_YIELD_MS", default_value_t = 10)]
    pub busy_yield_ms: u64,

    /// File with one tile name per line; blank lines and `#` comments are skipped.
    #[arg(long)]
    pub tiles_file: Option<PathBuf>,

    /// Keep the worker running after the queued tiles are done, until a shutdown signal.
    #[arg(long)]
    pub keep_running: bool,

    /// Listen address of the Prometheus metrics endpoint. Disabled when unset.
    #[arg(long, env = "RASTERD_METRICS_LISTEN_ADDR")]
    pub metrics_listen_addr: Option<SocketAddr>,

    /// Tile names such as `E374000N6672000S1000`.
    pub tiles: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheEncoding {
    Raw,
    Rle,
    Zlib,
}

impl From<CacheEncoding> for Encoding {
    fn from(value: CacheEncoding) -> Self {
        match value {
            CacheEncoding::Raw => Encoding::Raw,
            CacheEncoding::Rle => Encoding::Rle,
            CacheEncoding::Zlib => Encoding::Zlib,
        }
    }
}

impl Config {
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default()
            .with_idle_poll(Duration::from_millis(self.idle_poll_ms))
            .with_busy_yield(Duration::from_millis(self.busy_yield_ms))
            .with_grid_cell_edge_m(self.grid_cell_edge_m)
    }

    pub fn creator_config(&self) -> CreatorConfig {
        CreatorConfig::default()
            .with_cell_size_m(self.cell_size_m)
            .with_line_radius_m(self.line_radius_m)
            .with_encoding(self.cache_encoding.into())
            .with_write_through(!self.no_write_through)
            .with_max_cells(self.max_cells)
    }

    /// Positional tiles followed by those of `--tiles-file`, in order.
    pub fn tile_names(&self) -> anyhow::Result<Vec<String>> {
        let mut names = self.tiles.clone();

        if let Some(path) = &self.tiles_file {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read tiles file {}", path.display()))?;
            names.extend(parse_tile_list(&text));
        }

        for name in &names {
            anyhow::ensure!(namer::parse(name).is_some(), "Invalid tile name '{name}'");
        }

        Ok(names)
    }
}

fn parse_tile_list(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let base = ["rasterd", "--intermediate-dir", "/tmp/i", "--source-dir", "/tmp/s"];
        Config::try_parse_from(base.iter().chain(args)).unwrap()
    }

    #[test]
    fn defaults_match_library_defaults() {
        let config = parse(&[]);
        let worker = config.worker_config();
        assert_eq!(worker.idle_poll, WorkerConfig::default().idle_poll);
        assert_eq!(worker.grid_cell_edge_m, 12_000);

        let creator = config.creator_config();
        assert_eq!(creator.cell_size_m, 1.0);
        assert_eq!(creator.encoding, Encoding::Zlib);
        assert!(creator.write_through);
        assert_eq!(creator.max_cells, CreatorConfig::default().max_cells);
        assert_eq!(config.raster_version, "1");
    }

    #[test]
    fn tiles_from_args_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("tiles.txt");
        std::fs::write(&list, "# batch 1\nE1000N0S1000\n\n  E2000N0S1000  # river\n").unwrap();

        let config = parse(&["--tiles-file", list.to_str().unwrap(), "E0N0S1000"]);
        assert_eq!(
            config.tile_names().unwrap(),
            ["E0N0S1000", "E1000N0S1000", "E2000N0S1000"]
        );
    }

    #[test]
    fn invalid_tile_names_are_rejected() {
        let config = parse(&["E0N0S1000", "Helsinki"]);
        assert!(config.tile_names().is_err());
    }

    #[test]
    fn max_cells_flag() {
        let config = parse(&["--max-cells", "4096"]);
        assert_eq!(config.creator_config().max_cells, 4096);
    }

    #[test]
    fn cache_encoding_flag() {
        let config = parse(&["--cache-encoding", "rle", "--no-write-through"]);
        let creator = config.creator_config();
        assert_eq!(creator.encoding, Encoding::Rle);
        assert!(!creator.write_through);
    }
}
