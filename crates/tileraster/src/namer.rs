//! Tile naming: `E{min_x}N{min_y}S{edge}` in whole metres of a projected CRS.
//!
//! `encode` snaps the given coordinate down to the grid of the requested edge
//! length, so re-encoding a fine tile's corner at a coarser edge yields the
//! name of the grid cell that contains it.

/// Axis-aligned bounding box in projected metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    #[inline]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    #[inline]
    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    /// Bounding box of a set of points; `None` when there are no finite points.
    pub fn of_points<'a>(points: impl IntoIterator<Item = &'a [f64; 2]>) -> Option<Envelope> {
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);

        for &[x, y] in points {
            if x.is_finite() && y.is_finite() {
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);
            }
        }

        min_x.is_finite().then_some(Envelope {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }
}

/// Largest coordinate magnitude of a tile corner. Corners stay exact as `f64`.
pub const MAX_COORD: i64 = 1 << 53;

/// Name of the `edge_m` grid cell containing `(x, y)`, or `None` when the
/// snapped corner does not fit.
pub fn encode(x: i64, y: i64, edge_m: u32) -> Option<String> {
    let edge = i64::from(edge_m.max(1));
    let snap = |v: i64| v.div_euclid(edge).checked_mul(edge);
    Some(format!("E{}N{}S{}", snap(x)?, snap(y)?, edge))
}

/// Splits a tile name into `(min_x, min_y, edge_m)`.
pub fn parse(name: &str) -> Option<(i64, i64, u32)> {
    let rest = name.strip_prefix('E')?;
    let (x, rest) = rest.split_once('N')?;
    let (y, edge) = rest.split_once('S')?;

    let edge: u32 = edge.parse().ok().filter(|&e| e > 0)?;
    let in_range = |v: &i64| (-MAX_COORD..=MAX_COORD).contains(v);
    let x = x.parse().ok().filter(in_range)?;
    let y = y.parse().ok().filter(in_range)?;
    Some((x, y, edge))
}

/// Bounding box covered by the named tile.
pub fn decode(name: &str) -> Option<Envelope> {
    let (x, y, edge) = parse(name)?;
    let (x, y) = (x as f64, y as f64);

    Some(Envelope {
        min_x: x,
        min_y: y,
        max_x: x + f64::from(edge),
        max_y: y + f64::from(edge),
    })
}

/// Name of the coarser grid cell that contains the tile's lower-left corner.
pub fn grid_cell_of(tile_name: &str, cell_edge_m: u32) -> Option<String> {
    let (x, y, _) = parse(tile_name)?;
    encode(x, y, cell_edge_m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_snaps_to_grid() {
        assert_eq!(encode(374_123, 6_672_999, 1000).unwrap(), "E374000N6672000S1000");
        assert_eq!(encode(374_000, 6_672_000, 12_000).unwrap(), "E372000N6672000S12000");
        assert_eq!(encode(-1, -1, 1000).unwrap(), "E-1000N-1000S1000");
    }

    #[test]
    fn encode_refuses_overflowing_corner() {
        assert!(encode(i64::MIN, 0, 12_000).is_none());
        assert!(encode(0, i64::MIN + 1, 1000).is_none());
    }

    #[test]
    fn extreme_coordinates_are_not_tile_names() {
        assert!(parse("E-9223372036854775808N0S1000").is_none());
        assert!(grid_cell_of("E-9223372036854775808N0S1000", 12_000).is_none());
        assert!(decode(&format!("E{}N0S1000", MAX_COORD + 1)).is_none());

        let edge = format!("E{}N{}S1000", -MAX_COORD, MAX_COORD);
        assert!(grid_cell_of(&edge, 12_000).is_some());
    }

    #[test]
    fn decode_returns_bounds() {
        let env = decode("E374000N6672000S1000").unwrap();
        assert_eq!(env.min_x, 374_000.0);
        assert_eq!(env.min_y, 6_672_000.0);
        assert_eq!(env.max_x, 375_000.0);
        assert_eq!(env.max_y, 6_673_000.0);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode("").is_none());
        assert!(decode("P5114A1").is_none());
        assert!(decode("E1N2S0").is_none());
        assert!(decode("E1N2").is_none());
        assert!(decode("Ex N2S3").is_none());
    }

    #[test]
    fn grid_cell_contains_tile() {
        assert_eq!(
            grid_cell_of("E385000N6683000S1000", 12_000).as_deref(),
            Some("E384000N6672000S12000")
        );
        assert_eq!(
            grid_cell_of("E384000N6672000S1000", 12_000).as_deref(),
            Some("E384000N6672000S12000")
        );
    }

    #[test]
    fn envelope_of_points_skips_non_finite() {
        let pts = [[1.0, 5.0], [f64::NAN, 0.0], [-2.0, 3.0]];
        let env = Envelope::of_points(&pts).unwrap();
        assert_eq!((env.min_x, env.min_y, env.max_x, env.max_y), (-2.0, 3.0, 1.0, 5.0));
        assert!(Envelope::of_points(&[] as &[[f64; 2]]).is_none());
    }
}
