//! Burns vector features into a [`ByteRaster`].
//!
//! Polygons are filled with the even-odd rule over all of their rings, so
//! holes stay untouched. Polylines are buffered by a radius and every cell
//! whose centre lies within that distance of a segment is painted. A cell is
//! painted with the feature's mapped value, later features overwriting
//! earlier ones.

use byteraster::ByteRaster;

use crate::classes::ClassValueMap;
use crate::namer::Envelope;
use crate::vector::{Feature, Geometry};

/// Projected coordinates → fractional pixel coordinates of a raster.
///
/// Pixel `(col, row)` spans `[col, col + 1) x [row, row + 1)`; row 0 is north.
#[derive(Debug, Clone, Copy)]
pub struct PixelTransform {
    min_x: f64,
    max_y: f64,
    cell_size: f64,
}

impl PixelTransform {
    pub fn of(raster: &ByteRaster) -> Self {
        Self {
            min_x: raster.min_x,
            max_y: raster.max_y(),
            cell_size: raster.cell_size,
        }
    }

    #[inline]
    pub fn to_pixel(&self, [x, y]: [f64; 2]) -> (f64, f64) {
        (
            (x - self.min_x) / self.cell_size,
            (self.max_y - y) / self.cell_size,
        )
    }

    #[inline]
    pub fn metres_to_pixels(&self, metres: f64) -> f64 {
        metres / self.cell_size
    }
}

#[inline]
fn clamp_i(v: i64, lo: i64, hi: i64) -> i64 {
    v.max(lo).min(hi)
}

/// Fills the cells whose centres are inside `rings` (even-odd rule).
pub fn rasterize_polygon(raster: &mut ByteRaster, rings: &[Vec<(f64, f64)>], value: u8) {
    if raster.is_empty() {
        return;
    }

    let (w, h) = (raster.width as i64, raster.height as i64);

    let (mut ymin, mut ymax) = (f64::INFINITY, f64::NEG_INFINITY);
    for &(_, y) in rings.iter().flatten() {
        ymin = ymin.min(y);
        ymax = ymax.max(y);
    }
    if !(ymin.is_finite() && ymax.is_finite()) {
        return;
    }

    let row_start = clamp_i((ymin - 0.5).ceil() as i64, 0, h);
    let row_end = clamp_i((ymax - 0.5).floor() as i64, -1, h - 1);

    let mut crossings = Vec::<f64>::new();

    for row in row_start..=row_end {
        let y = row as f64 + 0.5;
        crossings.clear();

        for ring in rings {
            // A ring needs at least three vertices to enclose anything.
            if ring.len() < 3 {
                continue;
            }

            let mut j = ring.len() - 1;
            for i in 0..ring.len() {
                let (xi, yi) = ring[i];
                let (xj, yj) = ring[j];

                // Edge crosses the horizontal line through the cell centres?
                if (yi > y) != (yj > y) {
                    crossings.push(xi + (y - yi) * (xj - xi) / (yj - yi));
                }

                j = i;
            }
        }

        crossings.sort_unstable_by(f64::total_cmp);

        for span in crossings.chunks_exact(2) {
            let col_start = clamp_i((span[0] - 0.5).ceil() as i64, 0, w);
            let col_end = clamp_i((span[1] - 0.5).ceil() as i64 - 1, -1, w - 1);

            for col in col_start..=col_end {
                raster.set(col as u32, row as u32, value);
            }
        }
    }
}

#[inline]
fn sqr(x: f64) -> f64 {
    x * x
}

/// Paints every cell whose centre lies within `radius_px` of the polyline.
pub fn rasterize_polyline(raster: &mut ByteRaster, line: &[(f64, f64)], radius_px: f64, value: u8) {
    if raster.is_empty() || line.len() < 2 {
        return;
    }

    let (w, h) = (raster.width as i64, raster.height as i64);

    // Ensure a sensible minimum radius (half-pixel) and pre-compute its square.
    let radius = radius_px.max(0.5);
    let radius_sq = radius * radius;

    for segment in line.windows(2) {
        let (x0, y0) = segment[0];
        let (x1, y1) = segment[1];

        let min_x = (x0.min(x1) - radius).floor() as i64;
        let max_x = (x0.max(x1) + radius).ceil() as i64;
        let min_y = (y0.min(y1) - radius).floor() as i64;
        let max_y = (y0.max(y1) + radius).ceil() as i64;

        // Segment entirely outside the raster.
        if max_x < 0 || max_y < 0 || min_x >= w || min_y >= h {
            continue;
        }

        let (min_x, max_x) = (clamp_i(min_x, 0, w - 1), clamp_i(max_x, 0, w - 1));
        let (min_y, max_y) = (clamp_i(min_y, 0, h - 1), clamp_i(max_y, 0, h - 1));

        let dx = x1 - x0;
        let dy = y1 - y0;
        let denom = dx * dx + dy * dy + 1e-12;

        for y in min_y..=max_y {
            for x in min_x..=max_x {
                let px = x as f64 + 0.5;
                let py = y as f64 + 0.5;

                // Closest point on the segment to the cell centre.
                let t = (((px - x0) * dx + (py - y0) * dy) / denom).clamp(0.0, 1.0);
                let cx = x0 + t * dx;
                let cy = y0 + t * dy;

                if sqr(px - cx) + sqr(py - cy) <= radius_sq {
                    raster.set(x as u32, y as u32, value);
                }
            }
        }
    }
}

/// Burns `features` in order. Features whose class has no value in `classes`,
/// or that lie away from the raster, are skipped. Returns the number of
/// features painted.
pub fn burn_features(
    raster: &mut ByteRaster,
    features: &[Feature],
    classes: &ClassValueMap,
    line_radius_m: f64,
) -> usize {
    let transform = PixelTransform::of(raster);
    let radius_px = transform.metres_to_pixels(line_radius_m);

    // Raster extent grown by the widest possible line buffer.
    let margin = line_radius_m.max(raster.cell_size);
    let extent = Envelope {
        min_x: raster.min_x - margin,
        min_y: raster.min_y - margin,
        max_x: raster.max_x() + margin,
        max_y: raster.max_y() + margin,
    };

    let mut painted = 0usize;

    for feature in features {
        let Some(value) = classes.get(feature.class) else {
            continue;
        };
        if !feature.geometry.envelope().is_some_and(|e| e.intersects(&extent)) {
            continue;
        }

        match &feature.geometry {
            Geometry::Polygon(rings) => {
                let rings_px: Vec<Vec<(f64, f64)>> = rings
                    .iter()
                    .map(|ring| ring.iter().map(|&p| transform.to_pixel(p)).collect())
                    .collect();
                rasterize_polygon(raster, &rings_px, value);
            }
            Geometry::Polyline(parts) => {
                for part in parts {
                    let line_px: Vec<(f64, f64)> =
                        part.iter().map(|&p| transform.to_pixel(p)).collect();
                    rasterize_polyline(raster, &line_px, radius_px, value);
                }
            }
        }

        painted += 1;
    }

    painted
}
