//! Vector features read from topographic shapefiles.

use std::path::{Path, PathBuf};

use shapefile::dbase::FieldValue;
use shapefile::Shape;

use crate::error::BuildError;
use crate::namer::Envelope;

/// Attribute holding the feature class code in topographic database exports.
pub const DEFAULT_CLASS_FIELD: &str = "LUOKKA";

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// Rings of one polygon (outer and holes), filled with the even-odd rule.
    Polygon(Vec<Vec<[f64; 2]>>),
    /// Parts of one polyline.
    Polyline(Vec<Vec<[f64; 2]>>),
}

impl Geometry {
    pub fn envelope(&self) -> Option<Envelope> {
        let parts = match self {
            Geometry::Polygon(rings) => rings,
            Geometry::Polyline(parts) => parts,
        };
        Envelope::of_points(parts.iter().flatten())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub class: i32,
    pub geometry: Geometry,
}

/// Loads the features of one vector source file.
pub trait FeatureSource: Send + Sync {
    fn load(&self, path: &Path) -> Result<Vec<Feature>, BuildError>;
}

/// Reads `.shp` + `.dbf` pairs with the `shapefile` crate.
#[derive(Debug, Clone)]
pub struct ShapefileSource {
    class_field: String,
}

impl Default for ShapefileSource {
    fn default() -> Self {
        Self::new(DEFAULT_CLASS_FIELD)
    }
}

impl ShapefileSource {
    pub fn new(class_field: impl Into<String>) -> Self {
        Self {
            class_field: class_field.into(),
        }
    }
}

fn rasterization_error(path: &Path, reason: impl ToString) -> BuildError {
    BuildError::Rasterization {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Integer class code from a dBase attribute, whatever numeric type it was stored as.
fn class_code(value: &FieldValue) -> Option<i32> {
    match value {
        FieldValue::Numeric(Some(v)) => Some(*v as i32),
        FieldValue::Float(Some(v)) => Some(*v as i32),
        FieldValue::Double(v) => Some(*v as i32),
        FieldValue::Integer(v) => Some(*v),
        FieldValue::Character(Some(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

macro_rules! rings_xy {
    ($shape:expr, $parts:ident) => {
        $shape
            .$parts()
            .iter()
            .map(|part| part.points().iter().map(|p| [p.x, p.y]).collect())
            .collect()
    };
}

macro_rules! parts_xy {
    ($shape:expr) => {
        $shape
            .parts()
            .iter()
            .map(|part| part.iter().map(|p| [p.x, p.y]).collect())
            .collect()
    };
}

fn geometry_of(shape: Shape) -> Option<Geometry> {
    let geometry = match shape {
        Shape::Polygon(p) => Geometry::Polygon(rings_xy!(p, rings)),
        Shape::PolygonM(p) => Geometry::Polygon(rings_xy!(p, rings)),
        Shape::PolygonZ(p) => Geometry::Polygon(rings_xy!(p, rings)),
        Shape::Polyline(l) => Geometry::Polyline(parts_xy!(l)),
        Shape::PolylineM(l) => Geometry::Polyline(parts_xy!(l)),
        Shape::PolylineZ(l) => Geometry::Polyline(parts_xy!(l)),
        _ => return None,
    };
    Some(geometry)
}

impl FeatureSource for ShapefileSource {
    fn load(&self, path: &Path) -> Result<Vec<Feature>, BuildError> {
        if !path.exists() {
            return Err(rasterization_error(path, "vector source not found"));
        }

        let mut reader =
            shapefile::Reader::from_path(path).map_err(|e| rasterization_error(path, e))?;

        let mut features = Vec::new();
        let mut skipped = 0usize;

        for item in reader.iter_shapes_and_records() {
            let (shape, record) = item.map_err(|e| rasterization_error(path, e))?;

            let class = match record.get(&self.class_field).and_then(class_code) {
                Some(class) => class,
                None => {
                    skipped += 1;
                    continue;
                }
            };

            match geometry_of(shape) {
                Some(geometry) => features.push(Feature { class, geometry }),
                None => skipped += 1,
            }
        }

        tracing::debug!(
            path = %path.display(),
            features = features.len(),
            skipped,
            "Loaded vector source"
        );

        Ok(features)
    }
}

/// Resolves bare source file names against a directory.
pub fn resolve_sources(dir: &Path, names: &[String]) -> Vec<PathBuf> {
    names.iter().map(|name| dir.join(name)).collect()
}
