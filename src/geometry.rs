//! Boundary features and their attribute table.
//!
//! Shapes are kept exactly as read; only the attribute table is rewritten by
//! the reconciler. The `.prj` sidecar travels with the collection so every
//! export carries the input's coordinate reference system unchanged.

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use dbase::{
    FieldValue, Record, UnicodeLossy,
    encoding::LossyCodePage,
    yore::code_pages::{CP866, CP1250, CP1251, CP1252},
};
use encoding_rs::{IBM866, UTF_8, WINDOWS_1250, WINDOWS_1251, WINDOWS_1252};
use log::{debug, info, warn};
use shapefile::{Polygon, PolygonM, PolygonZ, Shape, ShapeReader, ShapeType};

use crate::{config::Config, data::Value, error::JoinError, io_utils};

/// Feature geometry. Polygon layers are carried through unchanged; any other
/// shape type only remembers its kind so the writers can reject it.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Polygon(Polygon),
    PolygonM(PolygonM),
    PolygonZ(PolygonZ),
    Null,
    Unsupported(ShapeType),
}

impl Geometry {
    pub fn shape_type(&self) -> ShapeType {
        match self {
            Geometry::Polygon(_) => ShapeType::Polygon,
            Geometry::PolygonM(_) => ShapeType::PolygonM,
            Geometry::PolygonZ(_) => ShapeType::PolygonZ,
            Geometry::Null => ShapeType::NullShape,
            Geometry::Unsupported(kind) => *kind,
        }
    }
}

impl From<Shape> for Geometry {
    fn from(shape: Shape) -> Self {
        match shape {
            Shape::Polygon(polygon) => Geometry::Polygon(polygon),
            Shape::PolygonM(polygon) => Geometry::PolygonM(polygon),
            Shape::PolygonZ(polygon) => Geometry::PolygonZ(polygon),
            Shape::NullShape => Geometry::Null,
            other => Geometry::Unsupported(other.shapetype()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Geometry,
    pub attributes: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct FeatureCollection {
    pub columns: Vec<String>,
    pub features: Vec<Feature>,
    /// WKT of the coordinate reference system, when the input had a `.prj`.
    pub prj: Option<String>,
}

impl FeatureCollection {
    pub fn new(columns: Vec<String>, features: Vec<Feature>) -> Self {
        Self {
            columns,
            features,
            prj: None,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn value(&self, feature: usize, column: usize) -> &Value {
        self.features
            .get(feature)
            .and_then(|f| f.attributes.get(column))
            .unwrap_or(&Value::Null)
    }

    pub fn read_shapefile(path: &Path) -> Result<Self> {
        let table = open_attribute_table(path)?;
        let columns = table
            .fields()
            .iter()
            .map(|field| field.name().to_string())
            .collect::<Vec<_>>();
        debug!("Boundary attributes: {columns:?}");

        let shapes = ShapeReader::from_path(path)
            .with_context(|| format!("Failed to open shapefile: {}", path.display()))?;
        let mut reader = shapefile::Reader::new(shapes, table);
        let mut features = Vec::new();
        for (idx, result) in reader.iter_shapes_and_records().enumerate() {
            let (shape, record) =
                result.with_context(|| format!("Reading shape+record {idx} of {path:?}"))?;
            features.push(Feature {
                geometry: Geometry::from(shape),
                attributes: record_values(&record, &columns),
            });
        }

        Ok(Self {
            columns,
            features,
            prj: io_utils::read_sidecar(path, "prj")?,
        })
    }

    /// Keeps features whose `column` equals `code`, ignoring case and padding.
    /// `None` when the column does not exist.
    pub fn filter_by_region(&self, column: &str, code: &str) -> Option<Self> {
        let idx = self.column_index(column)?;
        let features = self
            .features
            .iter()
            .filter(|f| {
                f.attributes
                    .get(idx)
                    .is_some_and(|v| v.as_display().trim().eq_ignore_ascii_case(code.trim()))
            })
            .cloned()
            .collect();
        Some(Self {
            columns: self.columns.clone(),
            features,
            prj: self.prj.clone(),
        })
    }
}

/// Opens the `.dbf` with the code page named by the `.cpg` sidecar. Without a
/// usable `.cpg` the code page mark in the DBF header decides.
fn open_attribute_table(path: &Path) -> Result<dbase::Reader<BufReader<File>>> {
    let dbf = io_utils::sidecar_path(path, "dbf");
    let label = io_utils::read_sidecar(path, "cpg")?;
    let encoding = label.as_deref().and_then(io_utils::resolve_code_page);
    let table = match encoding {
        Some(enc) if enc == UTF_8 => dbase::Reader::from_path_with_encoding(&dbf, UnicodeLossy),
        Some(enc) if enc == WINDOWS_1252 => {
            dbase::Reader::from_path_with_encoding(&dbf, LossyCodePage(CP1252))
        }
        Some(enc) if enc == WINDOWS_1250 => {
            dbase::Reader::from_path_with_encoding(&dbf, LossyCodePage(CP1250))
        }
        Some(enc) if enc == WINDOWS_1251 => {
            dbase::Reader::from_path_with_encoding(&dbf, LossyCodePage(CP1251))
        }
        Some(enc) if enc == IBM866 => {
            dbase::Reader::from_path_with_encoding(&dbf, LossyCodePage(CP866))
        }
        _ => {
            if let Some(label) = &label {
                warn!(
                    "Unsupported code page '{}' in {:?}; using the DBF header",
                    label.trim(),
                    io_utils::sidecar_path(path, "cpg")
                );
            }
            dbase::Reader::from_path(&dbf)
        }
    };
    table.with_context(|| format!("Opening attribute table {dbf:?}"))
}

fn record_values(record: &Record, columns: &[String]) -> Vec<Value> {
    columns
        .iter()
        .map(|name| record.get(name).map(field_to_value).unwrap_or(Value::Null))
        .collect()
}

fn field_to_value(field: &FieldValue) -> Value {
    match field {
        FieldValue::Character(Some(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Value::Null
            } else {
                Value::Text(trimmed.to_string())
            }
        }
        FieldValue::Numeric(Some(n)) => Value::Float(*n),
        FieldValue::Float(Some(f)) => Value::Float(f64::from(*f)),
        FieldValue::Integer(i) => Value::Integer(i64::from(*i)),
        FieldValue::Double(d) => Value::Float(*d),
        FieldValue::Currency(c) => Value::Float(*c),
        FieldValue::Logical(Some(b)) => Value::Text(if *b { "T" } else { "F" }.to_string()),
        FieldValue::Date(Some(d)) => {
            Value::Text(format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day()))
        }
        FieldValue::Memo(s) => Value::Text(s.clone()),
        FieldValue::Character(None)
        | FieldValue::Numeric(None)
        | FieldValue::Float(None)
        | FieldValue::Logical(None)
        | FieldValue::Date(None) => Value::Null,
        other => Value::Text(format!("{other:?}")),
    }
}

/// Loads the state boundaries, falling back to the nationwide file filtered
/// by region code.
pub fn load_boundaries(config: &Config) -> Result<FeatureCollection> {
    if config.geometry_path.exists() {
        let collection = FeatureCollection::read_shapefile(&config.geometry_path)?;
        info!(
            "Read {} boundary file: {} feature(s)",
            config.region_code,
            collection.len()
        );
        return Ok(collection);
    }

    if !config.national_geometry_path.exists() {
        return Err(JoinError::MissingGeometry {
            state: config.geometry_path.clone(),
            national: config.national_geometry_path.clone(),
        }
        .into());
    }

    let national = FeatureCollection::read_shapefile(&config.national_geometry_path)?;
    let Some(filtered) = national.filter_by_region(&config.region_column, &config.region_code)
    else {
        return Err(JoinError::MissingRegionColumn {
            path: config.national_geometry_path.clone(),
            column: config.region_column.clone(),
        }
        .into());
    };
    info!(
        "Read nationwide boundary file: {} feature(s); after {} filter: {}",
        national.len(),
        config.region_code,
        filtered.len()
    );
    Ok(filtered)
}

#[cfg(test)]
mod tests {
    use shapefile::{Point, PolygonRing};

    use super::*;

    fn square() -> Geometry {
        Geometry::Polygon(Polygon::new(PolygonRing::Outer(vec![
            Point::new(0.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(1.0, 1.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 0.0),
        ])))
    }

    fn collection() -> FeatureCollection {
        FeatureCollection::new(
            vec!["CD_MUN".into(), "SIGLA".into()],
            vec![
                Feature {
                    geometry: square(),
                    attributes: vec![Value::Text("3106200".into()), Value::Text("MG".into())],
                },
                Feature {
                    geometry: square(),
                    attributes: vec![Value::Text("3550308".into()), Value::Text("SP".into())],
                },
                Feature {
                    geometry: square(),
                    attributes: vec![Value::Text("3170206".into()), Value::Text("mg ".into())],
                },
            ],
        )
    }

    #[test]
    fn region_filter_is_case_insensitive() {
        let filtered = collection().filter_by_region("SIGLA", "MG").unwrap();
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.value(1, 0), &Value::Text("3170206".into()));
    }

    #[test]
    fn region_filter_requires_the_column() {
        assert!(collection().filter_by_region("UF", "MG").is_none());
    }

    #[test]
    fn dbf_fields_map_to_values() {
        assert_eq!(
            field_to_value(&FieldValue::Character(Some("  Betim ".into()))),
            Value::Text("Betim".into())
        );
        assert_eq!(field_to_value(&FieldValue::Character(Some("   ".into()))), Value::Null);
        assert_eq!(field_to_value(&FieldValue::Numeric(Some(3106200.0))), Value::Float(3106200.0));
        assert_eq!(field_to_value(&FieldValue::Numeric(None)), Value::Null);
        assert_eq!(field_to_value(&FieldValue::Integer(7)), Value::Integer(7));
        assert_eq!(field_to_value(&FieldValue::Logical(Some(true))), Value::Text("T".into()));
    }

    /// Writes a one-feature shapefile with `name` encoded by `encoding`, then
    /// clears the DBF language driver byte so only a `.cpg` can name the code
    /// page.
    fn write_unmarked<E: dbase::Encoding + 'static>(
        dir: &Path,
        encoding: E,
        name: &str,
    ) -> std::path::PathBuf {
        let path = dir.join("unmarked.shp");
        let builder = dbase::TableWriterBuilder::with_encoding(encoding)
            .add_character_field(dbase::FieldName::try_from("NM_MUN").unwrap(), 40);
        {
            let mut writer = shapefile::Writer::from_path(&path, builder).unwrap();
            let mut record = Record::default();
            record.insert("NM_MUN".to_string(), FieldValue::Character(Some(name.to_string())));
            let Geometry::Polygon(polygon) = square() else {
                unreachable!()
            };
            writer.write_shape_and_record(&polygon, &record).unwrap();
        }
        let dbf = io_utils::sidecar_path(&path, "dbf");
        let mut bytes = std::fs::read(&dbf).unwrap();
        bytes[29] = 0;
        std::fs::write(&dbf, bytes).unwrap();
        path
    }

    #[test]
    fn cpg_sidecar_selects_utf8_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_unmarked(dir.path(), UnicodeLossy, "São João del-Rei");

        let unmarked = FeatureCollection::read_shapefile(&path).unwrap();
        assert_ne!(unmarked.value(0, 0), &Value::Text("São João del-Rei".into()));

        io_utils::write_sidecar(&path, "cpg", "UTF-8").unwrap();
        let read = FeatureCollection::read_shapefile(&path).unwrap();
        assert_eq!(read.columns, vec!["NM_MUN"]);
        assert_eq!(read.value(0, 0), &Value::Text("São João del-Rei".into()));
    }

    #[test]
    fn cpg_sidecar_selects_windows_code_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_unmarked(dir.path(), LossyCodePage(CP1252), "Conceição do Pará");
        io_utils::write_sidecar(&path, "cpg", "1252").unwrap();

        let read = FeatureCollection::read_shapefile(&path).unwrap();
        assert_eq!(read.value(0, 0), &Value::Text("Conceição do Pará".into()));
    }

    #[test]
    fn shapes_convert_to_geometry() {
        let polygon = Polygon::new(PolygonRing::Outer(vec![
            Point::new(0.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 0.0),
        ]));
        let geometry = Geometry::from(Shape::Polygon(polygon.clone()));
        assert_eq!(geometry, Geometry::Polygon(polygon));
        assert_eq!(geometry.shape_type(), ShapeType::Polygon);
        assert_eq!(Geometry::from(Shape::NullShape), Geometry::Null);
        let point = Geometry::from(Shape::Point(Point::new(1.0, 2.0)));
        assert_eq!(point, Geometry::Unsupported(ShapeType::Point));
        assert_eq!(point.shape_type(), ShapeType::Point);
    }

    #[test]
    fn missing_boundary_files_are_fatal() {
        let config = Config {
            geometry_path: "/nonexistent/state.shp".into(),
            national_geometry_path: "/nonexistent/national.shp".into(),
            ..Config::default()
        };
        let err = load_boundaries(&config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<JoinError>(),
            Some(JoinError::MissingGeometry { .. })
        ));
    }
}
