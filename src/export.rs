//! Writers for enriched feature collections.
//!
//! The output format follows the path extension:
//!
//! - `.shp` writes an ESRI Shapefile. DBF field names are limited to
//!   [`DBF_FIELD_NAME_LIMIT`] bytes, so longer names are truncated with a
//!   warning and names that collide after truncation are made unique, again
//!   with a warning. The input `.prj` is copied alongside and a `.cpg` declares
//!   UTF-8 attribute text.
//! - `.geojson` / `.json` writes an RFC 7946 FeatureCollection with the full
//!   attribute names.

use std::{
    collections::HashSet,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use serde_json::json;
use shapefile::{
    PolygonRing,
    dbase::{FieldName, FieldValue, Record, TableWriterBuilder},
};

use crate::{
    data::Value,
    error::JoinError,
    geometry::{FeatureCollection, Geometry},
    io_utils,
};

pub const DBF_FIELD_NAME_LIMIT: usize = 10;
const DBF_CHARACTER_MAX: usize = 254;
const DBF_NUMERIC_LENGTH: u8 = 18;
const DBF_NUMERIC_DECIMALS: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Shapefile,
    GeoJson,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Result<Self, JoinError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("shp") => Ok(OutputFormat::Shapefile),
            Some(ext) if ext.eq_ignore_ascii_case("geojson") || ext.eq_ignore_ascii_case("json") => {
                Ok(OutputFormat::GeoJson)
            }
            _ => Err(JoinError::UnsupportedOutput(path.to_path_buf())),
        }
    }
}

pub fn write_collection(collection: &FeatureCollection, path: &Path) -> Result<()> {
    match OutputFormat::from_path(path)? {
        OutputFormat::Shapefile => write_shapefile(collection, path),
        OutputFormat::GeoJson => write_geojson(collection, path),
    }
}

/// Maps attribute names onto unique DBF field names of at most ten bytes.
/// Multi-byte characters are never split.
pub fn dbf_field_names(columns: &[String]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut truncated = Vec::new();
    let mut names = Vec::with_capacity(columns.len());
    for column in columns {
        let mut candidate = truncate_bytes(column, DBF_FIELD_NAME_LIMIT);
        if candidate != *column {
            truncated.push(format!("{column} -> {candidate}"));
        }
        if used.contains(&candidate.to_ascii_uppercase()) {
            let clashing = candidate.clone();
            let mut counter = 1usize;
            while used.contains(&candidate.to_ascii_uppercase()) {
                let suffix = format!("_{counter}");
                let keep = DBF_FIELD_NAME_LIMIT.saturating_sub(suffix.len());
                candidate = format!("{}{suffix}", truncate_bytes(&clashing, keep));
                counter += 1;
            }
            warn!(
                "Field '{column}' collides with another column as '{clashing}' after truncation; written as '{candidate}'"
            );
        }
        used.insert(candidate.to_ascii_uppercase());
        names.push(candidate);
    }
    if !truncated.is_empty() {
        warn!(
            "Shapefile field names are limited to {DBF_FIELD_NAME_LIMIT} bytes; truncated {}. Export to .geojson to keep full names.",
            truncated.join(", ")
        );
    }
    names
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Numeric { decimals: u8 },
    Character { length: u8 },
}

fn field_kind(collection: &FeatureCollection, column: usize) -> FieldKind {
    let values = collection
        .features
        .iter()
        .map(|f| f.attributes.get(column).unwrap_or(&Value::Null))
        .filter(|v| !v.is_null());
    let mut numeric = true;
    let mut integral = true;
    let mut longest = 1usize;
    for value in values {
        match value {
            Value::Integer(_) => {}
            Value::Float(f) if f.fract() == 0.0 => {}
            Value::Float(_) => integral = false,
            _ => numeric = false,
        }
        longest = longest.max(value.as_display().len());
    }
    if numeric {
        FieldKind::Numeric {
            decimals: if integral { 0 } else { DBF_NUMERIC_DECIMALS },
        }
    } else {
        FieldKind::Character {
            length: longest.min(DBF_CHARACTER_MAX) as u8,
        }
    }
}

fn field_value(value: &Value, kind: FieldKind) -> FieldValue {
    match kind {
        FieldKind::Numeric { .. } => FieldValue::Numeric(value.as_f64()),
        FieldKind::Character { length } => {
            if value.is_null() {
                FieldValue::Character(None)
            } else {
                FieldValue::Character(Some(truncate_bytes(&value.as_display(), length as usize)))
            }
        }
    }
}

/// Cuts `text` to at most `max` bytes without splitting a character.
fn truncate_bytes(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

pub fn write_shapefile(collection: &FeatureCollection, path: &Path) -> Result<()> {
    let names = dbf_field_names(&collection.columns);
    let kinds = (0..collection.columns.len())
        .map(|idx| field_kind(collection, idx))
        .collect::<Vec<_>>();

    let mut builder = TableWriterBuilder::new();
    for (name, kind) in names.iter().zip(&kinds) {
        let field = FieldName::try_from(name.as_str())
            .map_err(|e| anyhow!("Invalid DBF field name '{name}': {e:?}"))?;
        builder = match kind {
            FieldKind::Numeric { decimals } => {
                builder.add_numeric_field(field, DBF_NUMERIC_LENGTH, *decimals)
            }
            FieldKind::Character { length } => builder.add_character_field(field, *length),
        };
    }

    {
        let mut writer = shapefile::Writer::from_path(path, builder)
            .with_context(|| format!("Creating shapefile {path:?}"))?;
        for (index, feature) in collection.features.iter().enumerate() {
            let mut record = Record::default();
            for (pos, name) in names.iter().enumerate() {
                let value = feature.attributes.get(pos).unwrap_or(&Value::Null);
                record.insert(name.clone(), field_value(value, kinds[pos]));
            }
            let written = match &feature.geometry {
                Geometry::Polygon(polygon) => writer.write_shape_and_record(polygon, &record),
                Geometry::PolygonM(polygon) => writer.write_shape_and_record(polygon, &record),
                Geometry::PolygonZ(polygon) => writer.write_shape_and_record(polygon, &record),
                other => {
                    return Err(JoinError::UnsupportedShape {
                        index,
                        kind: format!("{:?}", other.shape_type()),
                    }
                    .into());
                }
            };
            written.with_context(|| format!("Writing feature {index} to {path:?}"))?;
        }
    }

    if let Some(prj) = &collection.prj {
        io_utils::write_sidecar(path, "prj", prj)?;
    }
    io_utils::write_sidecar(path, "cpg", "UTF-8")?;
    info!("Wrote {} feature(s) to {}", collection.len(), path.display());
    Ok(())
}

/// Rings as RFC 7946 polygons: an outer ring opens a polygon and the inner
/// rings that follow it become its holes.
fn polygon_geometry<P>(rings: &[PolygonRing<P>], xy: impl Fn(&P) -> [f64; 2]) -> serde_json::Value {
    let mut polygons: Vec<Vec<Vec<[f64; 2]>>> = Vec::new();
    for ring in rings {
        let (outer, points) = match ring {
            PolygonRing::Outer(points) => (true, points),
            PolygonRing::Inner(points) => (false, points),
        };
        // Shapefile outer rings are clockwise; RFC 7946 wants them counterclockwise.
        let coords = points.iter().rev().map(&xy).collect::<Vec<_>>();
        match polygons.last_mut() {
            Some(polygon) if !outer => polygon.push(coords),
            _ => polygons.push(vec![coords]),
        }
    }
    if polygons.len() == 1 {
        json!({ "type": "Polygon", "coordinates": polygons[0] })
    } else {
        json!({ "type": "MultiPolygon", "coordinates": polygons })
    }
}

fn geometry_json(geometry: &Geometry, index: usize) -> Result<serde_json::Value> {
    let geometry = match geometry {
        Geometry::Polygon(p) => polygon_geometry(p.rings(), |pt| [pt.x, pt.y]),
        Geometry::PolygonM(p) => polygon_geometry(p.rings(), |pt| [pt.x, pt.y]),
        Geometry::PolygonZ(p) => polygon_geometry(p.rings(), |pt| [pt.x, pt.y]),
        Geometry::Null => serde_json::Value::Null,
        other => {
            return Err(JoinError::UnsupportedShape {
                index,
                kind: format!("{:?}", other.shape_type()),
            }
            .into());
        }
    };
    Ok(geometry)
}

pub fn write_geojson(collection: &FeatureCollection, path: &Path) -> Result<()> {
    let features = collection
        .features
        .iter()
        .enumerate()
        .map(|(index, feature)| {
            let properties = collection
                .columns
                .iter()
                .zip(&feature.attributes)
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect::<serde_json::Map<_, _>>();
            Ok(json!({
                "type": "Feature",
                "geometry": geometry_json(&feature.geometry, index)?,
                "properties": properties,
            }))
        })
        .collect::<Result<Vec<_>>>()?;
    let document = json!({ "type": "FeatureCollection", "features": features });

    let file = File::create(path).with_context(|| format!("Creating output file {path:?}"))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &document).context("Serializing GeoJSON")?;
    writer.flush().context("Flushing GeoJSON output")?;
    info!("Wrote {} feature(s) to {}", collection.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use shapefile::{Point, Polygon, ShapeType};

    use super::*;
    use crate::geometry::Feature;

    fn square() -> Geometry {
        Geometry::Polygon(Polygon::new(PolygonRing::Outer(vec![
            Point::new(0.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(1.0, 1.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 0.0),
        ])))
    }

    fn names(columns: &[&str]) -> Vec<String> {
        dbf_field_names(&columns.iter().map(|c| c.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn short_names_pass_through() {
        assert_eq!(names(&["CD_MUN", "NM_MUN"]), vec!["CD_MUN", "NM_MUN"]);
    }

    #[test]
    fn truncation_collisions_are_made_unique() {
        let result = names(&["feminicidios_2022", "feminicidios_2023", "feminicidios_2024"]);
        assert_eq!(result, vec!["feminicidi", "feminici_1", "feminici_2"]);
        assert!(result.iter().all(|n| n.len() <= DBF_FIELD_NAME_LIMIT));
    }

    #[test]
    fn collisions_ignore_case() {
        assert_eq!(names(&["nome", "NOME"]), vec!["nome", "NOME_1"]);
    }

    #[test]
    fn accented_names_fit_the_byte_limit() {
        let result = names(&["população_total", "população_urbana", "área_km2"]);
        assert_eq!(result, vec!["população", "populaç_1", "área_km2"]);
        assert!(result.iter().all(|n| n.len() <= DBF_FIELD_NAME_LIMIT));
    }

    #[test]
    fn shapefile_with_accented_headers_reads_back() {
        let collection = FeatureCollection::new(
            vec!["população_total".into(), "população_urbana".into(), "município".into()],
            vec![Feature {
                geometry: square(),
                attributes: vec![
                    Value::Integer(1200),
                    Value::Integer(800),
                    Value::Text("São João del-Rei".into()),
                ],
            }],
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.shp");
        write_collection(&collection, &path).unwrap();

        let read = FeatureCollection::read_shapefile(&path).unwrap();
        assert_eq!(read.columns, vec!["população", "populaç_1", "município"]);
        assert_eq!(read.value(0, 0).as_f64(), Some(1200.0));
        assert_eq!(read.value(0, 1).as_f64(), Some(800.0));
        assert_eq!(read.value(0, 2).as_display(), "São João del-Rei");
    }

    #[test]
    fn non_polygon_geometry_is_rejected() {
        let collection = FeatureCollection::new(
            vec!["CD_MUN".into()],
            vec![Feature {
                geometry: Geometry::Unsupported(ShapeType::Point),
                attributes: vec![Value::Text("3106200".into())],
            }],
        );
        let dir = tempfile::tempdir().unwrap();
        let err = write_collection(&collection, &dir.path().join("out.geojson")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<JoinError>(),
            Some(JoinError::UnsupportedShape { index: 0, .. })
        ));
    }

    #[test]
    fn output_format_follows_extension() {
        assert_eq!(
            OutputFormat::from_path(Path::new("out.SHP")).unwrap(),
            OutputFormat::Shapefile
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("out.geojson")).unwrap(),
            OutputFormat::GeoJson
        );
        assert!(OutputFormat::from_path(Path::new("out.gpkg")).is_err());
    }

    #[test]
    fn truncate_bytes_respects_char_boundaries() {
        assert_eq!(truncate_bytes("São", 2), "S");
        assert_eq!(truncate_bytes("abc", 5), "abc");
    }

    #[test]
    fn geojson_keeps_full_names_and_holes() {
        let geometry = Geometry::Polygon(Polygon::with_rings(vec![
            PolygonRing::Outer(vec![
                Point::new(0.0, 0.0),
                Point::new(0.0, 4.0),
                Point::new(4.0, 4.0),
                Point::new(4.0, 0.0),
                Point::new(0.0, 0.0),
            ]),
            PolygonRing::Inner(vec![
                Point::new(1.0, 1.0),
                Point::new(2.0, 1.0),
                Point::new(2.0, 2.0),
                Point::new(1.0, 2.0),
                Point::new(1.0, 1.0),
            ]),
        ]));
        let collection = FeatureCollection::new(
            vec!["total_violencia_domestica_2022".into()],
            vec![Feature {
                geometry,
                attributes: vec![Value::Integer(12)],
            }],
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.geojson");
        write_collection(&collection, &path).unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let feature = &doc["features"][0];
        assert_eq!(feature["properties"]["total_violencia_domestica_2022"], 12);
        assert_eq!(feature["geometry"]["type"], "Polygon");
        assert_eq!(feature["geometry"]["coordinates"].as_array().unwrap().len(), 2);
    }
}
