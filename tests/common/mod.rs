#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use muni_link::{
    data::Value,
    export,
    geometry::{Feature, FeatureCollection, Geometry},
};
use shapefile::{Point, Polygon, PolygonRing};
use tempfile::{TempDir, tempdir};

pub const WGS84_PRJ: &str = r#"GEOGCS["GCS_SIRGAS_2000",DATUM["D_SIRGAS_2000",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes a boundary shapefile whose attributes are all text, one unit
    /// square per row, laid out left to right.
    pub fn write_boundaries(&self, name: &str, columns: &[&str], rows: &[&[&str]]) -> PathBuf {
        let path = self.join(name);
        let features = rows
            .iter()
            .enumerate()
            .map(|(idx, row)| Feature {
                geometry: unit_square(idx as f64),
                attributes: row.iter().map(|v| Value::Text(v.to_string())).collect(),
            })
            .collect();
        let mut collection =
            FeatureCollection::new(columns.iter().map(|c| c.to_string()).collect(), features);
        collection.prj = Some(WGS84_PRJ.to_string());
        export::write_collection(&collection, &path).expect("write fixture shapefile");
        path
    }
}

pub fn unit_square(offset: f64) -> Geometry {
    Geometry::Polygon(Polygon::new(PolygonRing::Outer(vec![
        Point::new(offset, 0.0),
        Point::new(offset, 1.0),
        Point::new(offset + 1.0, 1.0),
        Point::new(offset + 1.0, 0.0),
        Point::new(offset, 0.0),
    ])))
}

pub fn read_geojson(path: &Path) -> serde_json::Value {
    let raw = fs::read_to_string(path).expect("read geojson output");
    serde_json::from_str(&raw).expect("parse geojson output")
}

/// Properties of every feature, in file order.
pub fn properties(document: &serde_json::Value) -> Vec<serde_json::Map<String, serde_json::Value>> {
    document["features"]
        .as_array()
        .expect("features array")
        .iter()
        .map(|f| f["properties"].as_object().expect("properties").clone())
        .collect()
}
