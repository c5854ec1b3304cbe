//! Run configuration.
//!
//! A [`Config`] is built once at start-up from built-in defaults, an optional
//! YAML document and command-line overrides, then handed by reference to every
//! component. Nothing in the crate reads configuration from globals.

use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Deserializer};

use crate::{cli::JoinArgs, io_utils};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    Mean,
    Sum,
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reducer::Mean => write!(f, "mean"),
            Reducer::Sum => write!(f, "sum"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    pub reducer: Reducer,
}

impl MetricSpec {
    pub fn new(name: impl Into<String>, reducer: Reducer) -> Self {
        Self {
            name: name.into(),
            reducer,
        }
    }

    /// Parses `name` or `name:mean` / `name:sum`; a bare name reduces with sum.
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, reducer) = match spec.split_once(':') {
            Some((name, reducer)) => {
                let reducer = match reducer.trim().to_ascii_lowercase().as_str() {
                    "mean" | "avg" => Reducer::Mean,
                    "sum" => Reducer::Sum,
                    other => return Err(anyhow!("Unknown reducer '{other}' in metric '{spec}'")),
                };
                (name.trim(), reducer)
            }
            None => (spec.trim(), Reducer::Sum),
        };
        if name.is_empty() {
            return Err(anyhow!("Metric name cannot be empty"));
        }
        Ok(Self::new(name, reducer))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Consolidated yearly statistics.
    pub csv_path: PathBuf,
    /// Boundaries already restricted to the target state.
    pub geometry_path: PathBuf,
    /// Nationwide boundaries, filtered by `region_column` when `geometry_path` is absent.
    pub national_geometry_path: PathBuf,
    pub output_path: PathBuf,
    pub region_code: String,
    pub region_column: String,
    #[serde(deserialize_with = "deserialize_delimiter")]
    pub delimiter: u8,
    pub encoding: String,
    pub year_column: String,
    /// Exact column names tried before falling back to detection.
    pub code_column: String,
    pub name_column: String,
    pub metrics: Vec<MetricSpec>,
    pub export_by_year: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("dados_consolidados_violencia_feminicidio.csv"),
            geometry_path: PathBuf::from("shapefile/municipios_MG.shp"),
            national_geometry_path: PathBuf::from("shapefile/municipios.shp"),
            output_path: PathBuf::from("municipios_MG_data.shp"),
            region_code: "MG".to_string(),
            region_column: "SIGLA".to_string(),
            delimiter: b';',
            encoding: "utf-8".to_string(),
            year_column: "ano".to_string(),
            code_column: "municipio_cod".to_string(),
            name_column: "municipio_nome".to_string(),
            metrics: vec![
                MetricSpec::new("total_violencia_domestica", Reducer::Sum),
                MetricSpec::new("feminicidios", Reducer::Sum),
                MetricSpec::new("taxa_feminicidio", Reducer::Mean),
            ],
            export_by_year: true,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            fs::read_to_string(path).with_context(|| format!("Opening config file {path:?}"))?;
        serde_yaml::from_str(&raw).with_context(|| format!("Parsing config file {path:?}"))
    }

    /// Defaults, then the YAML file named by `--config`, then individual flags.
    pub fn from_args(args: &JoinArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(args)?;
        Ok(config)
    }

    fn apply_overrides(&mut self, args: &JoinArgs) -> Result<()> {
        if let Some(path) = &args.csv {
            self.csv_path = path.clone();
        }
        if let Some(path) = &args.geometry {
            self.geometry_path = path.clone();
        }
        if let Some(path) = &args.national_geometry {
            self.national_geometry_path = path.clone();
        }
        if let Some(path) = &args.output {
            self.output_path = path.clone();
        }
        if let Some(region) = &args.region {
            self.region_code = region.clone();
        }
        if let Some(delimiter) = args.delimiter {
            self.delimiter = delimiter;
        }
        if let Some(encoding) = &args.input_encoding {
            self.encoding = encoding.clone();
        }
        if let Some(year) = &args.year_column {
            self.year_column = year.clone();
        }
        if !args.metrics.is_empty() {
            self.metrics = args
                .metrics
                .iter()
                .flat_map(|s| s.split(','))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(MetricSpec::parse)
                .collect::<Result<Vec<_>>>()?;
        }
        if args.no_per_year {
            self.export_by_year = false;
        }
        Ok(())
    }

    pub fn reducer_for(&self, column: &str) -> Reducer {
        self.metrics
            .iter()
            .find(|m| m.name == column)
            .map(|m| m.reducer)
            .unwrap_or(Reducer::Sum)
    }

    /// Whether `column` carries a configured metric, either bare or as `metric_<year>`.
    pub fn is_metric_column(&self, column: &str) -> bool {
        self.metrics.iter().any(|m| {
            column == m.name
                || column
                    .strip_prefix(m.name.as_str())
                    .and_then(|rest| rest.strip_prefix('_'))
                    .is_some_and(|year| !year.is_empty() && year.bytes().all(|b| b.is_ascii_digit()))
        })
    }
}

fn deserialize_delimiter<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    io_utils::parse_delimiter(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_spec_parses_reducers() {
        assert_eq!(
            MetricSpec::parse("taxa_feminicidio:mean").unwrap(),
            MetricSpec::new("taxa_feminicidio", Reducer::Mean)
        );
        assert_eq!(
            MetricSpec::parse(" feminicidios ").unwrap(),
            MetricSpec::new("feminicidios", Reducer::Sum)
        );
        assert!(MetricSpec::parse("x:median").is_err());
        assert!(MetricSpec::parse(":sum").is_err());
    }

    #[test]
    fn yaml_overrides_only_named_fields() {
        let yaml = r#"
region_code: sp
delimiter: tab
metrics:
  - name: homicidios
    reducer: sum
  - name: taxa_homicidio
    reducer: mean
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.region_code, "sp");
        assert_eq!(config.delimiter, b'\t');
        assert_eq!(config.year_column, "ano");
        assert_eq!(config.reducer_for("taxa_homicidio"), Reducer::Mean);
        assert_eq!(config.reducer_for("populacao"), Reducer::Sum);
    }

    #[test]
    fn default_reducer_table_matches_metric_kinds() {
        let config = Config::default();
        assert_eq!(config.reducer_for("taxa_feminicidio"), Reducer::Mean);
        assert_eq!(config.reducer_for("feminicidios"), Reducer::Sum);
        assert_eq!(config.reducer_for("total_violencia_domestica"), Reducer::Sum);
        assert!(config.is_metric_column("feminicidios_2023"));
        assert!(config.is_metric_column("taxa_feminicidio"));
        assert!(!config.is_metric_column("feminicidios_total"));
        assert!(!config.is_metric_column("municipio_cod"));
    }
}
