//! The batch run: one combined export plus one export per year.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::{
    cli::JoinArgs,
    config::Config,
    detect::{ColumnRole, detect_column},
    error::JoinError,
    export::{self, OutputFormat},
    geometry::{FeatureCollection, load_boundaries},
    io_utils,
    reconcile::{Reconciled, reconcile},
    reshape::{aggregate_year, pivot_wide, rows_for_year, tabular_code_column},
    tabular::{Table, load_csv},
};

/// Both inputs, loaded and filtered exactly as a run sees them.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub boundaries: FeatureCollection,
    pub table: Table,
}

pub fn load_inputs(config: &Config) -> Result<Inputs> {
    if !config.csv_path.exists() {
        return Err(JoinError::MissingTable(config.csv_path.clone()).into());
    }
    let boundaries = load_boundaries(config)?;

    info!(
        "Reading '{}' with delimiter '{}'",
        config.csv_path.display(),
        io_utils::printable_delimiter(config.delimiter)
    );
    let encoding = io_utils::resolve_encoding(Some(config.encoding.as_str()))?;
    let table = load_csv(&config.csv_path, config.delimiter, encoding)
        .with_context(|| format!("Loading {:?}", config.csv_path))?;
    info!(
        "Read {} record(s) across {} column(s)",
        table.len(),
        table.columns.len()
    );
    Ok(Inputs { boundaries, table })
}

pub fn execute(args: &JoinArgs) -> Result<()> {
    let config = Config::from_args(args)?;
    let inputs = load_inputs(&config)?;
    let written = run(&config, &inputs)?;
    info!("Finished: {} file(s) written", written.len());
    Ok(())
}

/// Writes the combined layer and, when possible, one layer per year.
/// Returns the paths written, in order.
pub fn run(config: &Config, inputs: &Inputs) -> Result<Vec<PathBuf>> {
    let format = OutputFormat::from_path(&config.output_path)?;
    let mut written = Vec::new();

    let wide = pivot_wide(&inputs.table, config);
    let combined = reconcile(&inputs.boundaries, &wide.table, config)?;
    write_layer(&combined, &config.output_path)?;
    written.push(config.output_path.clone());
    if format == OutputFormat::Shapefile {
        info!("Shapefile attribute names are limited to 10 characters; use a .geojson output to keep full names");
    }

    if !config.export_by_year {
        return Ok(written);
    }
    if wide.years.is_empty() {
        info!("No '{}' column with years; skipping per-year exports", config.year_column);
        return Ok(written);
    }
    let feature_code = detect_column(&inputs.boundaries.columns, ColumnRole::Code);
    let table_code = tabular_code_column(&inputs.table, config);
    if feature_code.is_none() || table_code.is_none() {
        warn!("Per-year exports need a code column on both sides; skipping");
        return Ok(written);
    }

    for year in &wide.years {
        let rows = rows_for_year(&inputs.table, &config.year_column, *year);
        if rows.is_empty() {
            info!("Year {year}: no records, skipping");
            continue;
        }
        let aggregated = aggregate_year(&rows, config);
        let joined = reconcile(&inputs.boundaries, &aggregated, config)?;
        let path = year_output_path(&config.output_path, *year);
        write_layer(&joined, &path)?;
        info!(
            "Year {year}: {} of {} feature(s) with data",
            joined.match_count(),
            joined.report.total_features
        );
        written.push(path);
    }

    Ok(written)
}

fn write_layer(joined: &Reconciled, path: &Path) -> Result<()> {
    export::write_collection(&joined.features, path)
        .with_context(|| format!("Writing {}", path.display()))
}

/// `out/municipios.shp` + 2022 -> `out/municipios_2022.shp`.
pub fn year_output_path(path: &Path, year: i64) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{year}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{year}"),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_is_appended_to_the_stem() {
        assert_eq!(
            year_output_path(Path::new("out/municipios_MG_data.shp"), 2022),
            PathBuf::from("out/municipios_MG_data_2022.shp")
        );
        assert_eq!(
            year_output_path(Path::new("layer.geojson"), 2019),
            PathBuf::from("layer_2019.geojson")
        );
    }

    #[test]
    fn missing_table_is_fatal_before_geometry_is_read() {
        let config = Config {
            csv_path: "/nonexistent/dados.csv".into(),
            ..Config::default()
        };
        let err = load_inputs(&config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<JoinError>(),
            Some(JoinError::MissingTable(_))
        ));
    }
}
