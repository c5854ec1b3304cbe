use std::collections::HashSet;

use anyhow::Result;
use itertools::Itertools;

use crate::{
    cli::JoinArgs,
    config::Config,
    data::Value,
    detect::{ColumnRole, detect_column, detect_column_excluding},
    geometry::FeatureCollection,
    normalize::{CodeSide, canonical_code_value, canonical_name_value},
    pipeline::{Inputs, load_inputs},
    reconcile::plan_join,
    reshape::{distinct_years, tabular_code_column, tabular_name_column},
    table,
    tabular::Table,
};

pub fn execute(args: &JoinArgs) -> Result<()> {
    let config = Config::from_args(args)?;
    let inputs = load_inputs(&config)?;
    let (headers, rows) = summarize(&config, &inputs);
    table::print_table(&headers, &rows);
    Ok(())
}

/// One row per diagnostic, one column per dataset.
pub fn summarize(config: &Config, inputs: &Inputs) -> (Vec<String>, Vec<Vec<String>>) {
    let boundaries = &inputs.boundaries;
    let data = &inputs.table;

    let feature_code = detect_column(&boundaries.columns, ColumnRole::Code);
    let feature_name = detect_column_excluding(
        &boundaries.columns,
        ColumnRole::Name,
        &feature_code.into_iter().collect::<Vec<_>>(),
    );
    let table_code = tabular_code_column(data, config);
    let table_name = tabular_name_column(data, config, table_code);

    let feature_codes = feature_keys(boundaries, feature_code, |v| {
        canonical_code_value(v, CodeSide::Geometry)
    });
    let table_codes = table_keys(data, table_code, |v| canonical_code_value(v, CodeSide::Tabular));
    let feature_names = feature_keys(boundaries, feature_name, canonical_name_value);
    let table_names = table_keys(data, table_name, canonical_name_value);

    let years = distinct_years(data, &config.year_column);
    let strategy = plan_join(boundaries, data, config)
        .map(|s| s.label().to_string())
        .unwrap_or_else(|_| "none".to_string());

    let column = |c: Option<&str>| c.unwrap_or("-").to_string();
    let headers = vec!["".to_string(), "boundary".to_string(), "table".to_string()];
    let rows = vec![
        vec![
            "records".to_string(),
            boundaries.len().to_string(),
            data.len().to_string(),
        ],
        vec!["code column".to_string(), column(feature_code), column(table_code)],
        vec!["name column".to_string(), column(feature_name), column(table_name)],
        vec![
            "unique codes".to_string(),
            feature_codes.len().to_string(),
            table_codes.len().to_string(),
        ],
        vec![
            "unique names".to_string(),
            feature_names.len().to_string(),
            table_names.len().to_string(),
        ],
        vec![
            "shared codes".to_string(),
            feature_codes.intersection(&table_codes).count().to_string(),
            String::new(),
        ],
        vec![
            "shared names".to_string(),
            feature_names.intersection(&table_names).count().to_string(),
            String::new(),
        ],
        vec![
            "years".to_string(),
            "-".to_string(),
            if years.is_empty() {
                "-".to_string()
            } else {
                years.iter().join(", ")
            },
        ],
        vec!["join by".to_string(), strategy, String::new()],
    ];
    (headers, rows)
}

fn feature_keys<F>(boundaries: &FeatureCollection, column: Option<&str>, key: F) -> HashSet<String>
where
    F: Fn(&Value) -> Option<String>,
{
    let Some(idx) = column.and_then(|c| boundaries.column_index(c)) else {
        return HashSet::new();
    };
    (0..boundaries.len())
        .filter_map(|row| key(boundaries.value(row, idx)))
        .collect()
}

fn table_keys<F>(data: &Table, column: Option<&str>, key: F) -> HashSet<String>
where
    F: Fn(&Value) -> Option<String>,
{
    let Some(idx) = column.and_then(|c| data.column_index(c)) else {
        return HashSet::new();
    };
    (0..data.len())
        .filter_map(|row| key(data.value(row, idx)))
        .collect()
}
