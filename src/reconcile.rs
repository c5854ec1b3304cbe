//! Attaching tabular records to boundary features.
//!
//! The join key is chosen by a small state machine: a code join is attempted
//! first, a name join second, and the run fails when neither side offers a
//! usable pair of columns. Whatever the strategy, the boundary collection is
//! the driving side of a left join: every feature appears exactly once in the
//! output, matched or not.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use log::{debug, info, warn};

use crate::{
    config::Config,
    data::Value,
    detect::{ColumnRole, detect_column, detect_column_excluding},
    error::JoinError,
    geometry::{Feature, FeatureCollection},
    normalize::{CodeSide, canonical_code_value, canonical_name_value},
    reshape::{tabular_code_column, tabular_name_column},
    tabular::Table,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinStrategy {
    /// Six-digit canonical IBGE codes on both sides.
    Code {
        feature_column: String,
        table_column: String,
    },
    /// Canonical name tokens on both sides.
    Name {
        feature_column: String,
        table_column: String,
    },
}

impl JoinStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            JoinStrategy::Code { .. } => "code",
            JoinStrategy::Name { .. } => "name",
        }
    }

    fn columns(&self) -> (&str, &str) {
        match self {
            JoinStrategy::Code {
                feature_column,
                table_column,
            }
            | JoinStrategy::Name {
                feature_column,
                table_column,
            } => (feature_column, table_column),
        }
    }

    fn feature_key(&self, value: &Value) -> Option<String> {
        match self {
            JoinStrategy::Code { .. } => canonical_code_value(value, CodeSide::Geometry),
            JoinStrategy::Name { .. } => canonical_name_value(value),
        }
    }

    fn table_key(&self, value: &Value) -> Option<String> {
        match self {
            JoinStrategy::Code { .. } => canonical_code_value(value, CodeSide::Tabular),
            JoinStrategy::Name { .. } => canonical_name_value(value),
        }
    }
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinStrategy::Code {
                feature_column,
                table_column,
            } => write!(
                f,
                "code (first 6 digits) boundary[{feature_column}] <-> table[{table_column}]"
            ),
            JoinStrategy::Name {
                feature_column,
                table_column,
            } => write!(f, "name boundary[{feature_column}] <-> table[{table_column}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinState {
    CodeJoinAttempted,
    NameJoinAttempted,
    Reconciled(JoinStrategy),
    Failed,
}

impl JoinState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JoinState::Reconciled(_) | JoinState::Failed)
    }

    /// Advances one step of the fallback order code -> name -> failure.
    pub fn next(self, features: &FeatureCollection, table: &Table, config: &Config) -> JoinState {
        match self {
            JoinState::CodeJoinAttempted => {
                let feature_code = detect_column(&features.columns, ColumnRole::Code);
                let table_code = tabular_code_column(table, config);
                debug!("Code columns: boundary {feature_code:?}, table {table_code:?}");
                match (feature_code, table_code) {
                    (Some(feature_column), Some(table_column)) => {
                        JoinState::Reconciled(JoinStrategy::Code {
                            feature_column: feature_column.to_string(),
                            table_column: table_column.to_string(),
                        })
                    }
                    _ => JoinState::NameJoinAttempted,
                }
            }
            JoinState::NameJoinAttempted => {
                let feature_code = detect_column(&features.columns, ColumnRole::Code);
                let feature_name = detect_column_excluding(
                    &features.columns,
                    ColumnRole::Name,
                    &feature_code.into_iter().collect::<Vec<_>>(),
                );
                let table_name = tabular_name_column(table, config, tabular_code_column(table, config));
                debug!("Name columns: boundary {feature_name:?}, table {table_name:?}");
                match (feature_name, table_name) {
                    (Some(feature_column), Some(table_column)) => {
                        JoinState::Reconciled(JoinStrategy::Name {
                            feature_column: feature_column.to_string(),
                            table_column: table_column.to_string(),
                        })
                    }
                    _ => JoinState::Failed,
                }
            }
            terminal => terminal,
        }
    }
}

/// Chooses the join strategy, or fails when no key pair exists.
pub fn plan_join(
    features: &FeatureCollection,
    table: &Table,
    config: &Config,
) -> Result<JoinStrategy, JoinError> {
    let mut state = JoinState::CodeJoinAttempted;
    while !state.is_terminal() {
        state = state.next(features, table, config);
    }
    match state {
        JoinState::Reconciled(strategy) => Ok(strategy),
        _ => Err(JoinError::NoJoinKey),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub strategy: JoinStrategy,
    pub total_features: usize,
    pub unique_feature_keys: usize,
    pub unique_table_keys: usize,
    /// Features whose key found a table row.
    pub key_matches: usize,
    /// Features that received a non-missing metric value.
    pub with_data: usize,
    /// Table rows ignored because an earlier row had the same key.
    pub shadowed_rows: usize,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub features: FeatureCollection,
    pub report: ReconcileReport,
}

impl Reconciled {
    pub fn match_count(&self) -> usize {
        self.report.with_data
    }
}

pub fn reconcile(
    features: &FeatureCollection,
    table: &Table,
    config: &Config,
) -> Result<Reconciled, JoinError> {
    let strategy = plan_join(features, table, config)?;
    info!("Joining by {strategy}");
    let (feature_column, table_column) = strategy.columns();
    let feature_idx = features
        .column_index(feature_column)
        .ok_or(JoinError::NoJoinKey)?;
    let table_idx = table.column_index(table_column).ok_or(JoinError::NoJoinKey)?;

    let mut lookup: HashMap<String, usize> = HashMap::new();
    let mut shadowed_rows = 0usize;
    for (row_idx, row) in table.rows.iter().enumerate() {
        let Some(key) = row.get(table_idx).and_then(|v| strategy.table_key(v)) else {
            continue;
        };
        if lookup.contains_key(&key) {
            shadowed_rows += 1;
        } else {
            lookup.insert(key, row_idx);
        }
    }
    if shadowed_rows > 0 {
        warn!(
            "{shadowed_rows} table row(s) share a key with an earlier row; the first one is joined"
        );
    }

    let feature_keys = features
        .features
        .iter()
        .map(|f| f.attributes.get(feature_idx).and_then(|v| strategy.feature_key(v)))
        .collect::<Vec<_>>();
    let unique_feature_keys = feature_keys.iter().flatten().collect::<HashSet<_>>().len();
    info!(
        "Unique keys (boundary / table): {} / {}",
        unique_feature_keys,
        lookup.len()
    );

    let (columns, table_columns) = build_output_headers(&features.columns, &table.columns);
    let metric_columns = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, name)| config.is_metric_column(name))
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();

    let mut key_matches = 0usize;
    let mut with_data = 0usize;
    let joined = features
        .features
        .iter()
        .zip(&feature_keys)
        .map(|(feature, key)| {
            let matched = key.as_ref().and_then(|k| lookup.get(k)).copied();
            let mut attributes = feature.attributes.clone();
            attributes.resize(features.columns.len(), Value::Null);
            match matched {
                Some(row_idx) => {
                    key_matches += 1;
                    let has_data = metric_columns.is_empty()
                        || metric_columns
                            .iter()
                            .any(|idx| !table.value(row_idx, *idx).is_null());
                    if has_data {
                        with_data += 1;
                    }
                    attributes.extend(table_columns.iter().map(|idx| table.value(row_idx, *idx).clone()));
                }
                None => attributes.extend(table_columns.iter().map(|_| Value::Null)),
            }
            Feature {
                geometry: feature.geometry.clone(),
                attributes,
            }
        })
        .collect::<Vec<_>>();

    info!("Matches by {}: {key_matches}", strategy.label());
    info!(
        "Boundary features: {} | with tabular data: {with_data}",
        joined.len()
    );

    let report = ReconcileReport {
        strategy,
        total_features: joined.len(),
        unique_feature_keys,
        unique_table_keys: lookup.len(),
        key_matches,
        with_data,
        shadowed_rows,
    };
    Ok(Reconciled {
        features: FeatureCollection {
            columns,
            features: joined,
            prj: features.prj.clone(),
        },
        report,
    })
}

/// Feature columns first, then table columns; a table column whose name is
/// already taken is renamed `csv_<name>`.
fn build_output_headers(feature_columns: &[String], table_columns: &[String]) -> (Vec<String>, Vec<usize>) {
    let mut headers = feature_columns.to_vec();
    let mut seen: HashSet<String> = headers.iter().cloned().collect();
    let mut picked = Vec::with_capacity(table_columns.len());

    for (idx, name) in table_columns.iter().enumerate() {
        let mut candidate = name.clone();
        if seen.contains(&candidate) {
            candidate = format!("csv_{name}");
            let mut counter = 1usize;
            while seen.contains(&candidate) {
                candidate = format!("csv_{name}_{counter}");
                counter += 1;
            }
        }
        seen.insert(candidate.clone());
        headers.push(candidate);
        picked.push(idx);
    }

    (headers, picked)
}
