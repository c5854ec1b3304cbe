//! Temporal reshaping of long-format records.
//!
//! The tabular source is naturally one row per municipality per year, while a
//! boundary feature must receive exactly one attribute row. Two reshapes
//! enforce that cardinality before the join:
//!
//! - [`pivot_wide`] spreads every metric across `metric_<year>` columns for the
//!   combined export.
//! - [`aggregate_year`] collapses an already year-filtered table to one row per
//!   code for the per-year exports.
//!
//! Grouping uses the raw code value; canonicalisation happens later, in the
//! reconciler.

use std::collections::{BTreeSet, HashMap, HashSet};

use itertools::Itertools;
use log::{debug, info, warn};

use crate::{
    config::{Config, Reducer},
    data::Value,
    detect::{ColumnRole, resolve_column},
    tabular::Table,
};

#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    pub table: Table,
    /// Distinct years of the input, ascending; empty without a year column.
    pub years: Vec<i64>,
    /// False when the input was passed through unchanged.
    pub pivoted: bool,
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    sum: f64,
    count: usize,
    integral: bool,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            sum: 0.0,
            count: 0,
            integral: true,
        }
    }
}

impl Accumulator {
    fn add(&mut self, value: &Value) {
        if let Some(number) = value.as_f64() {
            self.sum += number;
            self.count += 1;
            if !matches!(value, Value::Integer(_)) {
                self.integral = false;
            }
        }
    }

    /// A sum over no values is 0; a mean over no values is missing.
    fn finish(&self, reducer: Reducer) -> Value {
        match reducer {
            Reducer::Sum if self.integral => Value::Integer(self.sum as i64),
            Reducer::Sum => Value::Float(self.sum),
            Reducer::Mean if self.count == 0 => Value::Null,
            Reducer::Mean => Value::Float(self.sum / self.count as f64),
        }
    }
}

/// Distinct year labels present in `column`, ascending.
pub fn distinct_years(table: &Table, column: &str) -> Vec<i64> {
    let Some(idx) = table.column_index(column) else {
        return Vec::new();
    };
    table
        .rows
        .iter()
        .filter_map(|row| row.get(idx).and_then(Value::as_year))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Rows whose year column equals `year`.
pub fn rows_for_year(table: &Table, column: &str, year: i64) -> Table {
    match table.column_index(column) {
        Some(idx) => table.filter_rows(|row| row.get(idx).and_then(Value::as_year) == Some(year)),
        None => table.filter_rows(|_| false),
    }
}

pub fn tabular_code_column<'a>(table: &'a Table, config: &Config) -> Option<&'a str> {
    resolve_column(
        &table.columns,
        &config.code_column,
        ColumnRole::Code,
        &[config.year_column.as_str()],
    )
}

pub fn tabular_name_column<'a>(
    table: &'a Table,
    config: &Config,
    code_column: Option<&str>,
) -> Option<&'a str> {
    let mut exclude = vec![config.year_column.as_str()];
    exclude.extend(code_column);
    resolve_column(&table.columns, &config.name_column, ColumnRole::Name, &exclude)
}

/// One row per municipality, one `metric_<year>` column per metric and year.
///
/// Without a year column or a code column, or when no configured metric is
/// present, the table is returned unchanged and `pivoted` is false.
pub fn pivot_wide(table: &Table, config: &Config) -> WideTable {
    let years = distinct_years(table, &config.year_column);
    let unchanged = |years: Vec<i64>| WideTable {
        table: table.clone(),
        years,
        pivoted: false,
    };

    let year_idx = table.column_index(&config.year_column);
    let code_column = tabular_code_column(table, config);
    let (Some(year_idx), Some(code_column)) = (year_idx, code_column) else {
        warn!("Tabular data has no year or code column; keeping the original layout for the combined join");
        return unchanged(years);
    };
    let Some(code_idx) = table.column_index(code_column) else {
        return unchanged(years);
    };

    let metrics = config
        .metrics
        .iter()
        .filter_map(|m| table.column_index(&m.name).map(|idx| (m, idx)))
        .collect::<Vec<_>>();
    if metrics.is_empty() {
        warn!("Tabular data has none of the configured metrics; keeping the original layout for the combined join");
        return unchanged(years);
    }
    let name_idx = tabular_name_column(table, config, Some(code_column))
        .and_then(|name| table.column_index(name));

    let mut order: Vec<String> = Vec::new();
    let mut identity: HashMap<String, (Value, Value)> = HashMap::new();
    let mut groups: HashMap<(String, i64), Vec<Accumulator>> = HashMap::new();
    for row in &table.rows {
        let code = &row[code_idx];
        let Some(year) = row[year_idx].as_year() else {
            continue;
        };
        if code.is_null() {
            continue;
        }
        let key = code.as_display();
        let entry = identity.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            (code.clone(), Value::Null)
        });
        if let Some(idx) = name_idx
            && entry.1.is_null()
        {
            entry.1 = row[idx].clone();
        }
        let accumulators = groups
            .entry((key, year))
            .or_insert_with(|| vec![Accumulator::default(); metrics.len()]);
        for (acc, (_, idx)) in accumulators.iter_mut().zip(&metrics) {
            acc.add(&row[*idx]);
        }
    }

    let group_years = groups.keys().map(|(_, year)| *year).unique().sorted().collect::<Vec<_>>();
    let mut columns = vec![code_column.to_string()];
    if let Some(idx) = name_idx {
        columns.push(table.columns[idx].clone());
    }
    for (metric, _) in &metrics {
        for year in &group_years {
            columns.push(format!("{}_{}", metric.name, year));
        }
    }

    let rows = order
        .iter()
        .map(|key| {
            let (code, name) = &identity[key];
            let mut row = vec![code.clone()];
            if name_idx.is_some() {
                row.push(name.clone());
            }
            for (metric_pos, (metric, _)) in metrics.iter().enumerate() {
                for year in &group_years {
                    let cell = groups
                        .get(&(key.clone(), *year))
                        .map(|accs| accs[metric_pos].finish(metric.reducer))
                        .unwrap_or(Value::Null);
                    row.push(cell);
                }
            }
            row
        })
        .collect::<Vec<_>>();

    info!(
        "Pivot created with {} year(s). Generated columns: {:?}",
        years.len(),
        &columns[1 + usize::from(name_idx.is_some())..]
    );
    WideTable {
        table: Table::from_rows(columns, rows),
        years,
        pivoted: true,
    }
}

/// Collapses a single-year table to one row per code.
///
/// The name column passes through as its first non-missing value, numeric
/// columns reduce with their configured reducer (sum when unlisted) and every
/// other column is dropped. Without a code column the table is deduplicated on
/// the best key available, first row winning.
pub fn aggregate_year(table: &Table, config: &Config) -> Table {
    let code_column = tabular_code_column(table, config);
    let name_column = tabular_name_column(table, config, code_column);
    let Some(code_idx) = code_column.and_then(|c| table.column_index(c)) else {
        let key_idx = name_column.and_then(|n| table.column_index(n));
        debug!("No code column for yearly aggregation; deduplicating on {name_column:?}");
        return dedupe_by(table, |row| match key_idx {
            Some(idx) => row[idx].as_display(),
            None => row.iter().map(Value::as_display).join("\u{1f}"),
        });
    };

    enum Fold {
        First,
        Reduce(Reducer),
    }
    let year_idx = table.column_index(&config.year_column);
    let folds = table
        .columns
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != code_idx && Some(*idx) != year_idx)
        .filter_map(|(idx, name)| {
            if Some(name.as_str()) == name_column {
                Some((idx, Fold::First))
            } else if table.is_numeric_column(idx) {
                Some((idx, Fold::Reduce(config.reducer_for(name))))
            } else {
                None
            }
        })
        .collect::<Vec<_>>();
    if folds.is_empty() {
        return dedupe_by(table, |row| row[code_idx].as_display());
    }

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Value, Vec<Value>, Vec<Accumulator>)> = HashMap::new();
    for row in &table.rows {
        let code = &row[code_idx];
        if code.is_null() {
            continue;
        }
        let key = code.as_display();
        let group = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            (
                code.clone(),
                vec![Value::Null; folds.len()],
                vec![Accumulator::default(); folds.len()],
            )
        });
        for (pos, (idx, fold)) in folds.iter().enumerate() {
            match fold {
                Fold::First if group.1[pos].is_null() => group.1[pos] = row[*idx].clone(),
                Fold::First => {}
                Fold::Reduce(_) => group.2[pos].add(&row[*idx]),
            }
        }
    }

    let mut columns = vec![table.columns[code_idx].clone()];
    columns.extend(folds.iter().map(|(idx, _)| table.columns[*idx].clone()));
    let rows = order
        .iter()
        .map(|key| {
            let (code, firsts, accs) = &groups[key];
            let mut row = vec![code.clone()];
            for (pos, (_, fold)) in folds.iter().enumerate() {
                row.push(match fold {
                    Fold::First => firsts[pos].clone(),
                    Fold::Reduce(reducer) => accs[pos].finish(*reducer),
                });
            }
            row
        })
        .collect();
    Table::from_rows(columns, rows)
}

fn dedupe_by<F>(table: &Table, key: F) -> Table
where
    F: Fn(&[Value]) -> String,
{
    let mut seen = HashSet::new();
    table.filter_rows(|row| seen.insert(key(row)))
}
