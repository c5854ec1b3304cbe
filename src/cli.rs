use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::io_utils::parse_delimiter;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Attach municipal statistics to municipality boundary files",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Join the statistics table onto the boundaries and write combined and per-year layers
    Join(JoinArgs),
    /// Report detected key columns, counts and key overlap without writing anything
    Inspect(JoinArgs),
}

#[derive(Debug, Args, Default)]
pub struct JoinArgs {
    /// YAML configuration file; individual flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Consolidated statistics CSV
    #[arg(long)]
    pub csv: Option<PathBuf>,
    /// Boundary shapefile already restricted to the state
    #[arg(long)]
    pub geometry: Option<PathBuf>,
    /// Nationwide boundary shapefile, used when --geometry does not exist
    #[arg(long = "national-geometry")]
    pub national_geometry: Option<PathBuf>,
    /// Combined output layer (.shp, .geojson or .json)
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
    /// State code used to filter the nationwide file
    #[arg(long)]
    pub region: Option<String>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the CSV (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Column holding the reference year
    #[arg(long = "year-column")]
    pub year_column: Option<String>,
    /// Metric and reducer such as `feminicidios:sum` or `taxa:mean`; repeatable
    #[arg(long = "metric", action = clap::ArgAction::Append)]
    pub metrics: Vec<String>,
    /// Skip the per-year output layers
    #[arg(long = "no-per-year")]
    pub no_per_year: bool,
}
