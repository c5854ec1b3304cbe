pub mod cli;
pub mod config;
pub mod data;
pub mod detect;
pub mod error;
pub mod export;
pub mod geometry;
pub mod inspect;
pub mod io_utils;
pub mod normalize;
pub mod pipeline;
pub mod reconcile;
pub mod reshape;
pub mod table;
pub mod tabular;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::cli::{Cli, Commands};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("muni_link", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Join(args) => pipeline::execute(&args),
        Commands::Inspect(args) => inspect::execute(&args),
    }
}
