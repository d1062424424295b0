mod annotation;
mod cli;
mod config;
mod contig;
mod controller;
mod expression;
mod filter;
mod gtab;
mod output;
mod process;
mod project;
mod signal;

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;

use anyhow::Context;

fn main() -> anyhow::Result<()> {
    let cfg = cli::handle_cli().with_context(|| "Error processing command line arguments")?;
    process::process_input(&cfg)
}
