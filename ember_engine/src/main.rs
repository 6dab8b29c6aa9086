use anyhow::Result;
use clap::Parser;

use ember_engine::cli::Args;
use ember_engine::runtime;

fn main() -> Result<()> {
    let args = Args::parse();
    runtime::execute(args)
}
