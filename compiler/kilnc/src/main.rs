//! The `kiln` binary.

use std::process;

use clap::Parser;
use kilnc::{run, Cli};

fn main() {
    let cli = Cli::parse();
    kiln_engine::init_tracing(cli.log_directive());

    if let Err(error) = run(&cli) {
        eprintln!("error: {error}");
        process::exit(1);
    }
}
