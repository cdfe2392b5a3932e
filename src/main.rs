//! Entry point of the `rqs` command-line tool.

use clap::Parser;
use colored::Colorize;

use requery_sim::cli_app::{Cli, run};

fn main() {
    let cli = Cli::parse();
    requery_sim::logger::init_subscriber();
    if let Err(err) = run(&cli) {
        eprintln!("{} {err}", "error:".red().bold());
        std::process::exit(1);
    }
}
