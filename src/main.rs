mod cli;
mod config;
mod depend;
mod emit;
mod plan;
mod render;
mod submit;
mod utils;

use clap::Parser;
use cli::Cli;

fn main() {
    let cli = Cli::parse();

    match cli::handle_run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(1);
        }
    }
}
