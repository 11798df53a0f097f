mod cli;
mod commands;
mod deploy;
mod executor;
mod guard;
mod logging;
mod models;
mod runtime;

use clap::Parser;

pub fn run() -> i32 {
    let cli = cli::Cli::parse();
    match commands::execute(cli.command) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            if err.downcast_ref::<models::FatalError>().is_some() {
                1
            } else {
                2
            }
        }
    }
}
