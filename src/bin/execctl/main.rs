//! execctl - run a program with piped standard streams

mod cli;
mod logging;
mod runner;

use clap::Parser;
use cli::Cli;
use console::style;
use runner::{RunConfig, run};

fn main() {
    let cli = Cli::parse();

    logging::init_logger(cli.verbose);

    let config = RunConfig {
        program: cli.program,
        args: cli.args,
        search: cli.search,
        cwd: cli.cwd,
        env: cli.env,
        config: cli.config,
    };

    match run(config) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            std::process::exit(1);
        }
    }
}
