use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "execctl")]
#[command(version, about = "Run a program with piped standard streams", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Run by path, inheriting the environment
    execctl /bin/echo hello

    # Resolve through PATH with a clean environment
    execctl --search --env HOME=/tmp env

    # Run in another directory
    execctl --cwd /tmp /bin/pwd

    # Load spawn options from a JSON file
    execctl --config job.json
")]
pub struct Cli {
    /// Program to run
    #[arg(value_name = "PROGRAM", required_unless_present = "config")]
    pub program: Option<String>,

    /// Program arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Resolve PROGRAM against PATH
    #[arg(short, long)]
    pub search: bool,

    /// Working directory for the program
    #[arg(short = 'C', long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Replace the environment; repeat for each variable
    #[arg(short, long = "env", value_name = "NAME=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// JSON file with spawn options (path, argv, env, search, cwd)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Show verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got {:?}", s)),
    }
}
