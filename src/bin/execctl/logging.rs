use console::style;
use env_logger::{Builder, Env, Target};
use log::Level;
use std::io::Write;

/// Default filter when RUST_LOG is unset
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "warn,exec_spawn=debug,execctl=debug"
    } else {
        "warn"
    }
}

fn level_label(level: Level) -> String {
    let label = match level {
        Level::Error => style("ERROR").red().bold(),
        Level::Warn => style("WARN ").yellow().bold(),
        Level::Info => style("INFO ").green(),
        Level::Debug => style("DEBUG").cyan(),
        Level::Trace => style("TRACE").dim(),
    };
    label.to_string()
}

/// Initialize logger on stderr; the child's stdout stays clean on our stdout
pub fn init_logger(verbose: bool) {
    let env = Env::default().filter_or("RUST_LOG", default_filter(verbose));

    Builder::from_env(env)
        .target(Target::Stderr)
        .format(|buf, record| {
            // exec_spawn::execution::spawn -> spawn
            let source = record
                .module_path()
                .and_then(|path| path.rsplit("::").next())
                .unwrap_or("execctl");
            writeln!(
                buf,
                "{} [{}] {}",
                level_label(record.level()),
                source,
                record.args()
            )
        })
        .init();
}
