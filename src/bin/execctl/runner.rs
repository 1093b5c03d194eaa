use exec_spawn::{
    SpawnOptions, StreamChunk, StreamStdio, Value, WaitOptions, WaitOutcome, spawn_with,
};
use log::{debug, info};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

/// Command-line overrides on top of an optional JSON options file
pub struct RunConfig {
    pub program: Option<String>,
    pub args: Vec<String>,
    pub search: bool,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub config: Option<PathBuf>,
}

pub fn build_options(config: &RunConfig) -> Result<SpawnOptions, Box<dyn std::error::Error>> {
    let mut options = match &config.config {
        Some(path) => {
            debug!("Loading spawn options from {}", path.display());
            serde_json::from_str(&fs::read_to_string(path)?)?
        }
        None => SpawnOptions::default(),
    };

    if let Some(program) = &config.program {
        options.path = program.clone();
    }
    if options.path.is_empty() {
        return Err("No program specified".into());
    }

    if !config.args.is_empty() {
        let mut argv = vec![Value::from(options.path.as_str())];
        argv.extend(config.args.iter().map(Value::from));
        options.argv = Some(argv);
    }

    options.search |= config.search;
    if let Some(cwd) = &config.cwd {
        options.cwd = Some(cwd.clone());
    }
    if !config.env.is_empty() {
        let env = options.env.get_or_insert_with(Default::default);
        for (name, value) in &config.env {
            env.insert(name.clone(), Value::from(value));
        }
    }

    Ok(options)
}

/// Spawn the program, forward its output and return its exit code
pub fn run(config: RunConfig) -> Result<i32, Box<dyn std::error::Error>> {
    let options = build_options(&config)?;
    let mut child = spawn_with::<StreamStdio>(&options)?;
    debug!("Started {} as pid {:?}", options.path, child.pid());

    {
        let stdio = child.stdio_mut().ok_or("child streams unavailable")?;
        stdio.stdin.take();

        let mut stdout = io::stdout();
        let mut stderr = io::stderr();
        for chunk in stdio.stream.iter() {
            match chunk {
                StreamChunk::Stdout(data) => {
                    stdout.write_all(&data)?;
                    stdout.flush()?;
                }
                StreamChunk::Stderr(data) => stderr.write_all(&data)?,
                StreamChunk::Closed { stderr } => debug!("child closed stderr: {}", stderr),
            }
        }
    }

    match child.wait(WaitOptions::blocking())? {
        WaitOutcome::Exited(report) => {
            info!(
                "Process {} exited with code {} (signal: {:?})",
                report.pid, report.code, report.signal
            );
            Ok(report.code)
        }
        other => Err(format!("unexpected wait outcome: {:?}", other).into()),
    }
}
