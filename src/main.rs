use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use runlog::{table, LogFile, LogSet};
use tracing_subscriber::EnvFilter;

/// Prints the header and per-kind shape of each log given on the command
/// line. Directories are searched for logs.
fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let args: Vec<PathBuf> = env::args_os().skip(1).map(PathBuf::from).collect();
    if args.is_empty() {
        eprintln!("usage: runlog <log or directory>...");
        return ExitCode::from(2);
    }

    let mut failed = false;
    for arg in &args {
        let logs = if arg.is_dir() {
            match LogSet::discover(arg) {
                Ok(set) => set.paths().to_vec(),
                Err(e) => {
                    eprintln!("{}: {}", arg.display(), e);
                    failed = true;
                    continue;
                }
            }
        } else {
            vec![arg.clone()]
        };

        for path in &logs {
            if let Err(e) = summarize(path) {
                eprintln!("{}: {}", path.display(), e);
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn summarize(path: &Path) -> runlog::Result<()> {
    let log = LogFile::open(path)?;
    let header = serde_json::to_string(log.header()).map_err(io::Error::from)?;
    println!("{} ({:?})", log.path().display(), log.form());
    println!("  header {}", header);

    let tables = table::by_kind(log.events()?)?;
    for (kind, table) in &tables {
        let columns: Vec<&str> = table.columns().iter().map(String::as_str).collect();
        println!("  {}: {} rows [{}]", kind, table.len(), columns.join(", "));
    }
    Ok(())
}
