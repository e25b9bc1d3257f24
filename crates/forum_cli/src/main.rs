//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `forum_core` wiring against a real database file.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `forum_cli [config.toml]`

use forum_core::db::migrations::current_user_version;
use forum_core::{core_version, init_logging, open_db, ConfigLoader};
use log::info;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("forum_cli error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let loader = match std::env::args().nth(1) {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load().map_err(|err| err.to_string())?;

    if let Some(dir) = &config.logging.dir {
        init_logging(&config.logging.level, dir).map_err(|err| err.to_string())?;
    }

    let conn = open_db(&config.database.path, &config.to_database_options())
        .map_err(|err| err.to_string())?;
    let schema_version = current_user_version(&conn).map_err(|err| err.to_string())?;
    info!("event=cli_probe module=cli status=ok schema_version={schema_version}");

    println!("forum_core version={}", core_version());
    println!("forum_core schema_version={schema_version}");
    println!("forum_core database={}", config.database.path.display());
    Ok(())
}
