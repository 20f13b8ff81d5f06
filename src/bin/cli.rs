//! CaskKV CLI
//!
//! Command-line interface that opens a data directory directly.

use std::process::ExitCode;

use caskkv::{CaskError, Config, Engine};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// CaskKV CLI
#[derive(Parser, Debug)]
#[command(name = "caskkv-cli")]
#[command(about = "CLI for the CaskKV key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./caskkv_data")]
    data_dir: String,

    /// Rotate data files after this many bytes
    #[arg(short = 'm', long, default_value_t = 1u64 << 32)]
    max_file_size: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    #[command(alias = "delete")]
    Del {
        /// The key to delete
        key: String,
    },

    /// Run one compaction cycle
    Merge,

    /// Show keys and files
    Stats,

    /// Walk through put/get/delete/reopen on a scratch directory
    Demo,
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,caskkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CaskError::KeyNotFound) => {
            println!("(not found)");
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> caskkv::Result<()> {
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .max_file_size(args.max_file_size)
        .merge_enabled(false)
        .merge_min_files(1)
        .build();

    if let Commands::Demo = args.command {
        return demo(config);
    }

    let engine = Engine::open(config)?;
    let result = match args.command {
        Commands::Get { key } => engine.get(key.as_bytes()).map(|value| {
            println!("{}", String::from_utf8_lossy(&value));
        }),
        Commands::Put { key, value } => engine.put(key.as_bytes(), value.as_bytes()),
        Commands::Del { key } => engine.delete(key.as_bytes()),
        Commands::Merge => engine.merge().map(|stats| println!("{:#?}", stats)),
        Commands::Stats => engine.file_ids().map(|ids| {
            println!("keys:        {}", engine.key_count());
            println!("active file: {}", engine.active_file_id());
            println!("data files:  {:?}", ids);
        }),
        Commands::Demo => Ok(()),
    };

    let closed = engine.close();
    first_error(result, closed)
}

/// The command's own failure wins over a failure to close afterwards
fn first_error(command: caskkv::Result<()>, close: caskkv::Result<()>) -> caskkv::Result<()> {
    command.and(close)
}

fn demo(config: Config) -> caskkv::Result<()> {
    let dir = config.data_dir.join("demo");
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }
    let config = Config { data_dir: dir, ..config };

    let engine = Engine::open(config.clone())?;
    engine.put(b"key1", b"val1")?;
    engine.put(b"key2", b"val2")?;
    show(&engine, b"key1");
    show(&engine, b"key2");

    engine.put(b"key1", b"another v1")?;
    engine.delete(b"key2")?;
    show(&engine, b"key1");
    show(&engine, b"key2");
    engine.close()?;

    let engine = Engine::open(config)?;
    show(&engine, b"key1");
    show(&engine, b"key2");
    engine.close()
}

fn show(engine: &Engine, key: &[u8]) {
    let key_str = String::from_utf8_lossy(key);
    match engine.get(key) {
        Ok(value) => tracing::info!("key : {}, value : {}", key_str, String::from_utf8_lossy(&value)),
        Err(e) => tracing::info!("key : {}, {}", key_str, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(dir: &std::path::Path, command: Commands) -> Args {
        Args {
            data_dir: dir.to_string_lossy().into_owned(),
            max_file_size: 1 << 20,
            command,
        }
    }

    #[test]
    fn test_command_error_beats_close_error() {
        let result = first_error(
            Err(CaskError::KeyNotFound),
            Err(CaskError::Config("close failed".to_string())),
        );
        assert!(matches!(result, Err(CaskError::KeyNotFound)));

        let result = first_error(Ok(()), Err(CaskError::Config("close failed".to_string())));
        assert!(matches!(result, Err(CaskError::Config(_))));
    }

    #[test]
    fn test_missing_key_still_closes_engine() {
        let temp = TempDir::new().unwrap();

        let result = run(args(temp.path(), Commands::Get { key: "nope".to_string() }));

        assert!(matches!(result, Err(CaskError::KeyNotFound)));
        assert!(!temp.path().join(caskkv::lock::LOCK_FILE_NAME).exists());
    }
}
