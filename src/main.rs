//! s3fs command-line entry point

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use s3fs::backend::s3::S3Backend;
use s3fs::config::Config;
use s3fs::flush::FlushCoordinator;
use s3fs::fs::DirectoryEngine;
use s3fs::store::open_store;
use s3fs::url::UrlPolicy;
use s3fs::{Result, S3fsError};

/// Print usage information
fn print_usage() {
    eprintln!("Usage: s3fs <config.yaml> <command> [args]");
    eprintln!();
    eprintln!("s3fs - hierarchical file system emulation over an S3 bucket");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  stat URI          Show the index record for a path");
    eprintln!("  ls URI            List a directory");
    eprintln!("  mkdir [-p] URI    Create a directory and any missing parents");
    eprintln!("  rmdir URI         Remove an empty directory");
    eprintln!("  rm URI            Delete a file");
    eprintln!("  mv FROM TO        Rename a file");
    eprintln!("  url URI           Print the external URL of a path");
    eprintln!("  put FILE URI      Upload a local file");
    eprintln!("  refresh           Rebuild the metadata index from the bucket");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  s3fs /etc/s3fs/config.yaml mkdir -p public://images/2024");
}

/// Parsed command line
enum Command {
    Stat(String),
    Ls(String),
    Mkdir { uri: String, recursive: bool },
    Rmdir(String),
    Rm(String),
    Mv { from: String, to: String },
    Url(String),
    Put { file: PathBuf, uri: String },
    Refresh,
}

impl Command {
    fn parse(args: &[String]) -> Option<Self> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let command = match args.as_slice() {
            ["stat", uri] => Command::Stat(uri.to_string()),
            ["ls", uri] => Command::Ls(uri.to_string()),
            ["mkdir", "-p", uri] => Command::Mkdir {
                uri: uri.to_string(),
                recursive: true,
            },
            ["mkdir", uri] => Command::Mkdir {
                uri: uri.to_string(),
                recursive: false,
            },
            ["rmdir", uri] => Command::Rmdir(uri.to_string()),
            ["rm", uri] => Command::Rm(uri.to_string()),
            ["mv", from, to] => Command::Mv {
                from: from.to_string(),
                to: to.to_string(),
            },
            ["url", uri] => Command::Url(uri.to_string()),
            ["put", file, uri] => Command::Put {
                file: PathBuf::from(*file),
                uri: uri.to_string(),
            },
            ["refresh"] => Command::Refresh,
            _ => return None,
        };
        Some(command)
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        print_usage();
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);
    let command = match Command::parse(&args[2..]) {
        Some(command) => command,
        None => {
            print_usage();
            std::process::exit(1);
        }
    };

    // Load configuration
    let config = match Config::shared_from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!("Loaded configuration from {:?}", config_path);

    let backend = Arc::new(S3Backend::new(&config).await?);
    let store = open_store(&config.index)?;
    let engine = Arc::new(DirectoryEngine::new(config.clone(), backend, store));

    match run(&engine, command).await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    }
}

/// Execute one command; `Ok(false)` means the operation was refused
async fn run(engine: &Arc<DirectoryEngine>, command: Command) -> Result<bool> {
    match command {
        Command::Stat(uri) => match engine.stat(&uri).await? {
            Some(record) => {
                println!("uri:       {}", record.uri);
                println!("type:      {}", if record.is_dir { "directory" } else { "file" });
                println!("size:      {}", record.size);
                println!("timestamp: {}", format_timestamp(record.timestamp));
                if !record.version.is_empty() {
                    println!("version:   {}", record.version);
                }
                Ok(true)
            }
            None => {
                eprintln!("{}: not found", uri);
                Ok(false)
            }
        },
        Command::Ls(uri) => {
            let listing = engine
                .readdir(&uri)
                .await?
                .ok_or_else(|| S3fsError::NotADirectory(uri.clone()))?;
            for name in listing {
                println!("{}", name);
            }
            Ok(true)
        }
        Command::Mkdir { uri, recursive } => {
            let created = engine.mkdir(&uri, recursive).await?;
            if !created {
                eprintln!("{}: it or one of its parents is a file", uri);
            }
            Ok(created)
        }
        Command::Rmdir(uri) => {
            let removed = engine.rmdir(&uri).await?;
            if !removed {
                eprintln!("{}: not an empty directory", uri);
            }
            Ok(removed)
        }
        Command::Rm(uri) => {
            let removed = engine.unlink(&uri).await?;
            if !removed {
                eprintln!("{}: no such file", uri);
            }
            Ok(removed)
        }
        Command::Mv { from, to } => {
            let moved = engine.rename(&from, &to).await?;
            if !moved {
                eprintln!("{}: no such file, or the copy never became visible", from);
            }
            Ok(moved)
        }
        Command::Url(uri) => {
            let policy = UrlPolicy::new(
                engine.config().clone(),
                engine.backend().clone(),
                engine.store().clone(),
            );
            println!("{}", policy.external_url_cached(&uri).await?);
            Ok(true)
        }
        Command::Put { file, uri } => {
            let body = tokio::fs::read(&file).await?;
            let flushed = FlushCoordinator::new(engine.clone())
                .flush(&uri, Bytes::from(body))
                .await?;
            if !flushed {
                eprintln!("{}: uploaded but not yet visible; index not updated", uri);
            }
            Ok(flushed)
        }
        Command::Refresh => {
            let count = engine.refresh_cache().await?;
            info!("Index now holds {} record(s)", count);
            println!("{} record(s)", count);
            Ok(true)
        }
    }
}

fn format_timestamp(secs: u64) -> String {
    chrono::DateTime::from_timestamp(secs as i64, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}
