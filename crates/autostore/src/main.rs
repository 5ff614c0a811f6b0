//! AutoStore - File storage made simple

use anyhow::{Context, Result, bail};
use autostore_core::handlers::{extension_of, normalize_extension};
use autostore_core::{AutoStore, Data, ReadOptions, spawn_cleanup_task};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::Config;

/// AutoStore - dictionary-like access to local and object storage
#[derive(Parser, Debug)]
#[command(author, version = autostore_core::VERSION, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "AUTOSTORE_CONFIG", default_value = "autostore.toml")]
    config: String,

    /// Storage URI (overrides `[store] uri`)
    #[arg(short, long, env = "AUTOSTORE_URI")]
    uri: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a key and print it
    Get {
        key: String,
        /// Format handler to use instead of the key's extension
        #[arg(short, long)]
        format: Option<String>,
        /// Bypass the local cache
        #[arg(long)]
        ignore_cache: bool,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the stored bytes as-is
        #[arg(long)]
        raw: bool,
    },
    /// Store a file (or stdin) under a key
    Put {
        key: String,
        file: Option<PathBuf>,
        #[arg(short, long)]
        format: Option<String>,
        /// Store the input bytes as-is
        #[arg(long)]
        raw: bool,
    },
    /// List keys
    Ls {
        #[arg(default_value = "*")]
        pattern: String,
        #[arg(long)]
        no_recursive: bool,
    },
    /// Delete a key
    Rm { key: String },
    /// Exit with status 1 when a key does not exist
    Exists { key: String },
    /// Cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Remove expired entries
    Cleanup,
    /// Drop the cached copy of a key
    Invalidate { key: String },
    /// Print cache statistics
    Stats,
    /// Remove every entry
    Clear,
    /// Remove expired entries periodically until interrupted
    Watch {
        #[arg(long)]
        interval_hours: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    init_logging(&config.logging.level, &config.logging.format);

    let uri = args.uri.clone().unwrap_or_else(|| config.store.uri.clone());
    debug!("AutoStore v{} opening {}", autostore_core::VERSION, uri);

    let store = AutoStore::with_options_list(&uri, config.store_options())
        .await
        .with_context(|| format!("Failed to open store at {}", uri))?;

    let code = run(&store, &config, args.command).await;

    if let Err(e) = store.cleanup().await {
        warn!("Failed to clean up store: {}", e);
    }
    code
}

async fn run(store: &AutoStore, config: &Config, command: Command) -> Result<ExitCode> {
    match command {
        Command::Get {
            key,
            format,
            ignore_cache,
            output,
            raw,
        } => {
            let bytes = if raw {
                if ignore_cache {
                    store.invalidate_cache(&key).await?;
                }
                store.read_bytes(&key).await?.to_vec()
            } else {
                let options = ReadOptions {
                    format,
                    ignore_cache,
                };
                let data = store
                    .read(&key, options)
                    .await
                    .with_context(|| format!("Failed to read {}", key))?;
                render(store, &data)?
            };

            match output {
                Some(path) => {
                    tokio::fs::write(&path, &bytes)
                        .await
                        .with_context(|| format!("Failed to write {:?}", path))?;
                    info!("Wrote {} bytes to {:?}", bytes.len(), path);
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&bytes).await?;
                    stdout.flush().await?;
                }
            }
        }
        Command::Put {
            key,
            file,
            format,
            raw,
        } => {
            let input = match &file {
                Some(path) => tokio::fs::read(path)
                    .await
                    .with_context(|| format!("Failed to read {:?}", path))?,
                None => {
                    let mut buf = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buf).await?;
                    buf
                }
            };

            if raw {
                store.write_bytes(&key, input).await?;
            } else {
                let data = parse_input(store, &key, file.as_ref(), format.as_deref(), input)?;
                store
                    .write(&key, data, format.as_deref())
                    .await
                    .with_context(|| format!("Failed to write {}", key))?;
            }
            info!("Stored {}", key);
        }
        Command::Ls {
            pattern,
            no_recursive,
        } => {
            for key in store.list_files(&pattern, !no_recursive).await? {
                println!("{}", key);
            }
        }
        Command::Rm { key } => {
            if store.delete(&key).await? {
                println!("Deleted {}", key);
            } else {
                println!("Not found: {}", key);
            }
        }
        Command::Exists { key } => {
            let exists = store.exists(&key).await?;
            println!("{}", exists);
            if !exists {
                return Ok(ExitCode::from(1));
            }
        }
        Command::Cache { action } => return run_cache(store, config, action).await,
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_cache(store: &AutoStore, config: &Config, action: CacheCommand) -> Result<ExitCode> {
    let Some(cache) = store.cache() else {
        bail!("Cache is disabled; set [cache] enabled = true in the config file");
    };

    match action {
        CacheCommand::Cleanup => {
            let removed = store.cleanup_expired_cache().await?;
            println!("Removed {} expired entries", removed);
        }
        CacheCommand::Invalidate { key } => {
            if store.invalidate_cache(&key).await? {
                println!("Invalidated {}", key);
            } else {
                println!("Not cached: {}", key);
            }
        }
        CacheCommand::Stats => {
            let stats = cache.stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        CacheCommand::Clear => {
            let removed = cache.clear().await?;
            println!("Removed {} entries", removed);
        }
        CacheCommand::Watch { interval_hours } => {
            let hours = interval_hours
                .unwrap_or(config.cache.cleanup_interval_hours)
                .max(1);
            let task = spawn_cleanup_task(cache.clone(), Duration::from_secs(hours * 3600));
            shutdown_signal().await;
            task.abort();
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Bytes to print for loaded data
fn render(store: &AutoStore, data: &Data) -> Result<Vec<u8>> {
    Ok(match data {
        Data::Json(value) => {
            let mut out = serde_json::to_vec_pretty(value)?;
            out.push(b'\n');
            out
        }
        Data::Text(text) => text.clone().into_bytes(),
        Data::Bytes(bytes) => bytes.to_vec(),
        Data::Table(_) => {
            let handler = store
                .handlers()
                .handler_for_extension(".csv")
                .context("No CSV handler registered")?;
            handler.write(data, ".csv")?.to_vec()
        }
    })
}

/// Parse input bytes by the source file's extension, the format, or the key
fn parse_input(
    store: &AutoStore,
    key: &str,
    file: Option<&PathBuf>,
    format: Option<&str>,
    input: Vec<u8>,
) -> Result<Data> {
    let ext = file
        .and_then(|f| extension_of(&f.to_string_lossy()))
        .or_else(|| format.map(normalize_extension))
        .or_else(|| extension_of(key));

    let Some((handler, ext)) = ext.and_then(|ext| {
        store
            .handlers()
            .handler_for_extension(&ext)
            .map(|h| (h, ext))
    }) else {
        debug!("No handler for input of {}, storing bytes", key);
        return Ok(Data::Bytes(input.into()));
    };

    handler
        .read(&input, &ext)
        .with_context(|| format!("Failed to parse input as {}", ext))
}

/// Initialize logging on stderr, keeping stdout for command output
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_get() {
        let args = Args::try_parse_from([
            "autostore",
            "--uri",
            "memory://cli",
            "get",
            "a.bin",
            "--format",
            "json",
            "--ignore-cache",
        ])
        .unwrap();
        assert_eq!(args.uri.as_deref(), Some("memory://cli"));
        match args.command {
            Command::Get {
                key,
                format,
                ignore_cache,
                raw,
                ..
            } => {
                assert_eq!(key, "a.bin");
                assert_eq!(format.as_deref(), Some("json"));
                assert!(ignore_cache);
                assert!(!raw);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_cache_invalidate() {
        let args = Args::try_parse_from(["autostore", "cache", "invalidate", "k.json"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Cache {
                action: CacheCommand::Invalidate { key }
            } if key == "k.json"
        ));
    }

    #[tokio::test]
    async fn test_parse_input_and_render() {
        let store = AutoStore::new("memory://cli-parse-input").await.unwrap();

        let data = parse_input(
            &store,
            "out.json",
            Some(&PathBuf::from("in.csv")),
            None,
            b"a,b\n1,2\n".to_vec(),
        )
        .unwrap();
        assert!(data.as_table().is_some());
        assert_eq!(render(&store, &data).unwrap(), b"a,b\n1,2\n");

        let data = parse_input(&store, "k.json", None, None, b"{\"x\": 1}".to_vec()).unwrap();
        assert_eq!(render(&store, &data).unwrap(), b"{\n  \"x\": 1\n}\n");

        let data = parse_input(&store, "blob", None, None, vec![1, 2]).unwrap();
        assert!(matches!(data, Data::Bytes(_)));
    }

    #[tokio::test]
    async fn test_run_put_csv_input_under_json_key() {
        let store = AutoStore::new("memory://cli-csv-to-json").await.unwrap();
        let config = Config::default();
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("in.csv");
        std::fs::write(&input, "a,b\n1,2\n").unwrap();

        let put = Command::Put {
            key: "out.json".to_string(),
            file: Some(input),
            format: None,
            raw: false,
        };
        run(&store, &config, put).await.unwrap();

        assert_eq!(
            store.get("out.json").await.unwrap(),
            Data::Json(serde_json::json!([{"a": "1", "b": "2"}]))
        );
    }

    #[tokio::test]
    async fn test_run_put_get_exists() {
        let store = AutoStore::new("memory://cli-run").await.unwrap();
        let config = Config::default();
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("input.json");
        std::fs::write(&input, "{\"n\": 1}").unwrap();

        let put = Command::Put {
            key: "n.json".to_string(),
            file: Some(input),
            format: None,
            raw: false,
        };
        assert_eq!(run(&store, &config, put).await.unwrap(), ExitCode::SUCCESS);

        let output = dir.path().join("out.json");
        let get = Command::Get {
            key: "n.json".to_string(),
            format: None,
            ignore_cache: false,
            output: Some(output.clone()),
            raw: false,
        };
        run(&store, &config, get).await.unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "{\n  \"n\": 1\n}\n");

        let missing = Command::Exists {
            key: "nope.json".to_string(),
        };
        assert_eq!(run(&store, &config, missing).await.unwrap(), ExitCode::from(1));

        let cache = Command::Cache {
            action: CacheCommand::Stats,
        };
        assert!(run(&store, &config, cache).await.is_err());
    }
}
