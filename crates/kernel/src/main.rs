use std::fs;
use std::io::{self, Write};
use std::sync::Once;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use kernel::{Kernel, KernelConfig};
use kernel_common::permission;
use kernel_pipeline::SecurityContext;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let format = std::env::var("KERNEL_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

        if format.eq_ignore_ascii_case("json") {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .flatten_event(true)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .compact()
                .init();
        }
    });
}

fn load_config(path: Option<String>) -> Result<KernelConfig> {
    let path = path.or_else(|| std::env::var("KERNEL_CONFIG").ok());
    match path {
        Some(path) => {
            let text = fs::read_to_string(&path)
                .map_err(|err| anyhow!("reading config {path}: {err}"))?;
            serde_yaml::from_str(&text).map_err(|err| anyhow!("parsing config {path}: {err}"))
        }
        None => Ok(KernelConfig::default()),
    }
}

fn parse_level(level: &str) -> Result<u32> {
    let mut bits = 0u32;
    for part in level.split(',') {
        bits |= match part.trim().to_ascii_lowercase().as_str() {
            "read" => permission::READ,
            "write" => permission::WRITE,
            "execute" => permission::EXECUTE,
            "delete" => permission::DELETE,
            "full" | "full_control" => permission::FULL_CONTROL,
            other => return Err(anyhow!("unknown permission level: {other}")),
        };
    }
    Ok(bits)
}

#[derive(Parser)]
#[command(name = "kernelctl")]
#[command(about = "Storage microkernel control utility", long_about = None)]
struct Cli {
    /// Path to a KernelConfig YAML file. Falls back to KERNEL_CONFIG, then
    /// in-process defaults.
    #[arg(long, global = true)]
    config: Option<String>,
    /// Principal performing the operation.
    #[arg(long, global = true, default_value = "root")]
    principal: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a container and grant the caller FullControl over it
    CreateContainer {
        container_id: String,
        #[arg(long)]
        encrypt: bool,
        #[arg(long)]
        compress: bool,
    },
    /// Store a blob from a local file
    Store {
        container_id: String,
        blob_name: String,
        #[arg(short, long)]
        file: String,
    },
    /// Read a blob and stream it to stdout
    Get {
        container_id: String,
        blob_name: String,
    },
    /// Delete a blob
    Delete {
        container_id: String,
        blob_name: String,
    },
    /// Grant a principal a permission level on a container
    GrantAccess {
        container_id: String,
        principal: String,
        /// Comma-separated: read,write,execute,delete,full
        level: String,
    },
    /// Search the metadata index by text and/or an inline vector
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Boot the kernel, start background daemons, and block until Ctrl-C
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.clone())?;
    let sec = SecurityContext::new(cli.principal.clone());

    let kernel = Kernel::boot(config.clone()).await?;

    match cli.command {
        Commands::CreateContainer {
            container_id,
            encrypt,
            compress,
        } => {
            kernel.create_container(&sec, &container_id, encrypt, compress);
            println!("Created container {container_id}");
        }
        Commands::Store {
            container_id,
            blob_name,
            file,
        } => {
            let data = fs::read(&file)?;
            let size = data.len();
            let manifest_id = kernel
                .store_blob(&sec, &container_id, &blob_name, data)
                .await?;
            println!(
                "Stored {container_id}/{blob_name} ({size} bytes, manifest {})",
                manifest_id.to_hex()
            );
        }
        Commands::Get {
            container_id,
            blob_name,
        } => {
            let data = kernel.get_blob(&sec, &container_id, &blob_name).await?;
            io::stdout().write_all(&data)?;
        }
        Commands::Delete {
            container_id,
            blob_name,
        } => {
            kernel.delete(&sec, &container_id, &blob_name).await?;
            println!("Deleted {container_id}/{blob_name}");
        }
        Commands::GrantAccess {
            container_id,
            principal,
            level,
        } => {
            let bits = parse_level(&level)?;
            kernel.grant_access(&sec, &container_id, &principal, bits)?;
            println!("Granted {level} on {container_id} to {principal}");
        }
        Commands::Search { query, limit } => {
            let hits = kernel.search(&sec, &query, None, limit).await?;
            if hits.is_empty() {
                println!("(no matches)");
            } else {
                for id in hits {
                    println!("{}", id.to_hex());
                }
            }
        }
        Commands::Serve => {
            kernel.start_daemons(&config).await;
            println!("kernelctl serving, Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            kernel.stop_daemons().await;
        }
    }

    Ok(())
}
