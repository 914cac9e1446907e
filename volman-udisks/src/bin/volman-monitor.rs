// SPDX-License-Identifier: GPL-3.0-only

//! Command-line front end for the volume lifecycle core on top of UDisks2

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::json;
use volman_core::{
    Config, Credentials, JsonFilePersistence, MountTarget, NoPrompt, SecretPrompt, SecretReply,
    SecretRequest, VolumeManager, logging,
};
use volman_types::DeviceEvent;
use volman_udisks::UDisksMountService;

/// Watch and operate removable drives, volumes and mounts
#[derive(Parser)]
#[command(name = "volman-monitor")]
#[command(about = "Device and volume lifecycle monitor", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $XDG_CONFIG_HOME/volman/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Never ask for passphrases; encrypted volumes fail to mount
    #[arg(long, global = true)]
    no_prompt: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print device events as JSON lines until interrupted
    Watch,
    /// List known volumes and mounts
    List,
    /// Mount a volume by id, device file or URI
    Mount {
        /// Volume id, device file (/dev/sdb1), mount path or URI
        target: String,
    },
    /// Unmount a volume or mount
    Unmount {
        /// Volume id, device file, mount path or root URI
        target: String,
    },
    /// Eject the drive behind a volume or mount
    Eject {
        /// Volume id, device file, mount path or root URI
        target: String,
    },
    /// Show device properties and mount/eject policy
    Info {
        /// Volume id, device file or kernel name (e.g. sdb1)
        id: String,
        /// Look up a network mount instead of a block device
        #[arg(long)]
        protocol: bool,
    },
}

/// Reads passphrases from the controlling terminal
struct TerminalPrompt;

#[async_trait]
impl SecretPrompt for TerminalPrompt {
    async fn request_secret(&self, request: SecretRequest) -> SecretReply {
        let read = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            let mut stderr = std::io::stderr();
            write!(stderr, "{}: ", request.message)?;
            stderr.flush()?;
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok(line.trim_end_matches(['\r', '\n']).to_string())
        })
        .await;

        match read {
            Ok(Ok(secret)) if !secret.is_empty() => SecretReply::Provided(Credentials {
                secret,
                ..Default::default()
            }),
            _ => SecretReply::Cancelled,
        }
    }
}

/// Object paths are ids; anything else is resolved as a path or URI.
fn target_of(raw: &str) -> MountTarget {
    if raw.starts_with("/org/freedesktop/UDisks2/") {
        MountTarget::Id(raw.to_string())
    } else {
        MountTarget::Path(raw.to_string())
    }
}

fn timestamp() -> String {
    chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, false)
}

fn print_event(event: &DeviceEvent) -> Result<()> {
    let line = json!({ "time": timestamp(), "event": event });
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load_or_default(),
    };
    logging::init(&config.logging);

    tracing::info!("Starting volman-monitor v{}", env!("CARGO_PKG_VERSION"));

    let service = UDisksMountService::connect(config.clone())
        .await
        .context("UDisks2 is not available on the system bus")?;
    let store = JsonFilePersistence::open(config.persistence_path())?;
    let prompt: Arc<dyn SecretPrompt> = if cli.no_prompt {
        Arc::new(NoPrompt)
    } else {
        Arc::new(TerminalPrompt)
    };

    let manager = VolumeManager::builder()
        .service(Arc::new(service))
        .prompt(prompt)
        .store(Arc::new(store))
        .config(config)
        .build()?;
    // Subscribe before startup so no event is missed; only `watch` reads them.
    let events = matches!(cli.command, Commands::Watch).then(|| manager.subscribe());
    let monitor = manager.start().await?;

    match cli.command {
        Commands::Watch => {
            let mut events = events.context("watch has no event subscription")?;
            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else {
                            break;
                        };
                        print_event(&event)?;
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Received shutdown signal");
                        break;
                    }
                }
            }
        }
        Commands::List => {
            for info in manager.registry().disk_infos() {
                println!("{}", serde_json::to_string(&info)?);
            }
        }
        Commands::Mount { target } => {
            let info = manager.mount(target_of(&target))?.wait().await?;
            println!("{}", serde_json::to_string(&info)?);
        }
        Commands::Unmount { target } => {
            let info = manager.unmount(target_of(&target))?.wait().await?;
            println!("{}", serde_json::to_string(&info)?);
        }
        Commands::Eject { target } => {
            let info = manager.eject(target_of(&target))?.wait().await?;
            println!("{}", serde_json::to_string(&info)?);
        }
        Commands::Info { id, protocol } => {
            if protocol {
                let props = manager.protocol_info(&id).await?;
                println!("{}", serde_json::to_string_pretty(&props)?);
            } else {
                let props = manager.block_info(&id).await?;
                let mountable = manager.is_mountable(&id).await?;
                let ejectable = manager.is_ejectable(&id).await?;
                let out = json!({
                    "properties": props,
                    "mountable": { "allowed": mountable.allowed, "reason": mountable.reason },
                    "ejectable": { "allowed": ejectable.allowed, "reason": ejectable.reason },
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
        }
    }

    monitor.stop();
    Ok(())
}
