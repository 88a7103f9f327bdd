use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use netwarden::capture::CaptureMethod;
use netwarden::detect::RuleSet;
use netwarden::{Config, Netwarden, ShutdownFlag};

#[derive(Parser)]
#[command(name = "netwarden")]
#[command(author, version, about = "passive network intrusion detection system")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture live traffic on an interface
    Run {
        /// Interface to capture on (autodetected when omitted)
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Replay a pcap capture file through the detectors
    Replay {
        /// Path to the pcap file
        file: PathBuf,
    },

    /// Validate a signature rule file
    CheckRules {
        /// Path to the rule document
        #[arg(default_value = "signature_rules.json")]
        path: PathBuf,
    },
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::Run { interface } => {
            config.capture.method = CaptureMethod::Live;
            if interface.is_some() {
                config.capture.interface = interface;
            }
            Netwarden::new(config).run(shutdown_on_ctrl_c()).await
        }
        Commands::Replay { file } => {
            config.capture.method = CaptureMethod::File;
            config.capture.pcap_file = Some(file.display().to_string());
            Netwarden::new(config).run(shutdown_on_ctrl_c()).await
        }
        Commands::CheckRules { path } => {
            let rules = RuleSet::load(&path)?;
            info!(rules = rules.len(), path = %path.display(), "rule file is valid");
            for rule in &rules.rules {
                println!("{:<12} {:<10} {}", rule.id, rule.severity, rule.description);
            }
            Ok(())
        }
    }
}

/// Shutdown flag flipped by the first ctrl-c.
fn shutdown_on_ctrl_c() -> ShutdownFlag {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            handler_flag.store(true, Ordering::Relaxed);
        }
    });
    flag
}
