use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hyisp_core::payload::scramble::printable;
use hyisp_core::protocol::frame::to_hex;
use hyisp_core::{
    FirmwareImage, FlashConfig, FlashEvent, FlashObserver, FlashOrchestrator, NusbConnector,
    TracingObserver, UploadPass,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "HyISP keyboard firmware flasher", long_about = None)]
struct Args {
    /// TOML file with timing overrides
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Flash a firmware image
    Flash {
        /// Path to the application image
        firmware: PathBuf,
    },
    /// Print the ISP and keyboard firmware versions
    Info,
    /// Show what would be sent for an image, without a device
    Inspect {
        /// Path to the application image
        firmware: PathBuf,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Draws a progress bar on stderr and forwards everything to tracing.
struct ProgressObserver;

impl ProgressObserver {
    const WIDTH: usize = 40;
}

impl FlashObserver for ProgressObserver {
    fn on_event(&self, event: &FlashEvent) {
        match event {
            FlashEvent::Progress {
                pass,
                current,
                total,
            } => {
                let filled = if *total > 0 {
                    current * Self::WIDTH / total
                } else {
                    Self::WIDTH
                };
                let mut stderr = std::io::stderr().lock();
                let _ = write!(
                    stderr,
                    "\x1b[2K\r{:>6} [{}{}] {}/{}",
                    pass.to_string(),
                    "#".repeat(filled),
                    " ".repeat(Self::WIDTH - filled),
                    current,
                    total
                );
                if current == total {
                    let _ = writeln!(stderr);
                }
                let _ = stderr.flush();
            }
            other => TracingObserver.on_event(other),
        }
    }
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => FlashConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => FlashConfig::default(),
    };

    match args.command {
        Commands::Flash { firmware } => {
            let image = load_image(&firmware)?;
            info!(path = %firmware.display(), size = image.len(), "Flashing firmware");
            let mut flasher =
                FlashOrchestrator::with_observer(NusbConnector, config, Arc::new(ProgressObserver));
            flasher.run(&image)?;
            println!("Done.");
        }
        Commands::Info => {
            let mut flasher = FlashOrchestrator::new(NusbConnector, config);
            let (isp, kbd) = flasher.query_versions()?;
            println!("ISP firmware version:      0x{:02X}", isp);
            println!("Keyboard firmware version: 0x{:02X}", kbd);
        }
        Commands::Inspect { firmware } => {
            let image = load_image(&firmware)?;
            let descrambled = image.descrambled_profile_header();
            println!("Image:              {} ({} bytes)", firmware.display(), image.len());
            println!("Profile scrambled:  {}", to_hex(image.profile_header()));
            println!("Profile:            {}", to_hex(&descrambled));
            println!("Profile text:       {}", printable(&descrambled));
            for pass in [UploadPass::Header, UploadPass::Image] {
                let mut blocks = image.blocks(pass);
                let first = blocks.next().map(|b| b.seq).unwrap_or_default();
                let last = blocks.last().map(|b| b.seq).unwrap_or(first);
                println!(
                    "{:<6} pass:        {} blocks, 0x{:04X}..=0x{:04X}",
                    pass.to_string(),
                    image.block_count(pass),
                    first,
                    last
                );
            }
        }
        Commands::Config { output } => match output {
            Some(path) => {
                config
                    .save_to_file(&path)
                    .with_context(|| format!("Failed to write config {}", path.display()))?;
                info!(path = %path.display(), "Configuration written");
            }
            None => print!("{}", config.to_toml()?),
        },
    }
    Ok(())
}

fn load_image(path: &Path) -> Result<FirmwareImage> {
    FirmwareImage::from_path(path)
        .with_context(|| format!("Failed to read firmware {}", path.display()))
}
