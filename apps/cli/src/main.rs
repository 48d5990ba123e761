use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use fwxfer_core::config::UpdateConfig;
use fwxfer_core::events::{TracingObserver, TransferEvent, TransferObserver};
use fwxfer_core::payload::{PlanParams, get_firmware_blob, plan_chunks};
use fwxfer_core::protocol::ata::AtaConfig;
use fwxfer_core::protocol::bridge::BridgeConfig;
use fwxfer_core::session::TransferSession;
use fwxfer_core::transport::{FlashSimulator, Transport, open_channel};
use fwxfer_core::DeviceClass;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked firmware transfer tool", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read and print the device identity
    Identify {
        /// Update configuration (TOML)
        #[arg(long)]
        config: PathBuf,
        /// Talk to the built-in flash simulator instead of USB
        #[arg(long)]
        simulate: bool,
    },
    /// Show how an image would be split into chunks
    Plan {
        image: PathBuf,
        #[arg(long, default_value = "256", value_parser = parse_number::<usize>)]
        chunk_size: usize,
        #[arg(long, default_value = "0", value_parser = parse_number::<u64>)]
        origin: u64,
        #[arg(long, default_value = "0", value_parser = parse_number::<usize>)]
        page_size: usize,
        /// Required block multiple; 0 disables
        #[arg(long, default_value = "0", value_parser = parse_number::<usize>)]
        alignment: usize,
    },
    /// Transfer an image to the device
    Run {
        image: PathBuf,
        /// Update configuration (TOML)
        #[arg(long)]
        config: PathBuf,
        /// Talk to the built-in flash simulator instead of USB
        #[arg(long)]
        simulate: bool,
        /// Simulated flash size
        #[arg(long, default_value = "0x1000000", value_parser = parse_number::<usize>)]
        sim_flash_size: usize,
    },
    /// Print or save a configuration template for a device class
    PolicyTemplate {
        #[arg(long, value_enum)]
        class: ClassArg,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ClassArg {
    Ata,
    SpiBridge,
}

fn parse_number<T: TryFrom<u64>>(s: &str) -> Result<T, String> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    }
    .map_err(|e| e.to_string())?;
    T::try_from(value).map_err(|_| format!("{} is out of range", s))
}

/// Logs progress at info level every tenth of a stage.
struct ProgressObserver {
    last_decile: AtomicU64,
}

impl TransferObserver for ProgressObserver {
    fn on_event(&self, event: &TransferEvent) {
        match event {
            TransferEvent::Progress {
                state,
                completed,
                total,
            } if *total > 0 => {
                let decile = completed * 10 / total;
                let crossed = decile != self.last_decile.swap(decile, Ordering::Relaxed);
                if completed == total || crossed {
                    info!(stage = %state, "{}/{} ({}%)", completed, total, completed * 100 / total);
                }
            }
            TransferEvent::StateChanged { .. } => {
                self.last_decile.store(0, Ordering::Relaxed);
                TracingObserver.on_event(event);
            }
            other => TracingObserver.on_event(other),
        }
    }
}

fn channel(
    config: &UpdateConfig,
    simulate: bool,
    sim_flash_size: usize,
) -> Result<Box<dyn Transport>> {
    if simulate {
        if !matches!(config.device, DeviceClass::SpiBridge(_)) {
            bail!("the simulator only speaks the spi-bridge command set");
        }
        info!(flash_size = sim_flash_size, "Using flash simulator");
        return Ok(Box::new(FlashSimulator::new(sim_flash_size, 0x1000)));
    }
    let usb = config
        .usb
        .context("configuration has no [usb] section; pass --simulate or add one")?;
    Ok(open_channel(&usb)?)
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Identify { config, simulate } => {
            let config = UpdateConfig::load_from_file(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let mut transport = channel(&config, simulate, 0x1000000)?;
            let session = TransferSession::new(config.device.clone(), config.effective_policy());
            let identity = session.identify(&mut transport)?;
            println!("{}", identity);
            println!("{:#?}", identity);
        }
        Command::Plan {
            image,
            chunk_size,
            origin,
            page_size,
            alignment,
        } => {
            let blob = get_firmware_blob(&image)?;
            let params = PlanParams::new(chunk_size)
                .with_origin(origin)
                .with_page_size(page_size)
                .with_alignment(alignment);
            let plan = plan_chunks(blob.as_bytes(), &params)?;
            println!("{}: {} bytes in {} chunks", image.display(), blob.len(), plan.total());
            for chunk in plan {
                println!("  #{:<6} 0x{:08X} +{}", chunk.index, chunk.address, chunk.len());
            }
        }
        Command::Run {
            image,
            config,
            simulate,
            sim_flash_size,
        } => {
            let config = UpdateConfig::load_from_file(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let blob = get_firmware_blob(&image)?;
            let mut transport = channel(&config, simulate, sim_flash_size)?;
            info!(
                image = %image.display(),
                len = blob.len(),
                channel = %transport.describe(),
                "Starting transfer"
            );

            let session = TransferSession::with_observer(
                config.device.clone(),
                config.effective_policy(),
                Arc::new(ProgressObserver {
                    last_decile: AtomicU64::new(0),
                }),
            );
            let report = session.run(blob.as_bytes(), &mut transport)?;
            println!(
                "Done: {} of {} chunks written ({} bytes), {} blocks erased, {} bytes verified{}",
                report.chunks_written,
                report.total_chunks,
                report.bytes_written,
                report.erased_blocks,
                report.verified_bytes,
                if report.stopped_early { ", device stopped early" } else { "" }
            );
        }
        Command::PolicyTemplate { class, output } => {
            let device = match class {
                ClassArg::Ata => DeviceClass::Ata(AtaConfig::default()),
                ClassArg::SpiBridge => DeviceClass::SpiBridge(BridgeConfig::default()),
            };
            let template = UpdateConfig::template(device);
            match output {
                Some(path) => {
                    template.save_to_file(&path)?;
                    info!(path = %path.display(), "Template written");
                }
                None => print!("{}", template.to_toml()?),
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
