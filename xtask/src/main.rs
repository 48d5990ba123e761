use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build,
    /// Run the workspace tests
    Test,
    /// Transfer a generated image to the flash simulator
    Simulate {
        /// Image size in bytes
        #[arg(long, default_value_t = 128 * 1024)]
        size: usize,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{} failed", what);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building project...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"], "Test")?;
        }
        Commands::Simulate { size } => {
            let dir = PathBuf::from("target").join("xtask");
            std::fs::create_dir_all(&dir)?;

            let image = dir.join("sim-image.bin");
            let data: Vec<u8> = (0..*size).map(|i| (i * 31 + (i >> 8)) as u8).collect();
            std::fs::write(&image, data)?;

            let config = dir.join("sim.toml");
            let mut args = vec!["run", "-p", "fwxfer-cli", "--", "policy-template"];
            args.extend(["--class", "spi-bridge", "--output"]);
            args.extend(config.to_str());
            cargo(&args, "Template")?;

            println!("Simulating transfer of {} bytes...", size);
            let mut args = vec!["run", "-p", "fwxfer-cli", "--", "run"];
            args.extend(image.to_str());
            args.push("--config");
            args.extend(config.to_str());
            args.push("--simulate");
            cargo(&args, "Simulation")?;
        }
    }

    Ok(())
}
