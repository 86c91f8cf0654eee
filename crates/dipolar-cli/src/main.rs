//! Dipolar kernel generator command-line interface.
//!
//! Generate demagnetising kernels from TOML configuration files:
//! ```sh
//! dipolar generate job.toml
//! dipolar validate job.toml
//! dipolar devices --count 4
//! ```

mod config;
mod runner;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dipolar")]
#[command(about = "Dipolar: demagnetising kernel generator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate kernel slices from a TOML configuration file.
    Generate {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file without generating anything.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// List the execution devices available to a job.
    Devices {
        /// Number of devices to create.
        #[arg(short, long, default_value_t = 1)]
        count: usize,
        /// Worker threads per device (0 shares the machine evenly).
        #[arg(short, long, default_value_t = 0)]
        threads: usize,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate { config, output } => {
            println!("Dipolar Kernel Generator");
            println!("========================");
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());

            let result = runner::run_generation(&job)?;

            let out_dir = output.unwrap_or_else(|| PathBuf::from(&job.output.directory));

            // One CSV per slice (default on)
            if job.output.save_csv {
                for (pair, data) in &result.slices {
                    let path = out_dir.join(format!("kernel_{}.csv", pair));
                    runner::write_slice_csv(*pair, data, &result.params, &path)?;
                }
            }

            if job.output.save_json {
                runner::write_kernel_json(&result, &out_dir.join("kernel.json"))?;
            }

            println!("Generation complete.");
            Ok(())
        }
        Commands::Validate { config } => {
            let job = config::load_config(&config)?;
            job.validate()?;
            let params = job.kernel_params()?;
            let pairs: Vec<String> = job
                .output_pairs()?
                .iter()
                .map(|p| p.to_string())
                .collect();
            println!("Configuration is valid: {}", config.display());
            println!("  extent: {:?}", params.extent.dims());
            println!("  slices: {}", pairs.join(", "));
            println!("  devices: {}", job.devices.count);
            Ok(())
        }
        Commands::Devices { count, threads } => runner::describe_devices(count, threads),
    }
}
