//! CLI tool for gpuwatch

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "gpuwatch")]
#[command(about = "GPU watch: nvidia-smi sampling with temperature trends and a JSON API for dashboards", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (default: ~/.config/gpuwatch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Serve the JSON API (default)
    Serve {
        /// Bind address
        #[arg(long)]
        host: Option<String>,
        /// Bind port
        #[arg(short, long)]
        port: Option<u16>,
        /// Sample in the background every N milliseconds instead of per request
        #[arg(short, long)]
        interval_ms: Option<u64>,
    },
    /// Run one poll cycle and print it
    Snapshot {
        /// Output format (json or text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Write the default configuration file
    Config {
        /// Destination (default: ~/.config/gpuwatch/config.toml)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[cfg(feature = "cli")]
fn load_config(path: Option<&PathBuf>) -> gpuwatch::Result<gpuwatch::Config> {
    match path {
        Some(path) => gpuwatch::Config::load_from(path),
        None => gpuwatch::Config::load(),
    }
}

#[cfg(feature = "cli")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use gpuwatch::GpuMonitor;

    let cli = Cli::parse();

    env_logger::init();

    match cli.command {
        Some(Commands::Snapshot { format }) => {
            let config = load_config(cli.config.as_ref())?;
            let mut monitor = GpuMonitor::from_config(&config);
            let snapshot = monitor.poll()?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_snapshot(&snapshot);
            }
        }
        Some(Commands::Config { path }) => {
            let config = gpuwatch::Config::default();
            let written = match path {
                Some(path) => {
                    config.save_to(&path)?;
                    path
                }
                None => config.save()?,
            };
            println!("Wrote default configuration to {}", written.display());
        }
        Some(Commands::Serve {
            host,
            port,
            interval_ms,
        }) => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if interval_ms.is_some() {
                config.server.background_interval_ms = interval_ms;
            }
            config.validate()?;
            serve(config)?;
        }
        None => {
            let config = load_config(cli.config.as_ref())?;
            serve(config)?;
        }
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn serve(config: gpuwatch::Config) -> Result<(), Box<dyn std::error::Error>> {
    let monitor = gpuwatch::GpuMonitor::from_config(&config);
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(gpuwatch::server::run_server(monitor, &config.server))?;
    Ok(())
}

#[cfg(feature = "cli")]
fn print_snapshot(snapshot: &gpuwatch::Snapshot) {
    println!("=== NVIDIA ===");
    println!("Driver: {}", snapshot.nvidia_info.driver_version);
    println!("CUDA: {}", snapshot.nvidia_info.cuda_version);

    println!("\n=== GPU Information ===");
    if snapshot.gpus.is_empty() {
        println!("No GPUs reported");
    }
    for gpu in &snapshot.gpus {
        let s = &gpu.sample;
        println!("\nGPU {}: {} ({})", s.index, s.name, s.compute_mode);
        println!("  Utilization: {:.0}%", s.utilization_pct);
        println!(
            "  Memory: {:.0} / {:.0} MiB ({:.1}%)",
            s.memory_used_mib,
            s.memory_total_mib,
            s.memory_usage_percent()
        );
        println!(
            "  Temperature: {:.0}°C (peak {:.0}°C, {:+.2}°C/min)",
            s.temperature_c, gpu.peak_temperature, gpu.temp_change_rate
        );
        println!("  Power: {:.1}W / {:.1}W", s.power_draw_w, s.power_limit_w);
        println!("  Fan: {:.0}%", s.fan_speed_pct);
    }

    println!("\n=== Processes ===");
    if snapshot.processes.is_empty() {
        println!("No compute processes");
    }
    for p in &snapshot.processes {
        println!(
            "  {:>7}  {:>8.0} MiB  {}  [{}]",
            p.pid, p.used_memory_mib, p.name, p.device_bus_id
        );
    }

    let burn = &snapshot.gpu_burn_metrics;
    if burn.running {
        println!(
            "\nStress test running for {:.1}s ({} errors)",
            burn.duration, burn.errors
        );
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features not enabled. Please compile with --features cli");
    std::process::exit(1);
}
