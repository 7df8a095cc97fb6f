use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use vdctl::monitor::CleanupOptions;
use vdctl::{
    locate_project, toolchain, BuildPipeline, CancelToken, DeviceManager, HostProbe,
    NpmBuildRunner, OrchestratorConfig, ResourceMonitor, VdkCli,
};

const LOG_ENV: &str = "VDCTL_LOG";

#[derive(Debug, Parser)]
#[command(name = "vdctl", about = "Development-loop orchestrator for the vdk virtual device", version)]
struct Cli {
    /// Project directory; defaults to the nearest manifest above the cwd.
    #[arg(long, env = "VDCTL_PROJECT")]
    project: Option<PathBuf>,
    #[arg(long, env = "VDCTL_VARIANT", default_value = "debug")]
    variant: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand)]
    Device(DeviceCommands),
    /// Build, install, and launch on the virtual device.
    Run,
    /// Reap orphaned SDK helper processes and temp files.
    Cleanup {
        /// Kill matching processes regardless of age.
        #[arg(long)]
        force: bool,
        /// Leave the device launcher running.
        #[arg(long)]
        keep_device: bool,
    },
    /// Sample host memory pressure.
    Memory {
        /// Keep sampling until interrupted.
        #[arg(long)]
        watch: bool,
    },
    /// Diagnose the vdk toolchain installation.
    Doctor,
}

#[derive(Debug, Subcommand)]
enum DeviceCommands {
    /// Show the device status as reported by the SDK.
    Status,
    /// Start the virtual device if it is not already running.
    Start,
    /// Stop the virtual device and clean up after it.
    Stop,
    /// Stop, settle, and start again.
    Restart,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let config = build_config(&cli)?;
    let monitor = Arc::new(ResourceMonitor::new(HostProbe, config.clone()));
    let device = DeviceManager::new(VdkCli, Arc::clone(&monitor), config.clone());
    let token = CancelToken::new();

    match cli.command {
        Commands::Device(command) => match command {
            DeviceCommands::Status => {
                let status = device.status()?;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            DeviceCommands::Start => {
                device.start(&token)?;
                println!("device running");
            }
            DeviceCommands::Stop => {
                let report = device.stop()?;
                if report.accepted {
                    println!("device stopped");
                } else {
                    eprintln!(
                        "stop was not accepted: {}",
                        report.detail.unwrap_or_default()
                    );
                    process::exit(1);
                }
            }
            DeviceCommands::Restart => {
                device.restart(&token)?;
                println!("device restarted");
            }
        },
        Commands::Run => {
            let pipeline = BuildPipeline::new(device, NpmBuildRunner, config);
            let result = pipeline.run(&token);
            for line in &result.log_lines {
                println!("{line}");
            }
            if result.success {
                println!(
                    "pipeline succeeded in {:.1?} with {} artifact(s)",
                    result.duration,
                    result.artifact_paths.len()
                );
            } else {
                eprintln!(
                    "pipeline failed after {:.1?}: {}",
                    result.duration,
                    result.error_message.as_deref().unwrap_or("unknown error")
                );
                process::exit(1);
            }
        }
        Commands::Cleanup { force, keep_device } => {
            let outcome = monitor.cleanup_orphans(&CleanupOptions {
                force_all: force,
                skip_device_processes: keep_device,
            });
            println!(
                "cleanup: {} orphan(s) found, {} remaining",
                outcome.initial_count, outcome.final_count
            );
        }
        Commands::Memory { watch } => {
            if watch {
                for sample in monitor.memory_stream(config.sampling_interval, token.clone()) {
                    print_sample(&sample);
                }
            } else {
                let sample = monitor.memory_sample()?;
                print_sample(&sample);
            }
        }
        Commands::Doctor => {
            let path = toolchain::resolve_vdk().context(
                "vdk could not be located; install the SDK or set VDK_HOME to its install root",
            )?;
            println!("vdk: {}", path.display());
            println!("version: {}", toolchain::vdk_version()?);
            println!(
                "installation: {}",
                if toolchain::installation_valid() {
                    "ok"
                } else {
                    "incomplete (expected bin/ and lib/ in the install root)"
                }
            );
        }
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<OrchestratorConfig> {
    let project_dir = match &cli.project {
        Some(dir) => dir.clone(),
        None => {
            let cwd = env::current_dir().context("reading current directory")?;
            match locate_project(&cwd) {
                Ok(root) => root.path().to_path_buf(),
                // Device and diagnostic commands work fine without a project.
                Err(_) => cwd,
            }
        }
    };
    let mut config = OrchestratorConfig::for_project(project_dir);
    config.build_variant = cli.variant.clone();
    Ok(config)
}

fn print_sample(sample: &vdctl::MemorySample) {
    let pressure = if sample.critical_memory() {
        " [critical]"
    } else if sample.low_memory() {
        " [low]"
    } else {
        ""
    };
    println!(
        "free {} MB, active {} MB, inactive {} MB, available {} MB{}",
        sample.free_mb,
        sample.active_mb,
        sample.inactive_mb,
        sample.available_mb(),
        pressure
    );
}

fn init_logging() {
    let level = match env::var(LOG_ENV).as_deref() {
        Ok("debug") => "debug",
        Ok("info") => "info",
        Ok("warn") => "warn",
        Ok("error") => "error",
        _ => "warn",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vdctl={level}")));
    fmt().with_env_filter(filter).init();
}
