use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::OrchestratorConfig;
use crate::device::{DeviceManager, SdkClient};
use crate::error::Result;
use crate::monitor::{CleanupOptions, MemoryWatch};
use crate::probe::ProcessProbe;
use crate::util::{run_command_capture, CommandOutput};
use crate::project::BUILD_SCRIPT;

pub const PACKAGE_EXTENSION: &str = "vpkg";

/// Seam over the package-manager build script invocation.
pub trait BuildRunner {
    fn run_build(&self, project: &Path) -> Result<CommandOutput>;
}

/// Invokes `npm run build:device` in the project root.
pub struct NpmBuildRunner;

impl BuildRunner for NpmBuildRunner {
    fn run_build(&self, project: &Path) -> Result<CommandOutput> {
        let project_arg = project.to_string_lossy();
        run_command_capture("npm", &["run", BUILD_SCRIPT, "--prefix", &project_arg])
    }
}

#[derive(Debug, Clone)]
pub struct BuildResult {
    pub success: bool,
    pub error_message: Option<String>,
    pub duration: Duration,
    pub log_lines: Vec<String>,
    pub build_info_path: Option<PathBuf>,
    pub artifact_paths: Vec<PathBuf>,
}

impl BuildResult {
    fn new() -> Self {
        Self {
            success: true,
            error_message: None,
            duration: Duration::ZERO,
            log_lines: Vec::new(),
            build_info_path: None,
            artifact_paths: Vec::new(),
        }
    }
}

/// Strict build -> install -> launch pipeline. The first failing stage halts
/// the pipeline; later stages are never attempted.
pub struct BuildPipeline<S, P, B> {
    device: DeviceManager<S, P>,
    runner: B,
    config: OrchestratorConfig,
}

impl<S, P, B> BuildPipeline<S, P, B>
where
    S: SdkClient,
    P: ProcessProbe + Send + Sync + 'static,
    B: BuildRunner,
{
    pub fn new(device: DeviceManager<S, P>, runner: B, config: OrchestratorConfig) -> Self {
        Self {
            device,
            runner,
            config,
        }
    }

    pub fn run(&self, token: &CancelToken) -> BuildResult {
        let started = Instant::now();
        let mut result = BuildResult::new();
        if let Err(message) = self.execute(token, &mut result) {
            warn!(target: "vdctl", "pipeline failed: {}", message);
            result.success = false;
            result.error_message = Some(message);
        }
        result.duration = started.elapsed();
        result
    }

    fn execute(&self, token: &CancelToken, result: &mut BuildResult) -> Result<(), String> {
        self.prepare().map_err(|err| format!("pre-build setup failed: {err}"))?;
        self.build_stage(token, result)?;
        self.install_stage(token, result)?;
        self.launch_stage(result)
    }

    /// A stale crash handler can interfere with the build tool's file
    /// watching, so the watcher is stopped, its config ensured, and current
    /// orphans reaped before any build starts.
    fn prepare(&self) -> Result<()> {
        let monitor = self.device.monitor();
        monitor.stop_file_watcher();

        let watcher_config = self.config.watcher_config_path();
        if !watcher_config.exists() {
            debug!(
                target: "vdctl",
                "prepare: creating empty watcher config {}",
                watcher_config.display()
            );
            fs::write(&watcher_config, b"")?;
        }

        monitor.cleanup_orphans(&CleanupOptions::default());
        Ok(())
    }

    fn build_stage(&self, token: &CancelToken, result: &mut BuildResult) -> Result<(), String> {
        info!(target: "vdctl", "build: running {} script", BUILD_SCRIPT);
        let watch = MemoryWatch::spawn(
            Arc::clone(self.device.monitor()),
            self.config.sampling_interval,
            token,
        );
        let output = self.runner.run_build(&self.config.project_dir);
        watch.finish();

        let output = output.map_err(|err| format!("build invocation failed: {err}"))?;
        result.log_lines = output.stdout_lines();
        result
            .log_lines
            .extend(output.stderr.lines().map(str::to_string));
        if !output.success() {
            return Err(format!(
                "build script failed ({})",
                output.describe_status()
            ));
        }

        let build_info = self.config.build_info_path();
        if build_info.is_file() {
            result.build_info_path = Some(build_info);
        }
        result.artifact_paths = collect_packages(&self.config.package_dir());
        info!(
            target: "vdctl",
            "build: completed with {} package artifact(s)",
            result.artifact_paths.len()
        );
        Ok(())
    }

    fn install_stage(&self, token: &CancelToken, result: &mut BuildResult) -> Result<(), String> {
        self.device
            .ensure_running(token)
            .map_err(|err| format!("install requires a running device: {err}"))?;

        if result.build_info_path.is_none() {
            return Err(format!(
                "no build manifest at {}; run build first",
                self.config.build_info_path().display()
            ));
        }

        info!(target: "vdctl", "install: installing {} build", self.config.build_variant);
        let output = self
            .device
            .install()
            .map_err(|err| format!("install invocation failed: {err}"))?;
        if !output.success() {
            return Err(format!(
                "install failed ({}): {}",
                output.describe_status(),
                output.stderr.trim()
            ));
        }
        Ok(())
    }

    fn launch_stage(&self, _result: &mut BuildResult) -> Result<(), String> {
        let status = self
            .device
            .status()
            .map_err(|err| format!("launch requires a running device: {err}"))?;
        if !status.running {
            return Err("launch requires a running device".to_string());
        }

        info!(target: "vdctl", "launch: launching {} build", self.config.build_variant);
        let output = self
            .device
            .launch()
            .map_err(|err| format!("launch invocation failed: {err}"))?;
        if !output.success() {
            return Err(format!(
                "launch failed ({}): {}",
                output.describe_status(),
                output.stderr.trim()
            ));
        }
        Ok(())
    }
}

/// Recursive scan for package artifacts under `dir`.
fn collect_packages(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(collect_packages(&path));
        } else if path.extension().is_some_and(|ext| ext == PACKAGE_EXTENSION) {
            found.push(path);
        }
    }
    found.sort();
    found
}
