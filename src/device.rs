use std::path::Path;
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cancel::{sleep_cancellable, CancelToken};
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::monitor::{CleanupOptions, MemoryWatch, ResourceMonitor};
use crate::probe::ProcessProbe;
use crate::toolchain::resolve_vdk;
use crate::util::{run_command_capture, CommandOutput};

/// Parsed `vdk device status --json` payload. The device process is an
/// external authority; this is never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub running: bool,
    #[serde(default)]
    pub pid: Option<u32>,
}

/// Outcome of a graceful stop. A stop the SDK rejected is recoverable, so it
/// comes back as a report rather than an error.
#[derive(Debug, Clone)]
pub struct StopReport {
    pub accepted: bool,
    pub detail: Option<String>,
}

/// Seam over the SDK's subcommands.
pub trait SdkClient {
    fn device_status(&self) -> Result<CommandOutput>;
    fn device_start(&self) -> Result<CommandOutput>;
    fn device_stop(&self) -> Result<CommandOutput>;
    fn install(&self, variant: &str, project: &Path) -> Result<CommandOutput>;
    fn launch(&self, variant: &str, project: &Path) -> Result<CommandOutput>;
}

/// Real SDK client; every call goes through the cached toolchain resolution.
pub struct VdkCli;

impl VdkCli {
    fn invoke(&self, args: &[&str]) -> Result<CommandOutput> {
        let vdk = resolve_vdk()?;
        run_command_capture(&vdk.to_string_lossy(), args)
    }
}

impl SdkClient for VdkCli {
    fn device_status(&self) -> Result<CommandOutput> {
        self.invoke(&["device", "status", "--json"])
    }

    fn device_start(&self) -> Result<CommandOutput> {
        self.invoke(&["device", "start"])
    }

    fn device_stop(&self) -> Result<CommandOutput> {
        self.invoke(&["device", "stop"])
    }

    fn install(&self, variant: &str, project: &Path) -> Result<CommandOutput> {
        let project = project.to_string_lossy();
        self.invoke(&["install", "--variant", variant, "--project", &project])
    }

    fn launch(&self, variant: &str, project: &Path) -> Result<CommandOutput> {
        let project = project.to_string_lossy();
        self.invoke(&["launch", "--variant", variant, "--project", &project])
    }
}

/// Lifecycle operations over the one external virtual device. Holds no
/// authoritative device state of its own: every operation re-polls the SDK,
/// because the device process can die or be killed outside this tool.
pub struct DeviceManager<S, P> {
    sdk: S,
    monitor: Arc<ResourceMonitor<P>>,
    config: OrchestratorConfig,
}

impl<S, P> DeviceManager<S, P>
where
    S: SdkClient,
    P: ProcessProbe + Send + Sync + 'static,
{
    pub fn new(sdk: S, monitor: Arc<ResourceMonitor<P>>, config: OrchestratorConfig) -> Self {
        Self {
            sdk,
            monitor,
            config,
        }
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor<P>> {
        &self.monitor
    }

    pub fn status(&self) -> Result<DeviceStatus> {
        let output = self.sdk.device_status()?;
        if !output.success() {
            return Err(Error::command_failed(
                "vdk device status",
                output.describe_status(),
                output.stderr.trim(),
            ));
        }
        let mut status: DeviceStatus =
            serde_json::from_str(output.stdout.trim()).map_err(|err| Error::UnparseableResponse {
                command: "vdk device status".to_string(),
                reason: err.to_string(),
            })?;
        if !status.running {
            // A stale pid alongside running=false is possible and harmless.
            status.pid = None;
        }
        Ok(status)
    }

    /// Starts the device. Idempotent: an already-running device is success
    /// without issuing a start command. A memory watch runs for the whole
    /// startup window and is always cancelled and joined before returning.
    pub fn start(&self, token: &CancelToken) -> Result<()> {
        let status = self.status()?;
        if status.running {
            info!(
                target: "vdctl",
                "start: device already running (pid {:?}), nothing to do",
                status.pid
            );
            return Ok(());
        }

        self.monitor.cleanup_orphans(&CleanupOptions::default());
        self.monitor.stop_file_watcher();

        let watch = MemoryWatch::spawn(
            Arc::clone(&self.monitor),
            self.config.sampling_interval,
            token,
        );
        let result = self.start_inner(token);
        watch.finish();
        result
    }

    fn start_inner(&self, token: &CancelToken) -> Result<()> {
        let output = self.sdk.device_start()?;
        if !output.success() {
            return Err(Error::command_failed(
                "vdk device start",
                output.describe_status(),
                output.stderr.trim(),
            ));
        }

        sleep_cancellable(self.config.start_settle, token);
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let status = self.status()?;
        if status.running {
            info!(target: "vdctl", "start: device running (pid {:?})", status.pid);
            Ok(())
        } else {
            Err(Error::DeviceUnavailable(
                "start command completed but the device does not report running".to_string(),
            ))
        }
    }

    /// Stops the device. A stop the SDK rejects is returned as an
    /// unaccepted report, not an error; cleanup runs either way, forcing
    /// every orphan when the graceful path failed.
    pub fn stop(&self) -> Result<StopReport> {
        let output = self.sdk.device_stop()?;
        if output.success() {
            thread::sleep(self.config.stop_settle);
            self.monitor.cleanup_orphans(&CleanupOptions::default());
            Ok(StopReport {
                accepted: true,
                detail: None,
            })
        } else {
            warn!(
                target: "vdctl",
                "stop: vdk device stop failed ({}); forcing orphan cleanup",
                output.describe_status()
            );
            self.monitor.cleanup_orphans(&CleanupOptions {
                force_all: true,
                skip_device_processes: false,
            });
            Ok(StopReport {
                accepted: false,
                detail: Some(format!(
                    "{}: {}",
                    output.describe_status(),
                    output.stderr.trim()
                )),
            })
        }
    }

    pub fn restart(&self, token: &CancelToken) -> Result<()> {
        let report = self.stop()?;
        if !report.accepted {
            // Deliberate: the SDK's own status output is the authority on
            // whether a device is running, not the stop command's exit code.
            warn!(
                target: "vdctl",
                "restart: stop reported failure ({:?}); starting anyway",
                report.detail
            );
        }
        sleep_cancellable(self.config.restart_delay, token);
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.start(token)
    }

    pub fn ensure_running(&self, token: &CancelToken) -> Result<()> {
        if self.status()?.running {
            return Ok(());
        }
        self.start(token)
    }

    pub fn install(&self) -> Result<CommandOutput> {
        self.sdk
            .install(&self.config.build_variant, &self.config.project_dir)
    }

    pub fn launch(&self) -> Result<CommandOutput> {
        self.sdk
            .launch(&self.config.build_variant, &self.config.project_dir)
    }
}

#[cfg(test)]
impl<S, P> DeviceManager<S, P> {
    pub(crate) fn sdk_ref(&self) -> &S {
        &self.sdk
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::FakeSdk;
    use super::*;
    use crate::probe::testing::FakeProbe;

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            sampling_interval: Duration::from_millis(20),
            start_settle: Duration::ZERO,
            stop_settle: Duration::ZERO,
            restart_delay: Duration::ZERO,
            launcher_settle: Duration::ZERO,
            temp_dirs: Vec::new(),
            temp_patterns: Vec::new(),
            ..OrchestratorConfig::default()
        }
    }

    fn manager(sdk: FakeSdk) -> DeviceManager<FakeSdk, FakeProbe> {
        let config = test_config();
        let mut monitor = ResourceMonitor::new(FakeProbe::empty(), config.clone());
        monitor.disable_backoff();
        DeviceManager::new(sdk, Arc::new(monitor), config)
    }

    #[test]
    fn status_normalizes_stale_pid() {
        let manager = manager(FakeSdk::with_statuses(&[r#"{"running": false, "pid": 999}"#]));
        let status = manager.status().unwrap();
        assert!(!status.running);
        assert_eq!(status.pid, None);
    }

    #[test]
    fn malformed_status_payload_is_fatal() {
        let manager = manager(FakeSdk::with_statuses(&["not json at all"]));
        let err = manager.status().unwrap_err();
        assert!(matches!(err, Error::UnparseableResponse { .. }));
    }

    #[test]
    fn ensure_running_skips_start_when_device_is_up() {
        let manager = manager(FakeSdk::with_statuses(&[r#"{"running": true, "pid": 4821}"#]));
        let token = CancelToken::new();
        manager.ensure_running(&token).unwrap();
        assert_eq!(manager.sdk.calls(), vec!["status"]);
    }

    #[test]
    fn start_is_idempotent_for_running_device() {
        let manager = manager(FakeSdk::with_statuses(&[r#"{"running": true, "pid": 10}"#]));
        let token = CancelToken::new();
        manager.start(&token).unwrap();
        assert!(!manager.sdk.calls().contains(&"start".to_string()));
    }

    #[test]
    fn start_polls_again_after_the_settle_delay() {
        let manager = manager(FakeSdk::with_statuses(&[
            r#"{"running": false}"#,
            r#"{"running": true, "pid": 77}"#,
        ]));
        let token = CancelToken::new();
        manager.start(&token).unwrap();
        assert_eq!(manager.sdk.calls(), vec!["status", "start", "status"]);
    }

    #[test]
    fn start_fails_when_device_never_reports_running() {
        let manager = manager(FakeSdk::with_statuses(&[r#"{"running": false}"#]));
        let token = CancelToken::new();
        let err = manager.start(&token).unwrap_err();
        assert!(matches!(err, Error::DeviceUnavailable(_)));
    }

    #[test]
    fn failed_stop_is_a_report_not_an_error() {
        let mut sdk = FakeSdk::with_statuses(&[r#"{"running": true}"#]);
        sdk.stop_ok = false;
        let manager = manager(sdk);
        let report = manager.stop().unwrap();
        assert!(!report.accepted);
        assert!(report.detail.unwrap().contains("stop rejected"));
    }

    #[test]
    fn restart_starts_even_after_rejected_stop() {
        let mut sdk = FakeSdk::with_statuses(&[
            r#"{"running": false}"#,
            r#"{"running": true, "pid": 5}"#,
        ]);
        sdk.stop_ok = false;
        let manager = manager(sdk);
        let token = CancelToken::new();
        manager.restart(&token).unwrap();
        let calls = manager.sdk.calls();
        assert!(calls.contains(&"stop".to_string()));
        assert!(calls.contains(&"start".to_string()));
    }
}
