use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use tracing::{debug, error, info, warn};

use crate::cancel::{sleep_cancellable, CancelToken};
use crate::config::{patterns, OrchestratorConfig};
use crate::error::{Error, Result};
use crate::probe::{extract_pid, is_process_older_than, match_all, ProcessProbe, Signal};
use crate::probe::DEFAULT_AGE_THRESHOLD_MINUTES;
use crate::util::run_command_capture;

pub const LOW_MEMORY_MB: u64 = 500;
pub const CRITICAL_MEMORY_MB: u64 = 200;
const BYTES_PER_MB: u64 = 1024 * 1024;
const MAX_RECLAIM_PASSES: u32 = 3;

/// Signal strength for a reclamation pass: the first pass asks nicely, every
/// later pass does not.
pub fn signal_for_pass(pass: u32) -> Signal {
    if pass == 0 {
        Signal::Term
    } else {
        Signal::Kill
    }
}

/// Post-signal settle time for a reclamation pass, shrinking as passes
/// escalate but never below one second.
pub fn pass_backoff(pass: u32) -> Duration {
    let millis = 3000u64.saturating_sub(u64::from(pass) * 1000).max(1000);
    Duration::from_millis(millis)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupOptions {
    /// Kill every matching target regardless of age.
    pub force_all: bool,
    /// Leave the device launcher alone (a device must keep running).
    pub skip_device_processes: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CleanupOutcome {
    pub initial_count: usize,
    pub final_count: usize,
}

impl CleanupOutcome {
    pub fn fully_reclaimed(&self) -> bool {
        self.final_count == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub free_mb: u64,
    pub active_mb: u64,
    pub inactive_mb: u64,
    pub captured_at: SystemTime,
}

impl MemorySample {
    /// Free plus inactive: inactive pages are reclaimable, so this is the
    /// pressure signal rather than free alone.
    pub fn available_mb(&self) -> u64 {
        self.free_mb + self.inactive_mb
    }

    pub fn low_memory(&self) -> bool {
        self.available_mb() < LOW_MEMORY_MB
    }

    pub fn critical_memory(&self) -> bool {
        self.available_mb() < CRITICAL_MEMORY_MB
    }
}

/// Seam over the host's memory counters, so the sampling loop can be
/// exercised with scripted samples the way `ProcessProbe` is with fixture
/// process lines.
pub trait MemorySampler: Send + Sync {
    fn sample(&self) -> Result<MemorySample>;
}

pub struct ResourceMonitor<P> {
    probe: P,
    config: OrchestratorConfig,
    sampler: Box<dyn MemorySampler>,
    backoff: fn(u32) -> Duration,
}

impl<P: ProcessProbe> ResourceMonitor<P> {
    pub fn new(probe: P, config: OrchestratorConfig) -> Self {
        Self::with_sampler(probe, config, Box::new(HostMemory::new()))
    }

    pub fn with_sampler(
        probe: P,
        config: OrchestratorConfig,
        sampler: Box<dyn MemorySampler>,
    ) -> Self {
        Self {
            probe,
            config,
            sampler,
            backoff: pass_backoff,
        }
    }

    #[cfg(test)]
    pub(crate) fn disable_backoff(&mut self) {
        self.backoff = |_| Duration::ZERO;
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Escalating, multi-category orphan cleanup. Best-effort throughout:
    /// this never fails, it only reports how many target processes were seen
    /// and how many survived.
    pub fn cleanup_orphans(&self, options: &CleanupOptions) -> CleanupOutcome {
        for pattern in [patterns::TRACKER, patterns::TELEMETRY, patterns::STALE_SDK] {
            self.probe.pattern_kill(pattern, Signal::Kill);
        }

        let initial_count = self.target_pids().len();
        if initial_count == 0 {
            debug!(target: "vdctl", "cleanup_orphans: no crash-handler orphans; nothing to do");
            return CleanupOutcome {
                initial_count: 0,
                final_count: 0,
            };
        }
        info!(
            target: "vdctl",
            "cleanup_orphans: found {} crash-handler processes (force_all={}, skip_device={})",
            initial_count,
            options.force_all,
            options.skip_device_processes
        );

        if !options.skip_device_processes {
            self.stop_device_launchers();
        }

        let mut final_count = initial_count;
        for pass in 0..MAX_RECLAIM_PASSES {
            // Re-list every pass: killed handlers can respawn in between.
            let remaining = self.target_pids();
            if remaining.is_empty() {
                final_count = 0;
                break;
            }
            final_count = remaining.len();

            let candidates: Vec<i32> = remaining
                .into_iter()
                .filter(|pid| {
                    options.force_all
                        || is_process_older_than(&self.probe, *pid, DEFAULT_AGE_THRESHOLD_MINUTES)
                })
                .collect();
            if candidates.is_empty() {
                debug!(
                    target: "vdctl",
                    "cleanup_orphans: pass {} has no kill candidates ({} too young to confirm)",
                    pass,
                    final_count
                );
                continue;
            }

            let signal = signal_for_pass(pass);
            info!(
                target: "vdctl",
                "cleanup_orphans: pass {} signaling {:?} with {:?}",
                pass,
                candidates,
                signal
            );
            self.probe.send_signal(&candidates, signal);
            thread::sleep((self.backoff)(pass));
        }

        if final_count != 0 {
            final_count = self.target_pids().len();
        }
        if final_count > 0 {
            warn!(
                target: "vdctl",
                "cleanup_orphans: {} crash-handler processes survived all passes",
                final_count
            );
        }

        self.remove_temp_artifacts();
        CleanupOutcome {
            initial_count,
            final_count,
        }
    }

    /// Stops the `watchman` file watcher if one is running. Best-effort.
    pub fn stop_file_watcher(&self) {
        let lines = self.probe.list_processes();
        if match_all(&lines, &[patterns::FILE_WATCHER]).is_empty() {
            return;
        }
        info!(target: "vdctl", "stop_file_watcher: stopping running file watcher");
        self.probe.pattern_kill(patterns::FILE_WATCHER, Signal::Term);
    }

    fn target_pids(&self) -> Vec<i32> {
        let lines = self.probe.list_processes();
        match_all(&lines, &patterns::CRASH_HANDLER)
            .into_iter()
            .filter_map(extract_pid)
            .collect()
    }

    fn stop_device_launchers(&self) {
        let lines = self.probe.list_processes();
        let launchers: Vec<i32> = match_all(&lines, &[patterns::DEVICE_LAUNCHER])
            .into_iter()
            .filter_map(extract_pid)
            .collect();
        if launchers.is_empty() {
            return;
        }

        info!(
            target: "vdctl",
            "stop_device_launchers: stopping launcher processes {:?}",
            launchers
        );
        self.probe.send_signal(&launchers, Signal::Term);
        thread::sleep(self.config.launcher_settle);

        let lines = self.probe.list_processes();
        let survivors: Vec<i32> = match_all(&lines, &[patterns::DEVICE_LAUNCHER])
            .into_iter()
            .filter_map(extract_pid)
            .collect();
        if survivors.is_empty() {
            return;
        }
        warn!(
            target: "vdctl",
            "stop_device_launchers: launchers {:?} survived SIGTERM, escalating",
            survivors
        );
        self.probe.send_signal(&survivors, Signal::Kill);

        let lines = self.probe.list_processes();
        if !match_all(&lines, &[patterns::DEVICE_LAUNCHER]).is_empty() {
            self.probe.pattern_kill(patterns::DEVICE_LAUNCHER, Signal::Kill);
        }
    }

    /// Removes known temp files and directories. Each path is handled on its
    /// own thread and every failure is swallowed individually.
    fn remove_temp_artifacts(&self) {
        let mut targets: Vec<PathBuf> = self.config.temp_dirs.clone();
        for pattern in &self.config.temp_patterns {
            let Ok(entries) = fs::read_dir(&pattern.dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if name.starts_with(&pattern.prefix) && name.ends_with(&pattern.suffix) {
                    targets.push(entry.path());
                }
            }
        }

        let handles: Vec<JoinHandle<()>> = targets
            .into_iter()
            .map(|path| {
                thread::spawn(move || {
                    let result = if path.is_dir() {
                        fs::remove_dir_all(&path)
                    } else {
                        fs::remove_file(&path)
                    };
                    match result {
                        Ok(()) => debug!(target: "vdctl", "remove_temp_artifacts: removed {}", path.display()),
                        Err(err) => debug!(
                            target: "vdctl",
                            "remove_temp_artifacts: ignoring {}: {}",
                            path.display(),
                            err
                        ),
                    }
                })
            })
            .collect();
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// One memory-pressure sample from the configured sampler.
    pub fn memory_sample(&self) -> Result<MemorySample> {
        self.sampler.sample()
    }

    /// Lazy, unbounded sequence of samples, one per `interval`, until the
    /// token cancels. A failed sample is logged and skipped; only
    /// cancellation ends the stream.
    pub fn memory_stream(&self, interval: Duration, token: CancelToken) -> MemoryStream<'_, P> {
        MemoryStream {
            monitor: self,
            interval,
            token,
            first: true,
        }
    }
}

fn page_count(lines: &[String], label: &str) -> Result<u64> {
    for line in lines {
        let Some(rest) = line.strip_prefix(label) else {
            continue;
        };
        let Some(value) = rest.trim_start().strip_prefix(':') else {
            continue;
        };
        return value
            .trim()
            .trim_end_matches('.')
            .parse()
            .map_err(|_| Error::UnparseableResponse {
                command: "vm_stat".to_string(),
                reason: format!("bad page count for {:?}: {:?}", label, value.trim()),
            });
    }
    Err(Error::UnparseableResponse {
        command: "vm_stat".to_string(),
        reason: format!("missing counter {:?}", label),
    })
}

/// Production sampler over the host's virtual-memory reporting tools.
pub struct HostMemory {
    page_size: OnceLock<u64>,
}

impl HostMemory {
    pub fn new() -> Self {
        Self {
            page_size: OnceLock::new(),
        }
    }

    fn page_size(&self) -> Result<u64> {
        if let Some(size) = self.page_size.get() {
            return Ok(*size);
        }
        let output = run_command_capture("sysctl", &["-n", "hw.pagesize"]).map_err(|err| {
            match err {
                Error::ToolNotFound { .. } => {
                    Error::PlatformUnsupported("sysctl not available".to_string())
                }
                other => other,
            }
        })?;
        if !output.success() {
            return Err(Error::PlatformUnsupported(format!(
                "sysctl hw.pagesize failed ({})",
                output.describe_status()
            )));
        }
        let size: u64 = output.stdout.trim().parse().map_err(|_| Error::UnparseableResponse {
            command: "sysctl -n hw.pagesize".to_string(),
            reason: format!("expected an integer, got {:?}", output.stdout.trim()),
        })?;
        Ok(*self.page_size.get_or_init(|| size))
    }
}

impl Default for HostMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for HostMemory {
    fn sample(&self) -> Result<MemorySample> {
        let page_size = self.page_size()?;
        let output = run_command_capture("vm_stat", &[]).map_err(|err| match err {
            Error::ToolNotFound { .. } => Error::PlatformUnsupported(
                "vm_stat not available; memory sampling requires macOS".to_string(),
            ),
            other => other,
        })?;
        if !output.success() {
            return Err(Error::command_failed(
                "vm_stat",
                output.describe_status(),
                output.stderr.trim(),
            ));
        }

        let lines = output.stdout_lines();
        let pages_to_mb = |pages: u64| pages.saturating_mul(page_size) / BYTES_PER_MB;
        Ok(MemorySample {
            free_mb: pages_to_mb(page_count(&lines, "Pages free")?),
            active_mb: pages_to_mb(page_count(&lines, "Pages active")?),
            inactive_mb: pages_to_mb(page_count(&lines, "Pages inactive")?),
            captured_at: SystemTime::now(),
        })
    }
}

pub struct MemoryStream<'a, P> {
    monitor: &'a ResourceMonitor<P>,
    interval: Duration,
    token: CancelToken,
    first: bool,
}

impl<P: ProcessProbe> Iterator for MemoryStream<'_, P> {
    type Item = MemorySample;

    fn next(&mut self) -> Option<MemorySample> {
        loop {
            if !self.first {
                sleep_cancellable(self.interval, &self.token);
            }
            self.first = false;
            if self.token.is_cancelled() {
                return None;
            }
            match self.monitor.memory_sample() {
                Ok(sample) => return Some(sample),
                Err(err) => {
                    warn!(target: "vdctl", "memory_stream: skipping failed sample: {}", err);
                }
            }
        }
    }
}

/// Background memory-pressure observer used while a long-running external
/// command is in flight. Strictly observational: it only escalates log
/// severity. Its token is a child of the owning operation's token and the
/// owner must call `finish()` (or drop it) before returning, so the thread
/// never outlives the operation it was watching.
pub struct MemoryWatch {
    token: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl MemoryWatch {
    pub fn spawn<P>(
        monitor: Arc<ResourceMonitor<P>>,
        interval: Duration,
        parent: &CancelToken,
    ) -> Self
    where
        P: ProcessProbe + Send + Sync + 'static,
    {
        let token = parent.child();
        let stream_token = token.clone();
        let handle = thread::spawn(move || {
            for sample in monitor.memory_stream(interval, stream_token) {
                if sample.critical_memory() {
                    error!(
                        target: "vdctl",
                        "memory critical: {} MB available (free {} MB, inactive {} MB)",
                        sample.available_mb(),
                        sample.free_mb,
                        sample.inactive_mb
                    );
                } else if sample.low_memory() {
                    warn!(
                        target: "vdctl",
                        "memory low: {} MB available",
                        sample.available_mb()
                    );
                } else {
                    debug!(
                        target: "vdctl",
                        "memory ok: {} MB available",
                        sample.available_mb()
                    );
                }
            }
        });
        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Cancels the watch and joins the thread.
    pub fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MemoryWatch {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Instant;

    use super::*;
    use crate::probe::testing::{FakeProbe, KillRecord};

    /// Serves scripted sample results in order; once exhausted it keeps
    /// returning the fallback (a healthy sample, or a failure if none).
    struct FakeSampler {
        responses: Mutex<Vec<Result<MemorySample>>>,
        fallback: Option<MemorySample>,
    }

    impl FakeSampler {
        fn scripted(responses: Vec<Result<MemorySample>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                fallback: None,
            }
        }

        fn healthy() -> Self {
            Self {
                responses: Mutex::new(Vec::new()),
                fallback: Some(sample_mb(800, 100, 200)),
            }
        }
    }

    impl MemorySampler for FakeSampler {
        fn sample(&self) -> Result<MemorySample> {
            let mut responses = self.responses.lock().unwrap();
            if !responses.is_empty() {
                return responses.remove(0);
            }
            match self.fallback {
                Some(sample) => Ok(sample),
                None => Err(Error::PlatformUnsupported("scripted samples exhausted".to_string())),
            }
        }
    }

    fn sample_mb(free: u64, active: u64, inactive: u64) -> MemorySample {
        MemorySample {
            free_mb: free,
            active_mb: active,
            inactive_mb: inactive,
            captured_at: SystemTime::now(),
        }
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            launcher_settle: Duration::ZERO,
            temp_dirs: Vec::new(),
            temp_patterns: Vec::new(),
            ..OrchestratorConfig::default()
        }
    }

    fn monitor_with(probe: FakeProbe) -> ResourceMonitor<FakeProbe> {
        let mut monitor = ResourceMonitor::new(probe, fast_config());
        monitor.disable_backoff();
        monitor
    }

    #[test]
    fn escalation_signal_table() {
        assert_eq!(signal_for_pass(0), Signal::Term);
        assert_eq!(signal_for_pass(1), Signal::Kill);
        assert_eq!(signal_for_pass(2), Signal::Kill);
    }

    #[test]
    fn backoff_shrinks_with_floor() {
        assert_eq!(pass_backoff(0), Duration::from_millis(3000));
        assert_eq!(pass_backoff(1), Duration::from_millis(2000));
        assert_eq!(pass_backoff(2), Duration::from_millis(1000));
        assert_eq!(pass_backoff(5), Duration::from_millis(1000));
    }

    #[test]
    fn cleanup_with_no_targets_sends_no_signals() {
        let monitor = monitor_with(FakeProbe::new(vec![FakeProbe::process(
            99,
            "unrelated-daemon",
            "10:00",
        )]));
        let outcome = monitor.cleanup_orphans(&CleanupOptions::default());
        assert_eq!(outcome.initial_count, 0);
        assert_eq!(outcome.final_count, 0);
        let pid_kills: Vec<_> = monitor
            .probe()
            .kills()
            .into_iter()
            .filter(|k| matches!(k, KillRecord::Signal(..)))
            .collect();
        assert!(pid_kills.is_empty(), "no pid-directed kills expected: {pid_kills:?}");
    }

    #[test]
    fn cleanup_reaps_old_handlers_with_term_first() {
        let monitor = monitor_with(FakeProbe::new(vec![
            FakeProbe::process(301, "crashpad_handler --annotation vdk", "02:10:00"),
            FakeProbe::process(302, "crashpad_handler --annotation vdk", "05:00"),
        ]));
        let outcome = monitor.cleanup_orphans(&CleanupOptions::default());
        assert_eq!(outcome.initial_count, 2);
        // Only the old handler is a candidate; the young one survives.
        assert_eq!(outcome.final_count, 1);
        assert!(monitor
            .probe()
            .kills()
            .contains(&KillRecord::Signal(vec![301], Signal::Term)));
    }

    #[test]
    fn force_all_kills_young_handlers_too() {
        let monitor = monitor_with(FakeProbe::new(vec![FakeProbe::process(
            310,
            "crashpad_handler --annotation vdk",
            "00:30",
        )]));
        let outcome = monitor.cleanup_orphans(&CleanupOptions {
            force_all: true,
            skip_device_processes: false,
        });
        assert!(outcome.fully_reclaimed());
    }

    #[test]
    fn pass_loop_is_bounded_under_respawn() {
        let monitor = monitor_with(FakeProbe::respawning(vec![FakeProbe::process(
            400,
            "crashpad_handler --annotation vdk",
            "03:00:00",
        )]));
        let outcome = monitor.cleanup_orphans(&CleanupOptions::default());
        assert_eq!(outcome.final_count, 1);
        let signal_passes = monitor
            .probe()
            .kills()
            .into_iter()
            .filter(|k| matches!(k, KillRecord::Signal(..)))
            .count();
        assert_eq!(signal_passes, 3, "exactly one signal per bounded pass");
    }

    #[test]
    fn launcher_stop_is_skipped_when_device_must_keep_running() {
        let monitor = monitor_with(FakeProbe::new(vec![
            FakeProbe::process(500, "vdk-device --instance 0", "10:00"),
            FakeProbe::process(501, "crashpad_handler --annotation vdk", "02:00:00"),
        ]));
        monitor.cleanup_orphans(&CleanupOptions {
            force_all: false,
            skip_device_processes: true,
        });
        for kill in monitor.probe().kills() {
            if let KillRecord::Signal(pids, _) = kill {
                assert!(!pids.contains(&500), "launcher must not be signaled");
            }
        }
    }

    #[test]
    fn launcher_is_stopped_before_reclaim_passes() {
        let monitor = monitor_with(FakeProbe::new(vec![
            FakeProbe::process(500, "vdk-device --instance 0", "10:00"),
            FakeProbe::process(501, "crashpad_handler --annotation vdk", "02:00:00"),
        ]));
        monitor.cleanup_orphans(&CleanupOptions::default());
        let kills = monitor.probe().kills();
        let launcher_idx = kills
            .iter()
            .position(|k| matches!(k, KillRecord::Signal(pids, Signal::Term) if pids.contains(&500)))
            .expect("launcher should be stopped");
        let handler_idx = kills
            .iter()
            .position(|k| matches!(k, KillRecord::Signal(pids, _) if pids.contains(&501)))
            .expect("handler should be signaled");
        assert!(launcher_idx < handler_idx);
    }

    #[test]
    fn sample_derived_fields_hold() {
        let sample = MemorySample {
            free_mb: 120,
            active_mb: 900,
            inactive_mb: 300,
            captured_at: SystemTime::now(),
        };
        assert_eq!(sample.available_mb(), 420);
        assert!(sample.low_memory());
        assert!(!sample.critical_memory());

        let critical = MemorySample {
            free_mb: 50,
            inactive_mb: 100,
            ..sample
        };
        assert_eq!(critical.available_mb(), 150);
        assert!(critical.critical_memory());

        let healthy = MemorySample {
            free_mb: 400,
            inactive_mb: 200,
            ..sample
        };
        assert!(!healthy.low_memory());
    }

    #[test]
    fn vm_stat_output_parses_page_counts() {
        let lines: Vec<String> = [
            "Mach Virtual Memory Statistics: (page size of 16384 bytes)",
            "Pages free:                              12345.",
            "Pages active:                            23456.",
            "Pages inactive:                           7890.",
            "Pages speculative:                         111.",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(page_count(&lines, "Pages free").unwrap(), 12345);
        assert_eq!(page_count(&lines, "Pages inactive").unwrap(), 7890);
        let err = page_count(&lines, "Pages wired down").unwrap_err();
        assert!(matches!(err, Error::UnparseableResponse { .. }));
    }

    #[test]
    fn stream_skips_failed_samples_until_one_succeeds() {
        let sampler = FakeSampler::scripted(vec![
            Err(Error::PlatformUnsupported("counters busy".to_string())),
            Err(Error::command_failed("vm_stat", "exit code 1", "boom")),
            Ok(sample_mb(800, 100, 200)),
        ]);
        let monitor =
            ResourceMonitor::with_sampler(FakeProbe::empty(), fast_config(), Box::new(sampler));
        let mut stream = monitor.memory_stream(Duration::from_millis(1), CancelToken::new());
        let sample = stream
            .next()
            .expect("two failed samples must not terminate the stream");
        assert_eq!(sample.free_mb, 800);
    }

    #[test]
    fn stream_with_failing_sampler_ends_only_on_cancellation() {
        let monitor = ResourceMonitor::with_sampler(
            FakeProbe::empty(),
            fast_config(),
            Box::new(FakeSampler::scripted(Vec::new())),
        );
        let token = CancelToken::new();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            canceller.cancel();
        });
        let mut stream = monitor.memory_stream(Duration::from_millis(1), token);
        assert!(stream.next().is_none());
        handle.join().unwrap();
    }

    #[test]
    fn memory_watch_joins_promptly_after_cancel() {
        let monitor = Arc::new(ResourceMonitor::with_sampler(
            FakeProbe::empty(),
            fast_config(),
            Box::new(FakeSampler::healthy()),
        ));
        let parent = CancelToken::new();
        let interval = Duration::from_millis(50);
        let watch = MemoryWatch::spawn(Arc::clone(&monitor), interval, &parent);
        thread::sleep(Duration::from_millis(120));
        let start = Instant::now();
        watch.finish();
        assert!(
            start.elapsed() < Duration::from_secs(1),
            "watch should stop within roughly one interval"
        );
        assert!(!parent.is_cancelled(), "owner token must stay live");
    }

    #[test]
    fn memory_watch_stops_when_parent_cancels() {
        let monitor = Arc::new(ResourceMonitor::with_sampler(
            FakeProbe::empty(),
            fast_config(),
            Box::new(FakeSampler::healthy()),
        ));
        let parent = CancelToken::new();
        let watch = MemoryWatch::spawn(Arc::clone(&monitor), Duration::from_millis(50), &parent);
        parent.cancel();
        let start = Instant::now();
        watch.finish();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
