use std::path::PathBuf;
use std::time::Duration;

/// Fixed name patterns for the helper processes the cleanup pass recognizes.
/// Matching is substring-based against the raw process listing.
pub mod patterns {
    /// Usage-tracking helper shipped with the SDK.
    pub const TRACKER: &str = "vdk-tracker";
    /// Telemetry uploader shipped with the SDK.
    pub const TELEMETRY: &str = "vdk-telemetry";
    /// SDK builds from the 0.9 line leak crash handlers on exit; they are
    /// terminated on sight.
    pub const STALE_SDK: &str = "vdk-core/0.9.";
    /// Crash-handler orphans. Both substrings must match so unrelated
    /// crashpad hosts (browsers) are left alone.
    pub const CRASH_HANDLER: [&str; 2] = ["crashpad_handler", "vdk"];
    /// Parent device launcher; killing it is the clean path to reaping its
    /// crash handlers.
    pub const DEVICE_LAUNCHER: &str = "vdk-device";
    /// File watcher the build tool shares with the device runtime.
    pub const FILE_WATCHER: &str = "watchman";
}

/// Files and directories matched by a fixed prefix/suffix inside one
/// directory, expanded at cleanup time.
#[derive(Debug, Clone)]
pub struct TempPattern {
    pub dir: PathBuf,
    pub prefix: String,
    pub suffix: String,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub project_dir: PathBuf,
    pub build_variant: String,
    pub sampling_interval: Duration,
    /// Wait after `vdk device start` before re-polling status.
    pub start_settle: Duration,
    /// Wait after a successful `vdk device stop` before cleanup.
    pub stop_settle: Duration,
    /// Wait between stop and start during a restart.
    pub restart_delay: Duration,
    /// Wait after signaling the device launcher before escalating.
    pub launcher_settle: Duration,
    /// Directories removed outright during cleanup.
    pub temp_dirs: Vec<PathBuf>,
    /// Prefix/suffix matches expanded during cleanup.
    pub temp_patterns: Vec<TempPattern>,
}

impl OrchestratorConfig {
    pub fn for_project(project_dir: PathBuf) -> Self {
        Self {
            project_dir,
            ..Self::default()
        }
    }

    pub fn build_info_path(&self) -> PathBuf {
        self.project_dir.join("build").join("build-info.json")
    }

    pub fn package_dir(&self) -> PathBuf {
        self.project_dir.join("build").join("packages")
    }

    pub fn watcher_config_path(&self) -> PathBuf {
        self.project_dir.join(".watchmanconfig")
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            build_variant: "debug".to_string(),
            sampling_interval: Duration::from_secs(5),
            start_settle: Duration::from_secs(3),
            stop_settle: Duration::from_secs(2),
            restart_delay: Duration::from_secs(2),
            launcher_settle: Duration::from_secs(2),
            temp_dirs: vec![
                PathBuf::from("/tmp/vdk-device"),
                PathBuf::from("/tmp/vdk-crash-reports"),
            ],
            temp_patterns: vec![TempPattern {
                dir: PathBuf::from("/tmp"),
                prefix: "vdk-".to_string(),
                suffix: ".log".to_string(),
            }],
        }
    }
}
