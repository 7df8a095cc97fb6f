use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::util::run_command_checked;

pub const VDK_HOME_ENV: &str = "VDK_HOME";
const VDK_BINARY: &str = "vdk";

/// Fixed install locations checked after the env override and PATH.
const KNOWN_INSTALL_DIRS: [&str; 2] = ["/usr/local/lib/vdk", "/opt/vdk"];

static RESOLVED_VDK: OnceLock<PathBuf> = OnceLock::new();

/// Absolute path to the `vdk` executable. The first successful resolution is
/// cached for the life of the process and never invalidated; a moved SDK
/// costs a restart, repeated PATH scans cost more.
pub fn resolve_vdk() -> Result<PathBuf> {
    if let Some(path) = RESOLVED_VDK.get() {
        return Ok(path.clone());
    }
    let path = locate(
        env::var_os(VDK_HOME_ENV).map(PathBuf::from),
        env::var_os("PATH"),
        &known_install_paths(),
    )?;
    info!(target: "vdctl", "resolve_vdk: using {}", path.display());
    Ok(RESOLVED_VDK.get_or_init(|| path).clone())
}

fn known_install_paths() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = KNOWN_INSTALL_DIRS
        .iter()
        .map(|dir| Path::new(dir).join("bin").join(VDK_BINARY))
        .collect();
    if let Some(home) = env::var_os("HOME") {
        paths.push(PathBuf::from(home).join("Library/VDK/bin").join(VDK_BINARY));
    }
    paths
}

/// Resolution strategy, in order: env override, PATH scan, fixed locations.
/// On failure the error enumerates what each strategy found.
fn locate(
    home_override: Option<PathBuf>,
    path_var: Option<OsString>,
    install_candidates: &[PathBuf],
) -> Result<PathBuf> {
    let mut searched = Vec::new();

    match home_override {
        Some(home) => {
            let candidate = home.join("bin").join(VDK_BINARY);
            if candidate.is_file() {
                return Ok(candidate);
            }
            searched.push(format!(
                "{}={} (no {} there)",
                VDK_HOME_ENV,
                home.display(),
                candidate.display()
            ));
        }
        None => searched.push(format!("{} unset", VDK_HOME_ENV)),
    }

    let mut path_dirs = 0;
    if let Some(path_var) = path_var {
        for dir in env::split_paths(&path_var) {
            path_dirs += 1;
            let candidate = dir.join(VDK_BINARY);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    searched.push(format!("PATH ({} directories, no {})", path_dirs, VDK_BINARY));

    for candidate in install_candidates {
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
        searched.push(format!("{} (absent)", candidate.display()));
    }

    debug!(target: "vdctl", "locate: vdk not found; searched {:?}", searched);
    Err(Error::ToolNotFound {
        tool: VDK_BINARY.to_string(),
        searched,
    })
}

/// SDK version string, for diagnostics.
pub fn vdk_version() -> Result<String> {
    let vdk = resolve_vdk()?;
    let output = run_command_checked(&vdk.to_string_lossy(), &["--version"])?;
    Ok(output.stdout.trim().to_string())
}

/// Whether the resolved executable sits inside a plausible install tree
/// (bin/ next to lib/). Advisory only.
pub fn installation_valid() -> bool {
    let Ok(vdk) = resolve_vdk() else {
        return false;
    };
    let Some(bin_dir) = vdk.parent() else {
        return false;
    };
    let Some(root) = bin_dir.parent() else {
        return false;
    };
    bin_dir.file_name().is_some_and(|n| n == "bin") && root.join("lib").is_dir()
}
