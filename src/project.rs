use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

pub const MANIFEST_NAME: &str = "package.json";
pub const BUILD_SCRIPT: &str = "build:device";

/// A validated project root. The orchestrator only ever needs the path.
#[derive(Debug, Clone)]
pub struct ProjectRoot(PathBuf);

impl ProjectRoot {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// Walks up from `start` to the nearest directory holding a manifest that
/// declares the device build script.
pub fn locate_project(start: &Path) -> Result<ProjectRoot> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        let manifest = current.join(MANIFEST_NAME);
        if manifest.is_file() {
            validate_manifest(&manifest)?;
            debug!(target: "vdctl", "locate_project: using {}", current.display());
            return Ok(ProjectRoot(current.to_path_buf()));
        }
        dir = current.parent();
    }
    Err(Error::InvalidProject {
        path: start.to_path_buf(),
        reason: format!("no {} in this directory or any parent", MANIFEST_NAME),
    })
}

fn validate_manifest(manifest: &Path) -> Result<()> {
    let text = fs::read_to_string(manifest)?;
    let value: serde_json::Value = serde_json::from_str(&text).map_err(|err| Error::InvalidProject {
        path: manifest.to_path_buf(),
        reason: format!("manifest is not valid JSON: {err}"),
    })?;
    let has_script = value
        .get("scripts")
        .and_then(|scripts| scripts.get(BUILD_SCRIPT))
        .is_some();
    if !has_script {
        return Err(Error::InvalidProject {
            path: manifest.to_path_buf(),
            reason: format!("manifest has no \"{}\" script", BUILD_SCRIPT),
        });
    }
    Ok(())
}
