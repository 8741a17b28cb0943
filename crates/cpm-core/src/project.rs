//! Reading and writing a project's `cpm_package.spec`.

use std::path::Path;

use cpm_schema::Manifest;
use tracing::debug;

use crate::error::{ErrorKind, Rejection};
use crate::paths;

/// Load and validate the manifest in `project_root`.
pub fn load_manifest(project_root: &Path) -> Result<Manifest, Rejection> {
    let path = paths::manifest_path(project_root);
    let text = std::fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Rejection::not_found(format!("no {} in {}", cpm_schema::MANIFEST_FILE, project_root.display()))
        } else {
            Rejection::io(format!("cannot read {}: {e}", path.display()))
        }
    })?;
    let manifest = Manifest::from_json(&text)
        .map_err(|e| Rejection::new(ErrorKind::ParseError, format!("{}: {e}", path.display())))?;
    manifest.validate()?;
    Ok(manifest)
}

/// Write `manifest` to `project_root`, replacing the file atomically.
pub fn save_manifest(project_root: &Path, manifest: &Manifest) -> Result<(), Rejection> {
    let path = paths::manifest_path(project_root);
    let tmp = path.with_extension("spec.tmp");
    std::fs::write(&tmp, manifest.to_json_pretty())?;
    std::fs::rename(&tmp, &path)?;
    debug!("wrote {}", path.display());
    Ok(())
}
