//! Filesystem locations.

use dirs::home_dir;
use std::path::{Path, PathBuf};

use cpm_schema::{MANIFEST_FILE, MODULES_DIR};

/// Returns the per-user CPM directory, or `None` if the user's home cannot be resolved.
pub fn try_cpm_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("CPM_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".cpm"))
}

/// Global configuration file: `~/.cpm/cpmrc`
pub fn global_config_path() -> Option<PathBuf> {
    try_cpm_home().map(|home| home.join("cpmrc"))
}

/// Project configuration file: `<project>/.cpmrc`
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".cpmrc")
}

/// Manifest path: `<project>/cpm_package.spec`
pub fn manifest_path(project_root: &Path) -> PathBuf {
    project_root.join(MANIFEST_FILE)
}

/// Default modules directory: `<project>/cpm_modules`
pub fn modules_path(project_root: &Path) -> PathBuf {
    project_root.join(MODULES_DIR)
}

/// Walk up from `start` to the nearest directory holding a manifest.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(MANIFEST_FILE).is_file())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_project_root_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "{}").unwrap();
        let nested = dir.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_project_root(&nested).as_deref(), Some(dir.path()));

        let empty = tempfile::tempdir().unwrap();
        assert!(find_project_root(empty.path()).is_none());
    }
}
