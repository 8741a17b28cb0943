//! Run command

use std::path::Path;

use anyhow::{Context as _, Result, anyhow};
use cpm_core::{CpmConfig, project};
use crossterm::style::Stylize;

/// Run a manifest script with `sh -c`, returning its exit status.
pub async fn run(dir: Option<&Path>, script: &str, args: &[String], dry_run: bool) -> Result<i32> {
    let cwd = match dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let root = cpm_core::find_project_root(&cwd)
        .ok_or_else(|| anyhow!("No {} found. Run 'cpm init' first.", cpm_schema::MANIFEST_FILE))?;
    let manifest = project::load_manifest(&root)?;
    let config = CpmConfig::load(Some(&root))?;

    let Some(command) = manifest.script(script) else {
        let available: Vec<&str> = manifest.scripts.keys().map(String::as_str).collect();
        return Err(anyhow!(
            "Script '{script}' not found in {}. Available: {}",
            cpm_schema::MANIFEST_FILE,
            if available.is_empty() { "none".to_string() } else { available.join(", ") }
        ));
    };
    let line = command_line(command, args);

    println!("{} {}", ">".dark_grey(), line.clone().bold());
    if dry_run {
        return Ok(0);
    }

    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&line)
        .current_dir(&root)
        .env("PATH", search_path(&config.modules_path(&root)))
        .status()
        .await
        .with_context(|| format!("Failed to start '{script}'"))?;

    Ok(status.code().unwrap_or(1))
}

/// The script followed by its extra arguments, each single-quoted.
fn command_line(command: &str, args: &[String]) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        line.push('\'');
        line.push_str(&arg.replace('\'', r"'\''"));
        line.push('\'');
    }
    line
}

/// `<modules>/.bin` ahead of the inherited PATH.
fn search_path(modules: &Path) -> std::ffi::OsString {
    let bin = modules.join(".bin");
    let inherited = std::env::var_os("PATH").unwrap_or_default();
    let mut paths = vec![bin];
    paths.extend(std::env::split_paths(&inherited));
    std::env::join_paths(paths).unwrap_or(inherited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpm_schema::{Manifest, PackageName, Version};

    #[test]
    fn test_command_line_quotes_args() {
        let line = command_line("make", &["-j4".into(), "it's".into()]);
        assert_eq!(line, r"make '-j4' 'it'\''s'");
    }

    #[test]
    fn test_search_path_puts_modules_first() {
        let path = search_path(Path::new("/proj/cpm_modules"));
        let first = std::env::split_paths(&path).next().unwrap();
        assert_eq!(first, Path::new("/proj/cpm_modules/.bin"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_uses_configured_modules_dir() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".cpmrc"), "modules_dir = \"vendor\"\n").unwrap();
        let bin = dir.path().join("vendor/.bin");
        std::fs::create_dir_all(&bin).unwrap();
        let tool = bin.join("cpm-test-tool");
        std::fs::write(&tool, "#!/bin/sh\nexit 7\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut manifest = Manifest::new(PackageName::new("demo"), Version::new(1, 0, 0));
        manifest.scripts.insert("tool".into(), "cpm-test-tool".into());
        project::save_manifest(dir.path(), &manifest).unwrap();

        assert_eq!(run(Some(dir.path()), "tool", &[], false).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_run_propagates_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = Manifest::new(PackageName::new("demo"), Version::new(1, 0, 0));
        manifest.scripts.insert("fail".into(), "exit 3".into());
        project::save_manifest(dir.path(), &manifest).unwrap();

        assert_eq!(run(Some(dir.path()), "fail", &[], false).await.unwrap(), 3);
        assert_eq!(run(Some(dir.path()), "fail", &[], true).await.unwrap(), 0);
        assert!(run(Some(dir.path()), "missing", &[], false).await.is_err());
    }
}
