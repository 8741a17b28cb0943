//! Source archives (`.tar.gz`) for publishing and installing.

use std::borrow::Cow;
use std::ffi::OsStr;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::Rejection;

/// Top-level entries never included in a published archive.
pub const EXCLUDED: &[&str] = &[cpm_schema::MODULES_DIR, ".git"];

/// Pack `src_dir` into an in-memory `.tar.gz`.
///
/// Entries are added in sorted order so the same tree always produces the
/// same member list. Symlinks are stored as links.
pub fn pack_directory(src_dir: &Path) -> Result<Vec<u8>, Rejection> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let walker = WalkDir::new(src_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded(src_dir, entry.path()));

    let mut count = 0usize;
    for entry in walker {
        let entry = entry.map_err(|e| Rejection::io(e.to_string()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|e| Rejection::io(e.to_string()))?;
        builder.append_path_with_name(entry.path(), relative)?;
        count += 1;
    }

    let encoder = builder.into_inner()?;
    let bytes = encoder.finish()?;
    debug!(files = count, bytes = bytes.len(), "packed {}", src_dir.display());
    Ok(bytes)
}

fn is_excluded(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    relative
        .components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .is_some_and(|first| EXCLUDED.contains(&first))
}

/// Unpack a `.tar.gz` into `dest_dir`, returning the files written.
///
/// Members that would land outside `dest_dir` are refused, including links
/// whose target leaves it and paths routed through an earlier link.
pub fn unpack_archive(data: &[u8], dest_dir: &Path) -> Result<Vec<PathBuf>, Rejection> {
    unpack_tar(GzDecoder::new(data), dest_dir)
}

fn unpack_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<Vec<PathBuf>, Rejection> {
    fs::create_dir_all(dest_dir)?;

    let mut archive = tar::Archive::new(reader);
    let mut written = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            continue;
        }

        let entry_path = entry.path()?.into_owned();
        let relative = contained(Path::new(""), &entry_path).ok_or_else(|| outside(&entry_path))?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            let target = entry.link_name()?.map(Cow::into_owned).unwrap_or_default();
            // Symlink targets are relative to the link's directory, hard link
            // targets to the archive root.
            let base = if entry_type.is_symlink() {
                relative.parent().unwrap_or(Path::new(""))
            } else {
                Path::new("")
            };
            if target.as_os_str().is_empty() || contained(base, &target).is_none() {
                return Err(outside(&entry_path));
            }
        }

        if !entry.unpack_in(dest_dir)? {
            return Err(outside(&entry_path));
        }
        written.push(relative);
    }

    Ok(written)
}

/// `path` joined onto `base` with `.` and `..` folded, or `None` when the
/// result is absolute or climbs above the root.
fn contained(base: &Path, path: &Path) -> Option<PathBuf> {
    let mut parts: Vec<&OsStr> = base.iter().collect();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.into_iter().collect())
}

fn outside(path: &Path) -> Rejection {
    Rejection::io(format!(
        "refusing archive member outside the destination: {}",
        path.display()
    ))
}
