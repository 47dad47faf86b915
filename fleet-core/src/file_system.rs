//! File system helpers shared by the restore steps.

use crate::error::{FleetError, Result};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Check if a file exists in a directory
pub fn has_file(dir: &Path, filename: &str) -> bool {
    dir.join(filename).is_file()
}

/// Remove a directory tree if it is present. Missing paths are not an error.
pub fn remove_dir_if_exists(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(path).map_err(|e| FleetError::filesystem(e, path, "remove_dir_all"))?;
            Ok(true)
        }
        Ok(_) => {
            fs::remove_file(path).map_err(|e| FleetError::filesystem(e, path, "remove_file"))?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(FleetError::filesystem(e, path, "stat")),
    }
}

/// Copy the tree at `src` into `dst`, creating `dst` as needed.
///
/// File modes are preserved and symlinks are recreated as symlinks rather
/// than followed. Paths in `exclude` are relative to `src`; an excluded
/// directory is skipped with everything below it. Returns the number of
/// files copied.
pub fn copy_tree(src: &Path, dst: &Path, exclude: &[&Path]) -> Result<u64> {
    let mut copied = 0;

    let walker = WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
            !exclude.iter().any(|skip| relative == *skip)
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            FleetError::filesystem(e.into(), path, "walk")
        })?;

        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| FleetError::Internal(e.to_string()))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| FleetError::filesystem(e, &target, "create_dir_all"))?;
            let perms = entry
                .metadata()
                .map_err(|e| FleetError::filesystem(e.into(), entry.path(), "metadata"))?
                .permissions();
            fs::set_permissions(&target, perms)
                .map_err(|e| FleetError::filesystem(e, &target, "set_permissions"))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .map_err(|e| FleetError::filesystem(e, entry.path(), "read_link"))?;
            symlink(&link, &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| FleetError::filesystem(e, &target, "copy"))?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Replace `dst` with an exact copy of `src`. Anything previously at `dst`
/// is gone afterwards, including files that `src` does not have.
pub fn mirror_tree(src: &Path, dst: &Path, exclude: &[&Path]) -> Result<u64> {
    if !src.is_dir() {
        return Err(FleetError::filesystem(
            std::io::Error::new(std::io::ErrorKind::NotFound, "source directory missing"),
            src,
            "mirror",
        ));
    }
    remove_dir_if_exists(dst)?;
    copy_tree(src, dst, exclude)
}

#[cfg(unix)]
fn symlink(link: &Path, target: &Path) -> Result<()> {
    std::os::unix::fs::symlink(link, target).map_err(|e| FleetError::filesystem(e, target, "symlink"))
}

#[cfg(not(unix))]
fn symlink(_link: &Path, target: &Path) -> Result<()> {
    Err(FleetError::filesystem(
        std::io::Error::new(std::io::ErrorKind::Unsupported, "symlinks not supported"),
        target,
        "symlink",
    ))
}
