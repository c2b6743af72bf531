//! Small filesystem helpers for stats and backup.

use std::fs;
use std::path::Path;

/// Total size in bytes of all files under `dir`, recursively.
pub(crate) fn dir_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

/// Copies `src` into `dst` (created if needed), skipping entries whose file
/// name is in `excludes`.
pub(crate) fn copy_dir(src: &Path, dst: &Path, excludes: &[&str]) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if excludes.iter().any(|e| name == std::ffi::OsStr::new(e)) {
            continue;
        }
        let target = dst.join(&name);
        if entry.metadata()?.is_dir() {
            copy_dir(&entry.path(), &target, excludes)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}
