//! Filesystem helpers for writes that must never leave a partial file behind.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Make `part` safe to use as a single path component.
pub(crate) fn sanitize_component(part: &str) -> String {
    part.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Write `data` to a temp file next to `path`, then rename it into place.
///
/// If the rename fails the temp file is dropped (and deleted), so whatever was
/// at `path` before is left untouched.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = parent_dir(path);
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Copy `src` to `dest` through a same-directory temp file.
pub(crate) fn copy_atomic(src: &Path, dest: &Path) -> io::Result<u64> {
    let parent = parent_dir(dest);
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    let mut input = fs::File::open(src)?;
    let copied = io::copy(&mut input, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(copied)
}

/// Move a file into place, falling back to an atomic copy across filesystems.
pub(crate) fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(parent_dir(dest))?;
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::debug!(
                "rename {} -> {} failed ({}), copying instead",
                src.display(),
                dest.display(),
                e
            );
            copy_atomic(src, dest)?;
            fs::remove_file(src)?;
            Ok(())
        }
    }
}

pub(crate) fn set_executable(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
