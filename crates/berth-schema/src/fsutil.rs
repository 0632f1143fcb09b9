//! Durable file writes shared by every crate that persists project state.

use std::io::Write;
use std::path::Path;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
pub fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Write `content` to `path` through a temp file in the same directory, so
/// readers see either the old file or the new one.
pub fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    // Directory fsync is best-effort; some filesystems refuse it.
    let _ = fsync_dir(dir);
    Ok(())
}
