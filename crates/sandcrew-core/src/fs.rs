//! Atomic document writes.

use std::io::Write;
use std::path::Path;

use crate::error::Result;

/// Write `content` to `path` via a temp file in the same directory and a rename.
///
/// Readers see either the previous document or the new one, never a partial write.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    temp_file.write_all(content)?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;

    Ok(())
}
