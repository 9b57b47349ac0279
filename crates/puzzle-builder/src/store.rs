//! Output directory file handling.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::BuildError;

/// Serialize `value` next to `path` and rename it into place.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), BuildError> {
    let json = serde_json::to_vec(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");

    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    debug!(path = %path.display(), "Wrote file");
    Ok(())
}

/// Delete every generated `*.json` file in `dir`. Returns how many were removed.
pub fn clear_generated_files(dir: &Path) -> Result<usize, BuildError> {
    let pattern = format!("{}/*.json", glob::Pattern::escape(&dir.to_string_lossy()));
    debug!(%pattern, "Clearing generated files");

    let mut removed = 0;
    for entry in glob::glob(&pattern).map_err(|e| BuildError::Config(e.to_string()))? {
        let path = entry.map_err(|e| BuildError::Io(e.into()))?;
        std::fs::remove_file(&path)?;
        removed += 1;
    }

    if removed > 0 {
        info!(removed, dir = %dir.display(), "Removed generated files");
    }
    Ok(removed)
}
